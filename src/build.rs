//! Build pipeline: merge snapshots and write the published layout.
//!
//! For each resource kind the build:
//!
//! 1. Expands `[sources.<slug>].files` into concrete snapshot files.
//! 2. Merges them in listed order under the [`MergePolicy`].
//! 3. Writes either shards plus a manifest (`sharded`) or a single
//!    `{slug}.json` (`consolidated`) into `[output].dir`.
//!
//! Shards are written compactly, one at a time, and the manifest is only
//! written after every shard succeeded. A failed run therefore leaves the
//! previous manifest (or none) in place rather than one describing files
//! that were never written.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

use gamedex_core::merge::{MergePolicy, Merger};
use gamedex_core::models::{Layout, RecordSet, ResourceKind};
use gamedex_core::shard::{chunk, Manifest};

use crate::compress;
use crate::config::Config;
use crate::progress::{format_number, ProgressEvent, ProgressReporter};
use crate::sources::{expand_patterns, read_snapshot};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub policy: MergePolicy,
    /// Also write a `.gz` companion of every output file.
    pub compress: bool,
    /// Merge and count, but write nothing.
    pub dry_run: bool,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.output.chunk_size,
            policy: config.output.policy,
            compress: config.output.compress,
            dry_run: false,
        }
    }
}

/// What one kind's build read and wrote.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub kind: ResourceKind,
    pub layout: Layout,
    pub source_files: usize,
    pub input_records: usize,
    pub duplicates: usize,
    pub total: usize,
    /// Shards that were (or, on a dry run, would be) written. Zero for consolidated kinds.
    pub shards: usize,
    pub written: Vec<PathBuf>,
}

/// Merged snapshots of one kind.
#[derive(Debug, Clone)]
pub struct Collected {
    pub records: RecordSet,
    pub source_files: usize,
    pub input_records: usize,
    pub duplicates: usize,
}

/// Merge every configured snapshot of `kind`.
pub fn collect(
    config: &Config,
    kind: ResourceKind,
    policy: MergePolicy,
    progress: &dyn ProgressReporter,
) -> Result<Collected> {
    let files = expand_patterns(config.source_files(kind))?;
    let mut merger = Merger::new(policy);

    for path in &files {
        let records = read_snapshot(kind, path)?;
        let count = records.len();
        let duplicates = merger.add_source(records.into_values());
        tracing::debug!(
            kind = %kind,
            file = %path.display(),
            records = count,
            duplicates,
            "merged snapshot"
        );
        progress.report(ProgressEvent::Merging {
            kind,
            file: path.display().to_string(),
            records: count as u64,
        });
    }

    let input_records = merger.input_count();
    let outcome = merger.finish();
    Ok(Collected {
        records: outcome.records,
        source_files: files.len(),
        input_records,
        duplicates: outcome.duplicates,
    })
}

/// Write `bytes` to `path`, plus `{path}.gz` when `gz` is set.
fn write_output(path: &Path, bytes: &[u8], gz: bool) -> Result<Vec<PathBuf>> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    let mut written = vec![path.to_path_buf()];

    if gz {
        let mut target = path.as_os_str().to_owned();
        target.push(".gz");
        let target = PathBuf::from(target);
        std::fs::write(&target, compress::gzip(bytes)?)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        written.push(target);
    }

    Ok(written)
}

/// Write `records` as shards of at most `chunk_size` plus the manifest.
pub fn write_sharded(
    dir: &Path,
    kind: ResourceKind,
    records: &RecordSet,
    chunk_size: usize,
    gz: bool,
    progress: &dyn ProgressReporter,
) -> Result<(Manifest, Vec<PathBuf>)> {
    let shards = chunk(records, chunk_size)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;

    let mut written = Vec::new();
    let total = shards.len() as u64;
    for shard in &shards {
        let file = shard.file_name(kind);
        let bytes = shard
            .to_json()
            .with_context(|| format!("Failed to serialize {}", file))?;
        written.extend(write_output(&dir.join(&file), &bytes, gz)?);
        progress.report(ProgressEvent::Writing {
            kind,
            file,
            n: shard.index as u64,
            total,
        });
    }

    let manifest = Manifest::from_shards(kind, &shards, Utc::now());
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    written.extend(write_output(&dir.join(kind.manifest_file()), &bytes, gz)?);

    Ok((manifest, written))
}

/// Write `records` as a single `{slug}.json`.
pub fn write_consolidated(
    dir: &Path,
    kind: ResourceKind,
    records: &RecordSet,
    gz: bool,
    progress: &dyn ProgressReporter,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;

    let file = kind.consolidated_file();
    let bytes = serde_json::to_vec(records)?;
    let written = write_output(&dir.join(&file), &bytes, gz)?;
    progress.report(ProgressEvent::Writing {
        kind,
        file,
        n: 1,
        total: 1,
    });
    Ok(written)
}

/// Build one kind from its configured sources.
pub fn build_kind(
    config: &Config,
    kind: ResourceKind,
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
) -> Result<BuildSummary> {
    if options.chunk_size == 0 {
        bail!("chunk size must be > 0");
    }

    let Collected {
        records,
        source_files,
        input_records,
        duplicates,
    } = collect(config, kind, options.policy, progress)?;
    let layout = config.output.layout_for(kind);
    let shards = match layout {
        Layout::Sharded => records.len().div_ceil(options.chunk_size),
        Layout::Consolidated => 0,
    };

    let written = if options.dry_run {
        Vec::new()
    } else {
        let dir = &config.output.dir;
        match layout {
            Layout::Sharded => {
                let (manifest, written) = write_sharded(
                    dir,
                    kind,
                    &records,
                    options.chunk_size,
                    options.compress,
                    progress,
                )?;
                tracing::info!(
                    kind = %kind,
                    total = manifest.total_items,
                    shards = manifest.shard_count(),
                    "wrote manifest"
                );
                written
            }
            Layout::Consolidated => {
                write_consolidated(dir, kind, &records, options.compress, progress)?
            }
        }
    };

    Ok(BuildSummary {
        kind,
        layout,
        source_files,
        input_records,
        duplicates,
        total: records.len(),
        shards,
        written,
    })
}

/// Run `gdx build` for `kinds` and print a summary per kind.
///
/// When building every kind, kinds without configured sources are skipped.
/// Naming a single kind without sources is an error.
pub fn run_build(
    config: &Config,
    kinds: &[ResourceKind],
    options: &BuildOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let explicit = kinds.len() == 1;

    for &kind in kinds {
        if config.source_files(kind).is_empty() {
            if explicit {
                bail!("No sources configured for '{}' (add [sources.{}])", kind, kind);
            }
            tracing::info!(kind = %kind, "no sources configured, skipping");
            continue;
        }

        let summary = build_kind(config, kind, options, progress)?;

        if options.dry_run {
            println!("build {} (dry-run)", kind);
        } else {
            println!("build {}", kind);
        }
        println!("  source files: {}", summary.source_files);
        println!("  input records: {}", format_number(summary.input_records as u64));
        println!(
            "  duplicates ({}): {}",
            options.policy,
            format_number(summary.duplicates as u64)
        );
        println!("  records: {}", format_number(summary.total as u64));
        match summary.layout {
            Layout::Sharded => println!(
                "  shards: {} (chunk size {})",
                summary.shards, options.chunk_size
            ),
            Layout::Consolidated => println!("  layout: consolidated"),
        }
        if !options.dry_run {
            println!("  files written: {}", summary.written.len());
        }
    }

    println!("ok");
    Ok(())
}
