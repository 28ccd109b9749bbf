//! Check published output against its manifest.
//!
//! `gdx verify` reads what the build wrote and reports every inconsistency
//! it finds rather than stopping at the first: a missing or unparsable
//! shard, a shard whose record count differs from its manifest entry, an ID
//! present in more than one shard, or counts that do not add up to
//! `totalItems`.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

use gamedex_core::models::{parse_record_set, Layout, ResourceKind};
use gamedex_core::shard::Manifest;

use crate::config::Config;
use crate::progress::format_number;

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub kind: ResourceKind,
    pub layout: Layout,
    /// Files checked, manifest included.
    pub files: usize,
    /// Records found across all files.
    pub records: usize,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Verify one kind under `dir`.
///
/// Returns an error only when there is nothing to verify (no manifest or
/// consolidated file); inconsistencies are collected in the report.
pub fn verify_kind(dir: &Path, kind: ResourceKind, layout: Layout) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        kind,
        layout,
        files: 0,
        records: 0,
        problems: Vec::new(),
    };

    match layout {
        Layout::Consolidated => {
            let path = dir.join(kind.consolidated_file());
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            report.files = 1;
            match parse_record_set(kind, &bytes) {
                Ok(records) => report.records = records.len(),
                Err(e) => report
                    .problems
                    .push(format!("{}: {:#}", kind.consolidated_file(), e)),
            }
        }
        Layout::Sharded => {
            let path = dir.join(kind.manifest_file());
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let manifest: Manifest = serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid manifest {}", path.display()))?;
            report.files = 1;

            if let Err(e) = manifest.validate() {
                report.problems.push(format!("{}: {}", kind.manifest_file(), e));
            }

            let mut seen = BTreeSet::new();
            for entry in &manifest.chunks {
                let shard_path = dir.join(&entry.file);
                let bytes = match std::fs::read(&shard_path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        report.problems.push(format!("{}: {}", entry.file, e));
                        continue;
                    }
                };
                report.files += 1;

                let records = match parse_record_set(kind, &bytes) {
                    Ok(records) => records,
                    Err(e) => {
                        report.problems.push(format!("{}: {:#}", entry.file, e));
                        continue;
                    }
                };
                if records.len() != entry.count {
                    report.problems.push(format!(
                        "{}: holds {} records, manifest says {}",
                        entry.file,
                        records.len(),
                        entry.count
                    ));
                }
                for id in records.keys() {
                    if !seen.insert(*id) {
                        report
                            .problems
                            .push(format!("{}: id {} already seen in an earlier shard", entry.file, id));
                    }
                }
                report.records += records.len();
            }

            if seen.len() != manifest.total_items {
                report.problems.push(format!(
                    "{} distinct records found, manifest totalItems is {}",
                    seen.len(),
                    manifest.total_items
                ));
            }
        }
    }

    Ok(report)
}

/// Run `gdx verify` for `kinds` and print a report per kind.
pub fn run_verify(config: &Config, kinds: &[ResourceKind]) -> Result<()> {
    let explicit = kinds.len() == 1;
    let dir = &config.output.dir;
    let mut failed = 0;

    for &kind in kinds {
        let layout = config.output.layout_for(kind);
        let published = match layout {
            Layout::Sharded => kind.manifest_file(),
            Layout::Consolidated => kind.consolidated_file(),
        };
        if !explicit && !dir.join(&published).exists() {
            tracing::info!(kind = %kind, "nothing published, skipping");
            continue;
        }

        let report = verify_kind(dir, kind, layout)?;
        println!("verify {}", kind);
        println!("  files: {}", report.files);
        println!("  records: {}", format_number(report.records as u64));
        for problem in &report.problems {
            println!("  problem: {}", problem);
        }
        if !report.is_ok() {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} kind(s) failed verification", failed);
    }
    println!("ok");
    Ok(())
}
