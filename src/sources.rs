//! Snapshot inputs and ID lists.
//!
//! A snapshot is a JSON file holding raw records of one kind, either as an
//! object mapping ID to record or as an array of records. Snapshots are
//! listed per kind in `[sources.<slug>]` as paths or glob patterns and are
//! merged in listed order; files matching one glob are taken in sorted path
//! order so runs are reproducible.
//!
//! An ID list is a JSON array of positive integers naming the IDs to fetch
//! from the upstream API. It is the build-time artifact for any ID set that
//! is not a plain numeric range.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobMatcher};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use gamedex_core::models::{parse_record_set, RecordSet, ResourceKind};

use crate::compress;

/// Expand configured paths and glob patterns into concrete files, in order.
///
/// A literal path must exist. A glob that matches nothing is skipped with a
/// warning. A file reached by more than one pattern is only read once, at
/// its first position.
pub fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let matches = if is_glob(pattern) {
            let found = glob_files(pattern)?;
            if found.is_empty() {
                tracing::warn!(pattern = %pattern, "source pattern matched no files");
            }
            found
        } else {
            let path = PathBuf::from(pattern);
            if !path.is_file() {
                bail!("Source file does not exist: {}", path.display());
            }
            vec![path]
        };

        for path in matches {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Walk the literal prefix of `pattern` and return matching files, sorted.
fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher: GlobMatcher = Glob::new(pattern)
        .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        .compile_matcher();

    let mut root = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component {
            if is_glob(&part.to_string_lossy()) {
                break;
            }
        }
        root.push(component);
    }
    if root.as_os_str().is_empty() {
        root.push(".");
    }
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(&root) {
        let entry = entry?;
        if entry.file_type().is_file() && matcher.is_match(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Read one snapshot file. `.gz` files are decompressed first.
pub fn read_snapshot(kind: ResourceKind, path: &Path) -> Result<RecordSet> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let bytes = if compress::is_gzip_path(path) {
        compress::gunzip(&bytes)
            .with_context(|| format!("Failed to decompress snapshot: {}", path.display()))?
    } else {
        bytes
    };
    parse_record_set(kind, &bytes)
        .with_context(|| format!("Failed to parse snapshot: {}", path.display()))
}

/// Write a record set as a raw snapshot (pretty-printed object keyed by ID).
pub fn write_snapshot(path: &Path, records: &RecordSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
    Ok(())
}

/// Parse an ID list: a JSON array of positive integers. Order is kept;
/// repeated IDs are dropped.
pub fn parse_id_list(bytes: &[u8]) -> Result<Vec<u32>> {
    let raw: Vec<u64> = serde_json::from_slice(bytes)
        .context("ID list must be a JSON array of positive integers")?;

    let mut ids = Vec::with_capacity(raw.len());
    let mut seen = HashSet::with_capacity(raw.len());
    for id in raw {
        if id == 0 || id > u32::MAX as u64 {
            bail!("ID out of range in ID list: {}", id);
        }
        let id = id as u32;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

pub fn read_id_list(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read ID list: {}", path.display()))?;
    parse_id_list(&bytes).with_context(|| format!("Invalid ID list: {}", path.display()))
}
