//! Gzip helpers for published JSON.
//!
//! The build can write a `.gz` companion next to every output file, and the
//! loader and snapshot reader transparently inflate any path ending in
//! `.gz`. Compression always uses the best level: outputs are written once
//! and served many times.

use anyhow::{bail, Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const GZIP_LEVEL: Compression = Compression::best();
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

pub fn gzip(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GZIP_LEVEL);
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(input: &[u8]) -> Result<Vec<u8>> {
    if !input.starts_with(&GZIP_MAGIC) {
        bail!("not gzip data");
    }
    let mut output = Vec::new();
    GzDecoder::new(input).read_to_end(&mut output)?;
    Ok(output)
}

/// Write `{path}.gz` next to `path`. Returns the new file's path.
pub fn compress_file(path: &Path) -> Result<PathBuf> {
    let input =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    std::fs::write(&target, gzip(&input)?)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    tracing::debug!(
        file = %target.display(),
        input_size = input.len(),
        "compressed"
    );
    Ok(target)
}

/// Inflate `path` (which must end in `.gz`) next to itself. Returns the new file's path.
pub fn decompress_file(path: &Path) -> Result<PathBuf> {
    if !is_gzip_path(path) {
        bail!("Expected a .gz file: {}", path.display());
    }
    let input =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let target = path.with_extension("");

    let output =
        gunzip(&input).with_context(|| format!("Failed to decompress {}", path.display()))?;
    std::fs::write(&target, output)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(target)
}
