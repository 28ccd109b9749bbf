//! TOML configuration.
//!
//! ```toml
//! [upstream]
//! base_url = "https://maplestory.io/api/GMS/255"
//! concurrency = 10
//! request_delay_ms = 100
//! max_retries = 3
//! retry_delay_ms = 1000
//!
//! [output]
//! dir = "public/data"
//! chunk_size = 5000
//! compress = false
//! policy = "first"
//!
//! [sources.items]
//! files = ["raw/items-*.json", "raw/items-extra.json"]
//!
//! [loader]
//! mode = "local"
//! compressed = false
//! cdn_base_url = "https://cdn.example.com/data"
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file, so the same config works from any working directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gamedex_core::merge::MergePolicy;
use gamedex_core::models::{Layout, ResourceKind};

/// Environment variable that overrides `[loader].mode` at runtime.
pub const DATA_SOURCE_ENV: &str = "GAMEDEX_DATA_SOURCE";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub output: OutputConfig,
    /// Snapshot inputs per resource kind, keyed by slug (`items`, `maps`, ...).
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Requests issued together in one group.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between groups.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed pause between retries of one request.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            concurrency: default_concurrency(),
            request_delay_ms: default_request_delay_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://maplestory.io/api/GMS/255".to_string()
}
fn default_concurrency() -> usize {
    10
}
fn default_request_delay_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Also write a `.gz` companion of every output file.
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub policy: MergePolicy,
    /// Per-kind layout overrides, keyed by slug.
    #[serde(default)]
    pub layout: BTreeMap<String, Layout>,
}

fn default_chunk_size() -> usize {
    5000
}

impl OutputConfig {
    pub fn layout_for(&self, kind: ResourceKind) -> Layout {
        self.layout
            .get(kind.slug())
            .copied()
            .unwrap_or_else(|| kind.default_layout())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    /// File paths or glob patterns, merged in listed order.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoaderMode {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for LoaderMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(LoaderMode::Local),
            "remote" | "cdn" => Ok(LoaderMode::Remote),
            other => anyhow::bail!("Unknown loader mode: '{}'. Must be local or remote.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoaderConfig {
    #[serde(default)]
    pub mode: LoaderMode,
    /// Snapshot root for `local` mode; defaults to `[output].dir`.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    #[serde(default)]
    pub cdn_base_url: Option<String>,
    /// Read the `.gz` companions instead of the plain JSON files.
    #[serde(default)]
    pub compressed: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LoaderConfig {
    /// The configured mode, unless [`DATA_SOURCE_ENV`] says otherwise.
    pub fn effective_mode(&self) -> Result<LoaderMode> {
        match std::env::var(DATA_SOURCE_ENV) {
            Ok(value) if !value.trim().is_empty() => value
                .parse()
                .with_context(|| format!("Invalid {}", DATA_SOURCE_ENV)),
            _ => Ok(self.mode),
        }
    }
}

impl Config {
    /// A config with defaults everywhere and output under `./public/data`.
    pub fn minimal() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            output: OutputConfig {
                dir: PathBuf::from("./public/data"),
                chunk_size: default_chunk_size(),
                compress: false,
                policy: MergePolicy::default(),
                layout: BTreeMap::new(),
            },
            sources: BTreeMap::new(),
            loader: LoaderConfig {
                timeout_secs: default_timeout_secs(),
                ..LoaderConfig::default()
            },
        }
    }

    pub fn source_files(&self, kind: ResourceKind) -> &[String] {
        self.sources
            .get(kind.slug())
            .map(|s| s.files.as_slice())
            .unwrap_or(&[])
    }

    pub fn loader_root(&self) -> &Path {
        self.loader
            .local_root
            .as_deref()
            .unwrap_or(self.output.dir.as_path())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.output.dir.is_relative() {
            self.output.dir = base.join(&self.output.dir);
        }
        if let Some(root) = &self.loader.local_root {
            if root.is_relative() {
                self.loader.local_root = Some(base.join(root));
            }
        }
        for source in self.sources.values_mut() {
            for file in source.files.iter_mut() {
                if Path::new(file.as_str()).is_relative() {
                    *file = base.join(file.as_str()).to_string_lossy().to_string();
                }
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.output.chunk_size == 0 {
        anyhow::bail!("output.chunk_size must be > 0");
    }

    if config.upstream.concurrency == 0 {
        anyhow::bail!("upstream.concurrency must be > 0");
    }

    if config.upstream.base_url.trim().is_empty() {
        anyhow::bail!("upstream.base_url must not be empty");
    }

    for slug in config.sources.keys().chain(config.output.layout.keys()) {
        slug.parse::<ResourceKind>()
            .with_context(|| format!("Invalid resource kind '{}' in config", slug))?;
    }

    if config.loader.mode == LoaderMode::Remote && config.loader.cdn_base_url.is_none() {
        anyhow::bail!("loader.cdn_base_url must be specified when loader.mode is 'remote'");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("gdx.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_fill_in() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[output]\ndir = \"out\"\n");
        let config = load_config(&path).unwrap();

        assert_eq!(config.output.chunk_size, 5000);
        assert_eq!(config.output.policy, MergePolicy::FirstWins);
        assert_eq!(config.upstream.concurrency, 10);
        assert_eq!(config.upstream.max_retries, 3);
        assert_eq!(config.loader.mode, LoaderMode::Local);
        assert_eq!(config.output.dir, tmp.path().join("out"));
        assert_eq!(config.loader_root(), tmp.path().join("out"));
    }

    #[test]
    fn sources_resolve_relative_to_config() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[output]
dir = "out"
policy = "last"

[output.layout]
npcs = "sharded"

[sources.items]
files = ["raw/items-*.json"]
"#,
        );
        let config = load_config(&path).unwrap();

        let files = config.source_files(ResourceKind::Item);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(tmp.path().to_str().unwrap()));
        assert!(config.source_files(ResourceKind::Map).is_empty());
        assert_eq!(config.output.policy, MergePolicy::LastWins);
        assert_eq!(config.output.layout_for(ResourceKind::Npc), Layout::Sharded);
        assert_eq!(config.output.layout_for(ResourceKind::Map), Layout::Consolidated);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[output]\ndir = \"out\"\nchunk_size = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_source_kind() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[output]\ndir = \"out\"\n[sources.skills]\nfiles = []\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn remote_mode_needs_cdn_url() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[output]\ndir = \"out\"\n[loader]\nmode = \"remote\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn loader_mode_parses() {
        assert_eq!("LOCAL".parse::<LoaderMode>().unwrap(), LoaderMode::Local);
        assert_eq!("cdn".parse::<LoaderMode>().unwrap(), LoaderMode::Remote);
        assert!("disk".parse::<LoaderMode>().is_err());
    }
}
