//! Runtime loading of published data with a shared in-process cache.
//!
//! A [`DataCache`] is constructed once and handed to every consumer. It
//! keeps one slot per [`ResourceKind`]:
//!
//! ```text
//!   Unloaded ──load──▶ Loading ──ok──▶ Loaded
//!      ▲                  │
//!      └──────error───────┘
//! ```
//!
//! Concurrent loads of the same kind attach to the one in-flight load (a
//! [`Shared`] future), so a cache miss costs exactly one read of the data
//! source no matter how many callers arrive while it is running. A loaded
//! kind is served from memory until [`DataCache::clear`].
//!
//! # Sources
//!
//! [`DataSource`] abstracts where published files come from:
//!
//! - [`LocalSnapshot`] reads from a directory (the build output).
//! - [`RemoteCdn`] fetches from a CDN base URL.
//!
//! [`source_from_config`] picks one from `[loader].mode`, which the
//! `GAMEDEX_DATA_SOURCE` environment variable overrides.
//!
//! # Layouts
//!
//! Sharded kinds are read through their manifest: the manifest is fetched
//! first and exactly the files it lists are read, never files guessed from
//! the naming scheme. Consolidated kinds are a single file.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gamedex_core::models::{parse_record_set, Layout, RecordSet, ResourceKind};
use gamedex_core::shard::Manifest;

use crate::compress;
use crate::config::{Config, LoaderMode};

/// Where published files are read from.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Read the file at `path`, relative to the data root.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Files under a local directory.
pub struct LocalSnapshot {
    root: PathBuf,
}

impl LocalSnapshot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DataSource for LocalSnapshot {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(path);
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }
}

/// Files served over HTTP from a CDN base URL.
pub struct RemoteCdn {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteCdn {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl DataSource for RemoteCdn {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} from {}", status, url);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Build the data source selected by config and environment.
pub fn source_from_config(config: &Config) -> Result<Arc<dyn DataSource>> {
    match config.loader.effective_mode()? {
        LoaderMode::Local => Ok(Arc::new(LocalSnapshot::new(config.loader_root()))),
        LoaderMode::Remote => {
            let base = config
                .loader
                .cdn_base_url
                .as_deref()
                .ok_or_else(|| anyhow!("loader.cdn_base_url required for remote mode"))?;
            Ok(Arc::new(RemoteCdn::new(base, config.loader.timeout_secs)?))
        }
    }
}

/// Read one file, inflating it if it is gzip-compressed.
async fn read_file(source: &dyn DataSource, path: &str) -> Result<Vec<u8>> {
    let bytes = source.read(path).await?;
    if compress::is_gzip_path(std::path::Path::new(path)) {
        compress::gunzip(&bytes).with_context(|| format!("Failed to decompress {}", path))
    } else {
        Ok(bytes)
    }
}

fn published_name(file: &str, compressed: bool) -> String {
    if compressed {
        format!("{}.gz", file)
    } else {
        file.to_string()
    }
}

/// Read a sharded kind's manifest.
pub async fn read_manifest(
    source: &dyn DataSource,
    kind: ResourceKind,
    compressed: bool,
) -> Result<Manifest> {
    let path = published_name(&kind.manifest_file(), compressed);
    let bytes = read_file(source, &path).await?;
    let manifest: Manifest =
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid manifest {}", path))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Read every record of `kind` from `source`, bypassing any cache.
pub async fn fetch_records(
    source: &dyn DataSource,
    kind: ResourceKind,
    layout: Layout,
    compressed: bool,
) -> Result<RecordSet> {
    match layout {
        Layout::Consolidated => {
            let path = published_name(&kind.consolidated_file(), compressed);
            let bytes = read_file(source, &path).await?;
            parse_record_set(kind, &bytes).with_context(|| format!("Invalid {}", path))
        }
        Layout::Sharded => {
            let manifest = read_manifest(source, kind, compressed).await?;

            let reads = manifest.chunks.iter().map(|entry| async move {
                let path = published_name(&entry.file, compressed);
                let bytes = read_file(source, &path).await?;
                let records =
                    parse_record_set(kind, &bytes).with_context(|| format!("Invalid {}", path))?;
                if records.len() != entry.count {
                    bail!(
                        "{} holds {} records but the manifest says {}",
                        path,
                        records.len(),
                        entry.count
                    );
                }
                Ok::<RecordSet, anyhow::Error>(records)
            });

            let mut all = RecordSet::new();
            for shard in join_all(reads).await {
                for (id, record) in shard? {
                    if all.insert(id, record).is_some() {
                        bail!("{} id {} appears in more than one shard", kind, id);
                    }
                }
            }

            if all.len() != manifest.total_items {
                bail!(
                    "{} manifest lists {} records but shards hold {}",
                    kind,
                    manifest.total_items,
                    all.len()
                );
            }
            Ok(all)
        }
    }
}

type LoadResult = std::result::Result<Arc<RecordSet>, Arc<anyhow::Error>>;
type InFlight = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Clone)]
enum Slot {
    Loading { ticket: u64, load: InFlight },
    Loaded(Arc<RecordSet>),
}

/// Observable state of one kind's cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Default)]
struct Slots {
    /// Source of unique load tickets. A finished load only touches its
    /// kind's slot while that slot still holds its own ticket.
    next_ticket: u64,
    by_kind: HashMap<ResourceKind, Slot>,
}

/// Process-wide cache of loaded record sets, one slot per kind.
pub struct DataCache {
    source: Arc<dyn DataSource>,
    layouts: HashMap<ResourceKind, Layout>,
    compressed: bool,
    slots: Mutex<Slots>,
}

impl DataCache {
    /// A cache over `source` using each kind's default layout.
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            layouts: HashMap::new(),
            compressed: false,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// A cache over the configured source, layouts, and compression.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut cache = Self::new(source_from_config(config)?).compressed(config.loader.compressed);
        for kind in ResourceKind::ALL {
            cache = cache.with_layout(kind, config.output.layout_for(kind));
        }
        Ok(cache)
    }

    pub fn with_layout(mut self, kind: ResourceKind, layout: Layout) -> Self {
        self.layouts.insert(kind, layout);
        self
    }

    /// Read the `.gz` variant of every published file.
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    fn layout_for(&self, kind: ResourceKind) -> Layout {
        self.layouts
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_layout())
    }

    pub fn state(&self, kind: ResourceKind) -> LoadState {
        match self.slots.lock().by_kind.get(&kind) {
            None => LoadState::Unloaded,
            Some(Slot::Loading { .. }) => LoadState::Loading,
            Some(Slot::Loaded(_)) => LoadState::Loaded,
        }
    }

    /// Return the cached records for `kind`, loading them on a miss.
    ///
    /// Callers that arrive while a load is running share its result. On
    /// failure the slot returns to unloaded so the next call retries.
    pub async fn try_load(&self, kind: ResourceKind) -> Result<Arc<RecordSet>> {
        let (ticket, load) = {
            let mut slots = self.slots.lock();
            match slots.by_kind.get(&kind).cloned() {
                Some(Slot::Loaded(records)) => return Ok(records),
                Some(Slot::Loading { ticket, load }) => (ticket, load),
                None => {
                    slots.next_ticket += 1;
                    let ticket = slots.next_ticket;
                    let load = self.start_load(kind);
                    slots.by_kind.insert(
                        kind,
                        Slot::Loading {
                            ticket,
                            load: load.clone(),
                        },
                    );
                    (ticket, load)
                }
            }
        };

        let result = load.await;

        {
            let mut slots = self.slots.lock();
            // A cleared slot, or one already holding a newer load, is left alone.
            let still_current = matches!(
                slots.by_kind.get(&kind),
                Some(Slot::Loading { ticket: t, .. }) if *t == ticket
            );
            if still_current {
                match &result {
                    Ok(records) => {
                        slots.by_kind.insert(kind, Slot::Loaded(records.clone()));
                    }
                    Err(_) => {
                        slots.by_kind.remove(&kind);
                    }
                }
            }
        }

        result.map_err(|e| anyhow!("Failed to load {}: {:#}", kind, e))
    }

    fn start_load(&self, kind: ResourceKind) -> InFlight {
        let source = self.source.clone();
        let layout = self.layout_for(kind);
        let compressed = self.compressed;

        async move {
            tracing::debug!(kind = %kind, source = %source.describe(), "loading");
            fetch_records(source.as_ref(), kind, layout, compressed)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Like [`try_load`](Self::try_load), but a failure is logged and
    /// yields an empty record set.
    pub async fn load(&self, kind: ResourceKind) -> Arc<RecordSet> {
        match self.try_load(kind).await {
            Ok(records) => records,
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::warn!(kind = %kind, %error, "load failed, serving no data");
                Arc::new(RecordSet::new())
            }
        }
    }

    pub async fn load_items(&self) -> Arc<RecordSet> {
        self.load(ResourceKind::Item).await
    }

    pub async fn load_monsters(&self) -> Arc<RecordSet> {
        self.load(ResourceKind::Monster).await
    }

    pub async fn load_maps(&self) -> Arc<RecordSet> {
        self.load(ResourceKind::Map).await
    }

    pub async fn load_npcs(&self) -> Arc<RecordSet> {
        self.load(ResourceKind::Npc).await
    }

    /// Forget every loaded kind. Loads already in flight still answer their
    /// callers but do not repopulate the cache.
    pub fn clear(&self) {
        self.slots.lock().by_kind.clear();
    }
}

/// Run `gdx inspect`: load `kind` through a [`DataCache`] and print a sample.
pub async fn run_inspect(config: &Config, kind: ResourceKind, sample: usize) -> Result<()> {
    let cache = DataCache::from_config(config)?;
    let records = cache.try_load(kind).await?;

    println!("inspect {}", kind);
    println!("  source: {}", cache.source().describe());
    println!("  layout: {:?}", cache.layout_for(kind));
    println!("  records: {}", crate::progress::format_number(records.len() as u64));
    for (id, record) in records.iter().take(sample) {
        println!("  {:>10}  {}", id, record.name().unwrap_or("-"));
    }
    Ok(())
}
