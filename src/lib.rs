//! # Gamedex
//!
//! An offline pipeline that turns game entity data (items, monsters, maps,
//! NPCs) into static JSON files a client can load lazily, plus the client
//! side loader that reads them back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Upstream   │──▶│ Snapshots │──▶│ Merge+Shard  │──▶│ public/data │
//! │ API (fetch) │   │ raw JSON  │   │   (build)    │   │ JSON (+gz)  │
//! └─────────────┘   └───────────┘   └──────────────┘   └──────┬──────┘
//!                                                             │
//!                                      ┌──────────────────────┤
//!                                      ▼                      ▼
//!                                 ┌──────────┐          ┌──────────┐
//!                                 │  verify  │          │ DataCache│
//!                                 │          │          │ (loader) │
//!                                 └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gdx fetch maps --start 100000000 --end 100000100 --out raw/maps.json
//! gdx build all
//! gdx verify all
//! gdx inspect items
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Record types and resource kinds (from `gamedex-core`) |
//! | [`merge`] | First/last-write-wins merging (from `gamedex-core`) |
//! | [`shard`] | Chunking and manifests (from `gamedex-core`) |
//! | [`fetch`] | Upstream API client with retries |
//! | [`sources`] | Snapshot files and ID lists |
//! | [`build`] | Build pipeline and output writers |
//! | [`verify`] | Output verification |
//! | [`loader`] | Runtime loader and cache |
//! | [`compress`] | Gzip helpers |
//! | [`progress`] | Progress reporting |

pub mod build;
pub mod compress;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod progress;
pub mod sources;
pub mod verify;

pub use gamedex_core::{merge, models, shard};
pub use loader::{DataCache, DataSource, LoadState, LocalSnapshot, RemoteCdn};
pub use models::{Record, RecordSet, ResourceKind};
