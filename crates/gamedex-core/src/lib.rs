//! # gamedex core
//!
//! Pure data logic for gamedex: the record model, multi-source merging,
//! fixed-size sharding, and the shard manifest.
//!
//! This crate does no I/O and pulls in no async runtime, so it can be
//! shared by the build pipeline, the loader, and any other consumer of the
//! published shard format.

pub mod merge;
pub mod models;
pub mod shard;
