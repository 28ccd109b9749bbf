//! Fixed-size sharding of record sets and the shard manifest.
//!
//! A large [`RecordSet`] is split into numbered [`Shard`]s of at most
//! `chunk_size` records each, so a CDN can serve them as separate files.
//! A [`Manifest`] describes the shard set and is the only authority on
//! which shard files exist.
//!
//! # Algorithm
//!
//! 1. Walk the record set in its iteration order (ascending ID).
//! 2. Cut consecutive groups of at most `chunk_size` records.
//! 3. Number the groups from 1.
//!
//! Every record lands in exactly one shard, and only the last shard may be
//! smaller than `chunk_size`. An empty record set yields no shards.
//!
//! # Example
//!
//! ```rust
//! use gamedex_core::models::RecordSet;
//! use gamedex_core::shard::chunk;
//!
//! let records = RecordSet::new();
//! let shards = chunk(&records, 5000).unwrap();
//! assert!(shards.is_empty());
//! ```

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::models::{Record, RecordSet, ResourceKind};

/// One shard: a 1-based index and the records it holds, in order.
#[derive(Debug, Clone)]
pub struct Shard<'a> {
    pub index: usize,
    pub records: Vec<&'a Record>,
}

impl<'a> Shard<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `{slug}-{index}.json`
    pub fn file_name(&self, kind: ResourceKind) -> String {
        format!("{}-{}.json", kind.slug(), self.index)
    }

    /// `chunk-{index}`
    pub fn range_label(&self) -> String {
        format!("chunk-{}", self.index)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.records.iter().map(|r| r.id())
    }

    /// Compact JSON: an object mapping stringified ID to record.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for Shard<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.records.iter().map(|r| (r.id(), *r)))
    }
}

/// Split `records` into consecutive shards of at most `chunk_size` records.
///
/// # Errors
///
/// Returns an error if `chunk_size` is zero.
pub fn chunk(records: &RecordSet, chunk_size: usize) -> Result<Vec<Shard<'_>>> {
    if chunk_size == 0 {
        bail!("chunk size must be > 0");
    }

    let mut shards = Vec::with_capacity(records.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(records.len()));

    for record in records.values() {
        current.push(record);
        if current.len() == chunk_size {
            shards.push(Shard {
                index: shards.len() + 1,
                records: std::mem::take(&mut current),
            });
        }
    }

    if !current.is_empty() {
        shards.push(Shard {
            index: shards.len() + 1,
            records: current,
        });
    }

    Ok(shards)
}

/// One entry of [`Manifest::chunks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub file: String,
    pub count: usize,
    pub range: String,
}

/// Index document for a sharded resource kind (`{slug}-index.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub total_items: usize,
    pub chunks: Vec<ChunkEntry>,
    pub generated: DateTime<Utc>,
}

impl Manifest {
    /// Describe a set of shards written for `kind`.
    pub fn from_shards(kind: ResourceKind, shards: &[Shard<'_>], generated: DateTime<Utc>) -> Self {
        let chunks: Vec<ChunkEntry> = shards
            .iter()
            .map(|shard| ChunkEntry {
                file: shard.file_name(kind),
                count: shard.len(),
                range: shard.range_label(),
            })
            .collect();
        let total_items = chunks.iter().map(|c| c.count).sum();

        Self {
            total_items,
            chunks,
            generated,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.chunks.len()
    }

    /// Check the manifest's internal consistency.
    ///
    /// The per-chunk counts must sum to `totalItems` and no file may be
    /// listed twice.
    pub fn validate(&self) -> Result<()> {
        let sum: usize = self.chunks.iter().map(|c| c.count).sum();
        if sum != self.total_items {
            bail!(
                "manifest chunk counts sum to {} but totalItems is {}",
                sum,
                self.total_items
            );
        }

        let mut files: Vec<&str> = self.chunks.iter().map(|c| c.file.as_str()).collect();
        files.sort_unstable();
        if let Some(pair) = files.windows(2).find(|w| w[0] == w[1]) {
            bail!("manifest lists '{}' more than once", pair[0]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use std::collections::BTreeSet;

    fn records(n: u32) -> RecordSet {
        (1..=n)
            .map(|id| {
                (
                    id,
                    Record::Item(Item {
                        id,
                        name: Some(format!("item {}", id)),
                        ..Item::default()
                    }),
                )
            })
            .collect()
    }

    fn sizes(shards: &[Shard<'_>]) -> Vec<usize> {
        shards.iter().map(|s| s.len()).collect()
    }

    #[test]
    fn exact_multiple() {
        let set = records(10_000);
        let shards = chunk(&set, 5000).unwrap();
        assert_eq!(sizes(&shards), vec![5000, 5000]);

        let manifest = Manifest::from_shards(ResourceKind::Item, &shards, Utc::now());
        assert_eq!(manifest.total_items, 10_000);
        assert_eq!(manifest.shard_count(), 2);
    }

    #[test]
    fn remainder_goes_to_last_shard() {
        let set = records(10_001);
        let shards = chunk(&set, 5000).unwrap();
        assert_eq!(sizes(&shards), vec![5000, 5000, 1]);
    }

    #[test]
    fn empty_set_has_no_shards() {
        let set = RecordSet::new();
        let shards = chunk(&set, 5000).unwrap();
        assert!(shards.is_empty());

        let manifest = Manifest::from_shards(ResourceKind::Item, &shards, Utc::now());
        assert_eq!(manifest.total_items, 0);
        assert!(manifest.chunks.is_empty());
        manifest.validate().unwrap();
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(chunk(&records(3), 0).is_err());
    }

    #[test]
    fn shards_reconstruct_the_key_set() {
        for (n, size) in [(1, 1), (7, 3), (100, 7), (64, 64), (65, 64)] {
            let set = records(n);
            let shards = chunk(&set, size).unwrap();

            let mut seen = BTreeSet::new();
            for shard in &shards {
                assert!(shard.len() <= size);
                assert!(!shard.is_empty());
                for id in shard.ids() {
                    assert!(seen.insert(id), "id {} appears twice", id);
                }
            }
            assert_eq!(seen, set.keys().copied().collect::<BTreeSet<_>>());
        }
    }

    #[test]
    fn indices_and_names_are_sequential() {
        let set = records(25);
        let shards = chunk(&set, 10).unwrap();
        for (i, shard) in shards.iter().enumerate() {
            assert_eq!(shard.index, i + 1);
            assert_eq!(shard.file_name(ResourceKind::Item), format!("items-{}.json", i + 1));
            assert_eq!(shard.range_label(), format!("chunk-{}", i + 1));
        }
    }

    #[test]
    fn rechunking_keeps_totals() {
        let set = records(1234);
        let a = Manifest::from_shards(ResourceKind::Item, &chunk(&set, 100).unwrap(), Utc::now());
        let b = Manifest::from_shards(ResourceKind::Item, &chunk(&set, 100).unwrap(), Utc::now());
        assert_eq!(a.total_items, b.total_items);
        assert_eq!(a.shard_count(), b.shard_count());
        assert_eq!(a.chunks, b.chunks);
    }

    #[test]
    fn shard_json_is_compact_and_keyed_by_id() {
        let set = records(2);
        let shards = chunk(&set, 5).unwrap();
        let json = String::from_utf8(shards[0].to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"1":{"id":1,"name":"item 1"},"2":{"id":2,"name":"item 2"}}"#);
    }

    #[test]
    fn manifest_wire_format() {
        let set = records(3);
        let shards = chunk(&set, 2).unwrap();
        let manifest = Manifest::from_shards(ResourceKind::Item, &shards, Utc::now());
        let value = serde_json::to_value(&manifest).unwrap();

        assert_eq!(value["totalItems"], 3);
        assert_eq!(value["chunks"][1]["file"], "items-2.json");
        assert_eq!(value["chunks"][1]["count"], 1);
        assert_eq!(value["chunks"][1]["range"], "chunk-2");
        assert!(value["generated"].is_string());

        let back: Manifest = serde_json::from_value(value).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn validate_catches_bad_totals_and_repeats() {
        let mut manifest = Manifest::from_shards(
            ResourceKind::Item,
            &chunk(&records(4), 2).unwrap(),
            Utc::now(),
        );
        manifest.validate().unwrap();

        manifest.total_items = 5;
        assert!(manifest.validate().is_err());

        manifest.total_items = 4;
        manifest.chunks[1].file = manifest.chunks[0].file.clone();
        assert!(manifest.validate().is_err());
    }
}
