//! Record deduplication across sources.
//!
//! Sources are merged in caller-defined order; records are keyed by
//! [`Record::id`] alone. When two sources carry the same ID the
//! [`MergePolicy`] decides which value survives, and the loser is counted
//! as a duplicate. Callers control precedence purely by source order.
//!
//! For any input, `records.len() + duplicates` equals the total number of
//! input records.
//!
//! ```rust
//! use gamedex_core::merge::{merge, MergePolicy};
//! use gamedex_core::models::RecordSet;
//!
//! let outcome = merge(vec![RecordSet::new(), RecordSet::new()], MergePolicy::FirstWins);
//! assert!(outcome.records.is_empty());
//! assert_eq!(outcome.duplicates, 0);
//! ```

use std::collections::btree_map::Entry;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Record, RecordSet};

/// Which value wins when an ID appears in more than one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Keep the first value seen; discard later ones.
    #[default]
    #[serde(rename = "first")]
    FirstWins,
    /// Replace earlier values with later ones.
    #[serde(rename = "last")]
    LastWins,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::FirstWins => f.write_str("first"),
            MergePolicy::LastWins => f.write_str("last"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" | "first-wins" => Ok(MergePolicy::FirstWins),
            "last" | "last-wins" => Ok(MergePolicy::LastWins),
            other => bail!("Unknown merge policy: '{}'. Must be first or last.", other),
        }
    }
}

/// Result of merging one or more sources.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: RecordSet,
    /// Number of input records discarded or replaced because their ID was already present.
    pub duplicates: usize,
}

/// Incremental merger, fed one source at a time.
#[derive(Debug, Default)]
pub struct Merger {
    policy: MergePolicy,
    records: RecordSet,
    duplicates: usize,
    seen: usize,
}

impl Merger {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Add a single record, applying the merge policy.
    ///
    /// Returns `true` if the ID was already present.
    pub fn add_record(&mut self, record: Record) -> bool {
        self.seen += 1;
        match self.records.entry(record.id()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                false
            }
            Entry::Occupied(mut slot) => {
                if self.policy == MergePolicy::LastWins {
                    slot.insert(record);
                }
                self.duplicates += 1;
                true
            }
        }
    }

    /// Add every record of one source. Returns the duplicates it contributed.
    pub fn add_source<I>(&mut self, source: I) -> usize
    where
        I: IntoIterator<Item = Record>,
    {
        source
            .into_iter()
            .map(|record| self.add_record(record))
            .filter(|dup| *dup)
            .count()
    }

    /// Total input records seen so far.
    pub fn input_count(&self) -> usize {
        self.seen
    }

    pub fn finish(self) -> MergeOutcome {
        MergeOutcome {
            records: self.records,
            duplicates: self.duplicates,
        }
    }
}

/// Merge `sources` in order under `policy`.
pub fn merge<I>(sources: I, policy: MergePolicy) -> MergeOutcome
where
    I: IntoIterator<Item = RecordSet>,
{
    let mut merger = Merger::new(policy);
    for source in sources {
        merger.add_source(source.into_values());
    }
    merger.finish()
}
