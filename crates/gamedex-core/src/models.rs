//! Record model shared by the data-preparation pipeline and the loader.
//!
//! Every game entity is a [`Record`]: a tagged union with one variant per
//! [`ResourceKind`]. All variants share an `{id, name}` base, a handful of
//! typed kind-specific fields, and an `extra` map that keeps every other
//! JSON field verbatim so unknown upstream fields survive a round trip.
//!
//! Records serialize as the plain JSON object (no tag). Decoding is
//! kind-directed: the caller always knows which kind a file or response
//! holds, so [`Record::from_raw`] takes the kind explicitly.
//!
//! # Raw record normalization
//!
//! [`Record::from_raw`] accepts the shapes found in upstream responses and
//! bundled snapshots:
//!
//! - `id` may be a JSON number or a numeric string; it must be a positive
//!   integer that fits in `u32`.
//! - When `name` is missing, a nested `description.name` (the upstream item
//!   format) is lifted to the top level.
//! - A record with no name at all is kept as-is.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mapping from entity ID to record. Iteration is by ascending ID.
pub type RecordSet = BTreeMap<u32, Record>;

/// The resource kinds produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Item,
    Monster,
    Map,
    Npc,
}

/// How a resource kind is laid out on disk/CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Numbered shard files plus a `{slug}-index.json` manifest.
    Sharded,
    /// One `{slug}.json` file holding the whole record set.
    Consolidated,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Item,
        ResourceKind::Monster,
        ResourceKind::Map,
        ResourceKind::Npc,
    ];

    /// Plural name used in file names and config sections (`items`, `monsters`, ...).
    pub fn slug(&self) -> &'static str {
        match self {
            ResourceKind::Item => "items",
            ResourceKind::Monster => "monsters",
            ResourceKind::Map => "maps",
            ResourceKind::Npc => "npcs",
        }
    }

    /// Path segment of the upstream API (`GET {base}/{segment}/{id}`).
    pub fn api_segment(&self) -> &'static str {
        match self {
            ResourceKind::Item => "item",
            ResourceKind::Monster => "mob",
            ResourceKind::Map => "map",
            ResourceKind::Npc => "npc",
        }
    }

    /// Items are large enough to need sharding; everything else ships as one file.
    pub fn default_layout(&self) -> Layout {
        match self {
            ResourceKind::Item => Layout::Sharded,
            _ => Layout::Consolidated,
        }
    }

    /// File name of the manifest for a sharded kind.
    pub fn manifest_file(&self) -> String {
        format!("{}-index.json", self.slug())
    }

    /// File name of the consolidated output for a single-file kind.
    pub fn consolidated_file(&self) -> String {
        format!("{}.json", self.slug())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "item" | "items" => Ok(ResourceKind::Item),
            "monster" | "monsters" | "mob" | "mobs" => Ok(ResourceKind::Monster),
            "map" | "maps" => Ok(ResourceKind::Map),
            "npc" | "npcs" => Ok(ResourceKind::Npc),
            other => bail!(
                "Unknown resource kind: '{}'. Must be items, monsters, maps, or npcs.",
                other
            ),
        }
    }
}

/// An equipable, usable, or collectable item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A monster ("mob" upstream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monster {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Map IDs the monster spawns in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_at: Vec<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A game map (a field or town).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMap {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_map: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A non-player character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Npc {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub found_at: Vec<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A game entity of any kind. Equality between sources is by [`Record::id`] alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Item(Item),
    Monster(Monster),
    Map(GameMap),
    Npc(Npc),
}

impl Record {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Record::Item(_) => ResourceKind::Item,
            Record::Monster(_) => ResourceKind::Monster,
            Record::Map(_) => ResourceKind::Map,
            Record::Npc(_) => ResourceKind::Npc,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Record::Item(r) => r.id,
            Record::Monster(r) => r.id,
            Record::Map(r) => r.id,
            Record::Npc(r) => r.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Record::Item(r) => r.name.as_deref(),
            Record::Monster(r) => r.name.as_deref(),
            Record::Map(r) => r.name.as_deref(),
            Record::Npc(r) => r.name.as_deref(),
        }
    }

    /// Fields not covered by the typed model, kept verbatim.
    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            Record::Item(r) => &r.extra,
            Record::Monster(r) => &r.extra,
            Record::Map(r) => &r.extra,
            Record::Npc(r) => &r.extra,
        }
    }

    /// Decode a raw JSON object as a record of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not an object, has no usable `id`,
    /// or a typed field has the wrong JSON type.
    pub fn from_raw(kind: ResourceKind, value: Value) -> Result<Record> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => bail!("{} record must be a JSON object, got {}", kind, type_name(&other)),
        };

        let id = obj
            .get("id")
            .ok_or_else(|| anyhow!("{} record has no id", kind))
            .and_then(parse_id)?;
        obj.insert("id".to_string(), Value::from(id));

        if !obj.contains_key("name") {
            let nested = obj
                .get("description")
                .and_then(|d| d.get("name"))
                .and_then(|n| n.as_str())
                .map(str::to_string);
            if let Some(name) = nested {
                obj.insert("name".to_string(), Value::String(name));
            }
        }

        let value = Value::Object(obj);
        let record = match kind {
            ResourceKind::Item => Record::Item(serde_json::from_value(value)?),
            ResourceKind::Monster => Record::Monster(serde_json::from_value(value)?),
            ResourceKind::Map => Record::Map(serde_json::from_value(value)?),
            ResourceKind::Npc => Record::Npc(serde_json::from_value(value)?),
        };
        Ok(record)
    }
}

fn parse_id(value: &Value) -> Result<u32> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id > 0 && id <= u32::MAX as u64 => Ok(id as u32),
        _ => bail!("invalid record id: {}", value),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a JSON document holding records of `kind`.
///
/// Accepts either an object mapping ID to record (the shard/consolidated
/// format) or an array of records (the raw snapshot format). In the object
/// form a record without an `id` takes it from its key; a record whose `id`
/// disagrees with its key is rejected.
///
/// Within one document a repeated ID keeps its first occurrence.
pub fn parse_record_set(kind: ResourceKind, bytes: &[u8]) -> Result<RecordSet> {
    let value: Value = serde_json::from_slice(bytes).context("malformed JSON")?;
    let mut records = RecordSet::new();

    match value {
        Value::Object(entries) => {
            for (key, mut raw) in entries {
                let key_id = parse_id(&Value::String(key.clone()))
                    .with_context(|| format!("invalid key '{}'", key))?;
                if let Value::Object(obj) = &mut raw {
                    obj.entry("id").or_insert_with(|| Value::from(key_id));
                }
                let record = Record::from_raw(kind, raw)
                    .with_context(|| format!("invalid {} record '{}'", kind, key))?;
                if record.id() != key_id {
                    bail!(
                        "{} record under key '{}' has mismatched id {}",
                        kind,
                        key,
                        record.id()
                    );
                }
                records.entry(key_id).or_insert(record);
            }
        }
        Value::Array(items) => {
            for (pos, raw) in items.into_iter().enumerate() {
                let record = Record::from_raw(kind, raw)
                    .with_context(|| format!("invalid {} record at index {}", kind, pos))?;
                records.entry(record.id()).or_insert(record);
            }
        }
        other => bail!(
            "expected an object or array of {} records, got {}",
            kind,
            type_name(&other)
        ),
    }

    Ok(records)
}
