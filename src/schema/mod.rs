//! # Schema Set
//!
//! An append-only, versioned field dictionary for stores of
//! `data_type = Schema`. Each [`Schema`] version is an ordered list of
//! named, typed fields with stable indices; [`SchemaSet::compact`] and
//! [`SchemaSet::expand`] translate JSON objects between the
//! human-readable `{name: value}` form and the on-disk `{index: value}`
//! form.
//!
//! Schema versions persist as a JSON sidecar (`schema.json`) next to the
//! store's three core files, written with the same atomic
//! write-to-temp-then-rename discipline used for `meta.tsdb`.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors produced by schema set operations.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `schema.json` contents were not valid JSON, or a payload wasn't a
    /// valid JSON object.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A new field list removed, renamed, reindexed, or retyped an
    /// existing field.
    #[error("schema is not append-only: {0}")]
    SchemaNotAppendOnly(String),

    /// `compact` encountered a key absent from the schema while
    /// `reject_unknown_fields` is enabled.
    #[error("unknown field {0:?} rejected by store configuration")]
    UnknownField(String),

    /// No schema version exists yet for a store that requires one.
    #[error("schema required but none has been set")]
    SchemaRequired,

    /// A payload that should have been a JSON object was something else.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Requested a schema version that doesn't exist.
    #[error("schema version {0} not found")]
    VersionNotFound(u32),
}

// ------------------------------------------------------------------------------------------------
// Field / Schema
// ------------------------------------------------------------------------------------------------

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// A JSON number.
    Number,
    /// A JSON string.
    String,
    /// A JSON boolean.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Any JSON value.
    Any,
}

/// One named, typed, stably-indexed field in a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Stable numeric index used as the compact-form JSON key.
    pub index: u32,
    /// Human-readable field name, used as the expanded-form JSON key.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// An immutable, ordered field dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// 1-based version number; versions are never mutated in place.
    pub version: u32,
    /// Fields declared by this version, including all fields inherited
    /// from earlier versions.
    pub fields: Vec<Field>,
}

impl Schema {
    fn find_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn find_by_index(&self, index: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.index == index)
    }
}

// ------------------------------------------------------------------------------------------------
// SchemaSet
// ------------------------------------------------------------------------------------------------

/// The full, append-only history of schema versions for one store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSet {
    versions: Vec<Schema>,
}

impl SchemaSet {
    /// An empty set — the store has no schema yet.
    pub fn empty() -> Self {
        SchemaSet { versions: Vec::new() }
    }

    /// The most recently created schema version, if any.
    pub fn current(&self) -> Option<&Schema> {
        self.versions.last()
    }

    /// The version number of [`Self::current`], or 0 if none.
    pub fn current_version(&self) -> u32 {
        self.current().map_or(0, |s| s.version)
    }

    /// Looks up a specific version; `0` means "the current version".
    pub fn version(&self, v: u32) -> Result<&Schema, SchemaError> {
        if v == 0 {
            return self.current().ok_or(SchemaError::SchemaRequired);
        }
        self.versions
            .iter()
            .find(|s| s.version == v)
            .ok_or(SchemaError::VersionNotFound(v))
    }

    /// Validates and records a new schema version.
    ///
    /// If no schema exists yet, `new_fields` becomes version 1. Otherwise
    /// every field present in the current version must appear in
    /// `new_fields` unchanged (same index, name, and type); `new_fields`
    /// may only add fields with indices and names not already in use.
    /// Violations return [`SchemaError::SchemaNotAppendOnly`].
    pub fn set_schema(&mut self, new_fields: Vec<Field>) -> Result<u32, SchemaError> {
        let next_version = match self.current() {
            None => 1,
            Some(current) => {
                Self::validate_append_only(&current.fields, &new_fields)?;
                current.version + 1
            }
        };

        self.versions.push(Schema {
            version: next_version,
            fields: new_fields,
        });
        debug!(version = next_version, "schema version recorded");
        Ok(next_version)
    }

    fn validate_append_only(old: &[Field], new: &[Field]) -> Result<(), SchemaError> {
        let new_by_index: BTreeMap<u32, &Field> = new.iter().map(|f| (f.index, f)).collect();
        for old_field in old {
            match new_by_index.get(&old_field.index) {
                None => {
                    return Err(SchemaError::SchemaNotAppendOnly(format!(
                        "field {:?} (index {}) was removed",
                        old_field.name, old_field.index
                    )));
                }
                Some(new_field) => {
                    if new_field.name != old_field.name || new_field.field_type != old_field.field_type {
                        return Err(SchemaError::SchemaNotAppendOnly(format!(
                            "field at index {} was renamed or retyped ({:?}:{:?} -> {:?}:{:?})",
                            old_field.index,
                            old_field.name,
                            old_field.field_type,
                            new_field.name,
                            new_field.field_type
                        )));
                    }
                }
            }
        }

        // New fields must not reuse an existing name under a different index.
        for new_field in new {
            if let Some(old_field) = old.iter().find(|f| f.name == new_field.name) {
                if old_field.index != new_field.index {
                    return Err(SchemaError::SchemaNotAppendOnly(format!(
                        "field name {:?} reassigned to a different index",
                        new_field.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Parses `expanded` as a JSON object and rewrites each key found in
    /// the current schema to the decimal string of its index. Unknown
    /// keys pass through under their original name unless
    /// `reject_unknown` is set, in which case they return
    /// [`SchemaError::UnknownField`].
    pub fn compact(&self, expanded: &[u8], reject_unknown: bool) -> Result<Vec<u8>, SchemaError> {
        let schema = self.current().ok_or(SchemaError::SchemaRequired)?;
        let value: Value = serde_json::from_slice(expanded)?;
        let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;

        let mut out = Map::with_capacity(obj.len());
        for (key, val) in obj {
            match schema.find_by_name(key) {
                Some(field) => {
                    out.insert(field.index.to_string(), val.clone());
                }
                None if reject_unknown => return Err(SchemaError::UnknownField(key.clone())),
                None => {
                    out.insert(key.clone(), val.clone());
                }
            }
        }
        Ok(serde_json::to_vec(&Value::Object(out))?)
    }

    /// Inverse of [`Self::compact`] using schema `version` (`0` = current):
    /// rewrites each numeric-string key to the matching field name.
    /// Keys that don't resolve to a known index are left as-is.
    pub fn expand(&self, compact: &[u8], version: u32) -> Result<Vec<u8>, SchemaError> {
        let schema = self.version(version)?;
        let value: Value = serde_json::from_slice(compact)?;
        let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;

        let mut out = Map::with_capacity(obj.len());
        for (key, val) in obj {
            match key.parse::<u32>().ok().and_then(|idx| schema.find_by_index(idx)) {
                Some(field) => {
                    out.insert(field.name.clone(), val.clone());
                }
                None => {
                    out.insert(key.clone(), val.clone());
                }
            }
        }
        Ok(serde_json::to_vec(&Value::Object(out))?)
    }

    /// Loads `schema.json` if present; returns an empty set otherwise
    /// (a store with no schema yet is not an error).
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        if !path.exists() {
            return Ok(SchemaSet::empty());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Atomically rewrites `schema.json`.
    pub fn save(&self, path: &Path) -> Result<(), SchemaError> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::other("schema.json path has no parent directory"))?;
        let tmp_path = dir.join("schema.json.tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        let dir_file = File::open(dir)?;
        if let Err(e) = dir_file.sync_all() {
            warn!(%e, "failed to fsync store directory after schema.json rename");
        }
        Ok(())
    }
}
