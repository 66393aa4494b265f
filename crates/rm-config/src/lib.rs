// SPDX-License-Identifier: Apache-2.0

//! Tunables, queue DDL attribute grammar, and the shared error taxonomy.
//!
//! This crate owns everything about the resource manager's configuration
//! surface that other crates only consume: parsing, validation, and the
//! [`RmError`] taxonomy that the RPC boundary reports to clients.

pub mod error;
pub mod policy;
pub mod quantity;
pub mod queue_ddl;
pub mod tunables;

pub use error::{RmError, RmErrorKind};
pub use policy::{AllocatePolicy, ProviderMode};
pub use quantity::{CoreQuantity, MemoryQuantity};
pub use queue_ddl::{QueueAttrs, VsegResourceQuota};
pub use tunables::Tunables;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A bootstrap queue definition loaded from the config file at startup,
/// before any DDL has run. `pg_root` is implicit and never appears here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BootstrapQueue {
    /// The queue's name.
    pub name: String,
    /// The queue's parent name (`"pg_root"` for a top-level queue).
    pub parent: String,
    /// Raw `(key, val)` attribute pairs, parsed the same way a DDL
    /// statement's attribute list is parsed.
    #[serde(default)]
    pub attrs: Vec<(String, String)>,
}

/// The top-level configuration file: process tunables plus the queue tree
/// the cluster starts with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct RmConfig {
    /// Process-wide tunables.
    pub tunables: Tunables,
    /// Queues to create at startup, in addition to `pg_root`.
    pub bootstrap_queues: Vec<BootstrapQueue>,
}

impl RmConfig {
    /// Parses a config file from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, RmError> {
        serde_json::from_str(raw).map_err(|e| config_parse_error(e.to_string()))
    }

    /// Parses a config file from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, RmError> {
        serde_yaml::from_str(raw).map_err(|e| config_parse_error(e.to_string()))
    }

    /// Parses a config file from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, RmError> {
        toml::from_str(raw).map_err(|e| config_parse_error(e.to_string()))
    }

    /// Loads a config file from disk, dispatching on its extension
    /// (`.json`, `.yaml`/`.yml`, `.toml`). Falls back to JSON if the
    /// extension is absent or unrecognized.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RmError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| config_parse_error(e.to_string()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&raw),
            Some("toml") => Self::from_toml(&raw),
            _ => Self::from_json(&raw),
        }
    }

    /// Validates the parsed config as a whole: tunables plus every
    /// bootstrap queue's field-level attribute validation. Sibling percent
    /// sums and parent resolution are validated once the queues are loaded
    /// into the tree (`rm-queue` owns that check).
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = self.tunables.validation_errors("tunables");
        for queue in &self.bootstrap_queues {
            match QueueAttrs::from_pairs(&queue.attrs) {
                Ok(attrs) => errors.extend(attrs.validation_errors(&queue.name)),
                Err(e) => errors.push(format!(
                    "bootstrap_queues[{}]: {e}",
                    queue.name
                )),
            }
        }
        errors
    }
}

fn config_parse_error(reason: String) -> RmError {
    RmError::WrongAttrValue {
        attr: "config_file".to_string(),
        value: reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg = RmConfig::from_json("{}").unwrap();
        assert_eq!(cfg.tunables, Tunables::default());
        assert!(cfg.bootstrap_queues.is_empty());
        assert!(cfg.validation_errors().is_empty());
    }

    #[test]
    fn round_trips_through_yaml() {
        let raw = r#"
tunables:
  rm_allocation_policy: fifo
bootstrap_queues:
  - name: etl
    parent: pg_root
    attrs:
      - [active_statements, "10"]
"#;
        let cfg = RmConfig::from_yaml(raw).unwrap();
        assert_eq!(cfg.tunables.rm_allocation_policy, AllocatePolicy::Fifo);
        assert_eq!(cfg.bootstrap_queues.len(), 1);
        assert_eq!(cfg.bootstrap_queues[0].name, "etl");
        assert!(cfg.validation_errors().is_empty());
    }

    #[test]
    fn loads_from_a_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rm.json");
        std::fs::write(&path, r#"{"tunables": {"rm_slice_num_per_seg_limit": 4}}"#).unwrap();
        let cfg = RmConfig::from_file(&path).unwrap();
        assert_eq!(cfg.tunables.rm_slice_num_per_seg_limit, 4);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        assert!(RmConfig::from_json(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn surfaces_bad_bootstrap_attrs_as_validation_errors() {
        let mut cfg = RmConfig::default();
        cfg.bootstrap_queues.push(BootstrapQueue {
            name: "bad".to_string(),
            parent: "pg_root".to_string(),
            attrs: vec![("resource_upper_factor".to_string(), "0.1".to_string())],
        });
        assert_eq!(cfg.validation_errors().len(), 1);
    }
}
