//! Store configuration and JSON policy files.
//!
//! A policy file describes a complete store: its configuration, the
//! external resources rules may reference, UDF offsets for the software
//! backend, and the tables, counters and rules to create.
//!
//! ```json
//! {
//!   "config": { "max_priority": 9999 },
//!   "policers": [4096],
//!   "tables": [
//!     { "id": 16, "stage": "INGRESS", "priority": 10, "fields": ["DST_IP", "L4_DST_PORT"] }
//!   ],
//!   "rules": [
//!     {
//!       "id": 256, "table": 16, "priority": 100,
//!       "filters": [
//!         { "field": "DST_IP", "mask": { "ipv4": "255.255.255.0" }, "data": { "ipv4": "10.0.0.0" } }
//!       ],
//!       "actions": [ { "action_type": "PACKET_ACTION", "parameter": { "enum": 0 } } ]
//!     }
//!   ]
//! }
//! ```

use log::info;
use serde::{Deserialize, Serialize};
use sonic_sai::{AclTableOid, PolicerOid, SamplePacketOid, UdfGroupOid};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::backend::SoftwareBackend;
use crate::counter::AclCounterSpec;
use crate::error::{AclError, AclResult};
use crate::eval::PacketFields;
use crate::rule::AclRule;
use crate::store::AclStore;
use crate::table::AclTableSpec;
use crate::types::{AclPriority, AclStage, AclTableIndex, ACL_TABLE_ID_MAX, ACL_TABLE_ID_MIN};

fn default_table_id_min() -> AclTableIndex {
    ACL_TABLE_ID_MIN
}

fn default_table_id_max() -> AclTableIndex {
    ACL_TABLE_ID_MAX
}

fn default_min_priority() -> AclPriority {
    0
}

fn default_max_priority() -> AclPriority {
    999999
}

/// Configuration for AclStore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclStoreConfig {
    /// First allocatable table index.
    #[serde(default = "default_table_id_min")]
    pub table_id_min: AclTableIndex,
    /// Last allocatable table index.
    #[serde(default = "default_table_id_max")]
    pub table_id_max: AclTableIndex,
    /// Minimum rule priority.
    #[serde(default = "default_min_priority")]
    pub min_priority: AclPriority,
    /// Maximum rule priority.
    #[serde(default = "default_max_priority")]
    pub max_priority: AclPriority,
}

impl Default for AclStoreConfig {
    fn default() -> Self {
        Self {
            table_id_min: default_table_id_min(),
            table_id_max: default_table_id_max(),
            min_priority: default_min_priority(),
            max_priority: default_max_priority(),
        }
    }
}

impl AclStoreConfig {
    /// Validates the configuration.
    ///
    /// The table id range itself is checked by the allocator.
    pub fn validate(&self) -> AclResult<()> {
        if self.min_priority > self.max_priority {
            return Err(AclError::InvalidAttribute(format!(
                "Invalid priority range: min ({}) > max ({})",
                self.min_priority, self.max_priority
            )));
        }
        Ok(())
    }
}

/// Payload offset the software backend reports for a UDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdfOffset {
    pub group: UdfGroupOid,
    pub index: u16,
    pub offset: usize,
}

/// Errors loading or applying a policy file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize policy: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Acl(#[from] AclError),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Complete description of a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AclPolicy {
    pub config: AclStoreConfig,
    pub udf_offsets: Vec<UdfOffset>,
    pub policers: Vec<PolicerOid>,
    pub sample_sessions: Vec<SamplePacketOid>,
    pub tables: Vec<AclTableSpec>,
    pub counters: Vec<AclCounterSpec>,
    pub rules: Vec<AclRule>,
}

impl AclPolicy {
    /// Loads a policy from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    /// Writes the policy as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Software backend resolving the policy's UDF offsets.
    pub fn software_backend(&self) -> SoftwareBackend {
        let backend = SoftwareBackend::new();
        for udf in &self.udf_offsets {
            backend.set_udf_offset(udf.group, udf.index, udf.offset);
        }
        backend
    }

    /// Builds a store on a [`SoftwareBackend`] and applies the policy to it.
    pub fn build_store(&self) -> Result<AclStore, ConfigError> {
        let store = AclStore::new(self.config.clone(), Arc::new(self.software_backend()))?;
        self.apply(&store)?;
        Ok(store)
    }

    /// Creates everything the policy describes, in dependency order:
    /// policers and sample sessions, tables, counters, rules.
    pub fn apply(&self, store: &AclStore) -> AclResult<()> {
        for policer in &self.policers {
            store.register_policer(*policer)?;
        }
        for session in &self.sample_sessions {
            store.register_sample_session(*session)?;
        }
        for table in &self.tables {
            store.create_table(table.clone())?;
        }
        for counter in &self.counters {
            store.create_counter(counter.clone())?;
        }
        for rule in &self.rules {
            store.create_rule(rule.clone())?;
        }
        info!(
            "AclPolicy: Applied {} tables, {} counters, {} rules",
            self.tables.len(),
            self.counters.len(),
            self.rules.len()
        );
        Ok(())
    }
}

/// A packet to classify, either against one table or against a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPacket {
    #[serde(default)]
    pub name: Option<String>,
    /// Table to evaluate; when absent every table of `stage` is evaluated.
    #[serde(default)]
    pub table: Option<AclTableOid>,
    #[serde(default)]
    pub stage: AclStage,
    #[serde(flatten)]
    pub packet: PacketFields,
}

impl TestPacket {
    /// Loads a JSON array of test packets.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<TestPacket>, ConfigError> {
        read_json(path.as_ref())
    }

    /// Name for reports: the given name, or the packet's position.
    pub fn label(&self, position: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("packet#{}", position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AclMatchField;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn test_config_defaults() {
        let config: AclStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AclStoreConfig::default());
        assert_eq!(config.table_id_min, 1);
        assert_eq!(config.table_id_max, 32);
        assert_eq!(config.max_priority, 999999);
    }

    #[test]
    fn test_config_validate() {
        let config = AclStoreConfig {
            min_priority: 5,
            max_priority: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parse_doc_example() {
        let json = r#"{
            "config": { "max_priority": 9999 },
            "policers": [4096],
            "tables": [
                { "id": 16, "stage": "INGRESS", "priority": 10, "fields": ["DST_IP", "L4_DST_PORT"] }
            ],
            "rules": [
                {
                    "id": 256, "table": 16, "priority": 100,
                    "filters": [
                        { "field": "DST_IP", "mask": { "ipv4": "255.255.255.0" }, "data": { "ipv4": "10.0.0.0" } }
                    ],
                    "actions": [ { "action_type": "PACKET_ACTION", "parameter": { "enum": 0 } } ]
                }
            ]
        }"#;
        let policy: AclPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.config.max_priority, 9999);
        assert_eq!(policy.config.min_priority, 0);
        assert_eq!(policy.tables[0].fields.len(), 2);
        assert!(policy.rules[0].filters[0].enabled);

        let store = policy.build_store().unwrap();
        let packet = PacketFields::new().with(AclMatchField::DstIp, Ipv4Addr::new(10, 0, 0, 7));
        let hit = store
            .evaluate(AclTableOid::from_raw_unchecked(16), &packet)
            .unwrap()
            .unwrap();
        assert_eq!(hit.rule.as_raw(), 256);
    }

    #[test]
    fn test_packet_parse() {
        let json = r#"[
            { "name": "web", "table": 16, "fields": { "L4_DST_PORT": { "u16": 80 } } },
            { "stage": "EGRESS" }
        ]"#;
        let cases: Vec<TestPacket> = serde_json::from_str(json).unwrap();
        assert_eq!(cases[0].label(0), "web");
        assert_eq!(cases[0].table, Some(AclTableOid::from_raw_unchecked(16)));
        assert_eq!(cases[1].stage, AclStage::Egress);
        assert_eq!(cases[1].label(1), "packet#1");
    }
}
