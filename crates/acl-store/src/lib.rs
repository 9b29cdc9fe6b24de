//! ACL store - access control list tables, rules and counters for SONiC.
//!
//! This crate keeps the control-plane view of a switch's ACLs:
//! - ACL tables with a declared, immutable set of match fields
//! - Prioritized rules built from mask/data filters and actions
//! - Counters, policers and sample sessions shared between rules by
//!   reference count
//! - Deterministic first-match evaluation of packets against the rules
//!
//! Hardware programming is delegated to an [`AclBackend`]; the store only
//! keeps the opaque handles it returns.
//!
//! # Architecture
//!
//! ```text
//!   caller (config path)          caller (evaluation)
//!          │                              │
//!          ▼                              ▼
//!      AclStore ───────────────────> eval::evaluate
//!          │
//!          ├──> TableIdAllocator (table ids)
//!          ├──> ObjectIndex × 3 (tables, rules, counters)
//!          ├──> RuleOrderList per table
//!          ├──> SharingLedger (counter/policer/samplepacket refs)
//!          └──> AclBackend (NPU handles, UDF offsets)
//! ```
//!
//! # Example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//! use sonic_acl_store::{
//!     AclAction, AclFilter, AclMatchField, AclRule, AclStage, AclStore, AclStoreConfig,
//!     AclTableSpec, PacketFields, SoftwareBackend,
//! };
//! use sonic_sai::{AclEntryOid, AclTableOid};
//!
//! let store = AclStore::new(AclStoreConfig::default(), Arc::new(SoftwareBackend::new())).unwrap();
//! let table = AclTableOid::from_raw_unchecked(0x10);
//! store
//!     .create_table(AclTableSpec::new(table, AclStage::Ingress).with_field(AclMatchField::DstIp))
//!     .unwrap();
//! store
//!     .create_rule(
//!         AclRule::new(AclEntryOid::from_raw_unchecked(1), table)
//!             .with_priority(10)
//!             .with_filter(AclFilter::exact(AclMatchField::DstIp, Ipv4Addr::new(10, 0, 0, 1).into()))
//!             .with_action(AclAction::drop()),
//!     )
//!     .unwrap();
//!
//! let packet = PacketFields::new().with(AclMatchField::DstIp, Ipv4Addr::new(10, 0, 0, 1));
//! assert!(store.evaluate(table, &packet).unwrap().is_some());
//! ```

pub mod allocator;
pub mod backend;
pub mod config;
pub mod counter;
pub mod error;
pub mod eval;
pub mod index;
pub mod ledger;
pub mod order;
pub mod rule;
pub mod store;
pub mod table;
pub mod types;
pub mod value;

pub use allocator::TableIdAllocator;
pub use backend::{AclBackend, SoftwareBackend, SoftwareObject};
pub use config::{AclPolicy, AclStoreConfig, ConfigError, TestPacket, UdfOffset};
pub use counter::{AclCounter, AclCounterSpec, CounterOwnership};
pub use error::{AclError, AclResult};
pub use eval::{AclMatch, PacketFields, TableMatch};
pub use index::{IndexError, ObjectIndex};
pub use ledger::{SharedResource, SharingLedger};
pub use order::{ListPosition, RuleOrderList};
pub use rule::{AclAction, AclFilter, AclRule, AclRuleUpdate};
pub use store::{AclStore, AclStoreStats};
pub use table::{AclTable, AclTableSpec};
pub use types::{
    AclActionType, AclMatchField, AclPacketAction, AclPriority, AclStage, AclTableIndex,
    AclTablePriority, AdminState, CounterMode, SampleDirection, UdfField, ACL_INVALID_TABLE_ID,
    ACL_TABLE_ID_MAX, ACL_TABLE_ID_MIN,
};
pub use value::AclFieldValue;
