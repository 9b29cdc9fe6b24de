//! ACL store errors.

use sonic_sai::{AclCounterOid, AclEntryOid, AclTableOid, SaiError};
use thiserror::Error;

use crate::ledger::SharedResource;
use crate::types::{AclMatchField, AclTableIndex};

/// Error type for ACL store operations.
///
/// Every failing operation has already rolled back its in-memory changes
/// when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// No free table id in the allocator range.
    #[error("ACL table id allocator exhausted (range {min}..={max})")]
    AllocatorExhausted {
        min: AclTableIndex,
        max: AclTableIndex,
    },

    #[error("ACL table not found: {0}")]
    TableNotFound(AclTableOid),

    #[error("ACL rule not found: {0}")]
    RuleNotFound(AclEntryOid),

    #[error("ACL counter not found: {0}")]
    CounterNotFound(AclCounterOid),

    /// Policer or sample session that was never announced.
    #[error("Shared resource not found: {0}")]
    ResourceNotFound(SharedResource),

    /// Object id collision; points at an upstream id generation bug.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("ACL table {table} in use ({rules} rules, {counters} counters)")]
    TableInUse {
        table: AclTableOid,
        rules: usize,
        counters: usize,
    },

    #[error("ACL counter {counter} in use by {refs} rules")]
    CounterInUse { counter: AclCounterOid, refs: u32 },

    #[error("Shared resource {resource} in use by {refs} rules")]
    ResourceInUse { resource: SharedResource, refs: u32 },

    /// Double release or out-of-range table id.
    #[error("Invalid ACL table id: {0}")]
    InvalidId(AclTableIndex),

    #[error("ACL table {table} full ({size} rules)")]
    TableFull { table: AclTableOid, size: u32 },

    /// Filter field not declared by the rule's table.
    #[error("Field {field} is not declared by ACL table {table}")]
    InvalidField {
        table: AclTableOid,
        field: AclMatchField,
    },

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    /// The rule changed between preparation and commit of an update.
    #[error("ACL rule {0} changed concurrently")]
    StaleRule(AclEntryOid),

    #[error("Backend failure: {0}")]
    BackendFailure(#[from] SaiError),

    /// Internal bookkeeping violation.
    #[error("Inconsistent ACL state: {0}")]
    Inconsistent(String),
}

impl AclError {
    /// Returns true if the hardware backend rejected the operation.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, AclError::BackendFailure(_))
    }

    /// Returns true if the backend reported a transient condition, so the
    /// same call may succeed later. The store has already rolled back.
    pub fn is_retryable(&self) -> bool {
        match self {
            AclError::BackendFailure(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for ACL store operations.
pub type AclResult<T> = Result<T, AclError>;
