//! ACL counter types.

use serde::{Deserialize, Serialize};
use sonic_sai::{AclCounterOid, AclTableOid, NpuHandle};
use std::fmt;

use crate::types::CounterMode;

/// Counter creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclCounterSpec {
    pub id: AclCounterOid,
    pub table: AclTableOid,
    #[serde(default)]
    pub mode: CounterMode,
}

impl AclCounterSpec {
    pub fn new(id: AclCounterOid, table: AclTableOid) -> Self {
        Self {
            id,
            table,
            mode: CounterMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: CounterMode) -> Self {
        self.mode = mode;
        self
    }
}

/// How a counter came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterOwnership {
    /// Created by a caller; lives until the caller destroys it.
    Explicit,
    /// Created when a rule referenced an unknown counter id; destroyed with
    /// its last referencing rule.
    Implicit,
}

/// A created ACL counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclCounter {
    pub id: AclCounterOid,
    pub table: AclTableOid,
    pub mode: CounterMode,
    pub ownership: CounterOwnership,
    npu_handle: NpuHandle,
}

impl AclCounter {
    pub(crate) fn new(spec: AclCounterSpec, ownership: CounterOwnership) -> Self {
        Self {
            id: spec.id,
            table: spec.table,
            mode: spec.mode,
            ownership,
            npu_handle: NpuHandle::NULL,
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.ownership == CounterOwnership::Implicit
    }

    pub fn npu_handle(&self) -> NpuHandle {
        self.npu_handle
    }

    pub(crate) fn set_npu_handle(&mut self, handle: NpuHandle) {
        self.npu_handle = handle;
    }
}

impl fmt::Display for AclCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AclCounter[{}] table={} mode={}", self.id, self.table, self.mode)
    }
}
