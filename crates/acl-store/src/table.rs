//! ACL table types.
//!
//! A table declares the fields its rules may match on. The declared field set
//! never changes after creation; every rule filter is checked against it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sonic_sai::{AclTableGroupOid, AclTableOid, NpuHandle};
use std::collections::HashSet;
use std::fmt;

use crate::error::{AclError, AclResult};
use crate::order::RuleOrderList;
use crate::rule::AclRule;
use crate::types::{AclMatchField, AclStage, AclTableIndex, AclTablePriority, UdfField};

/// Table creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclTableSpec {
    pub id: AclTableOid,
    #[serde(default)]
    pub priority: AclTablePriority,
    #[serde(default)]
    pub stage: AclStage,
    pub fields: Vec<AclMatchField>,
    #[serde(default)]
    pub udf_fields: Vec<UdfField>,
    /// Maximum number of rules; 0 means unbounded.
    #[serde(default)]
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<AclTableGroupOid>,
}

impl AclTableSpec {
    /// Creates a spec with no fields.
    pub fn new(id: AclTableOid, stage: AclStage) -> Self {
        Self {
            id,
            priority: 0,
            stage,
            fields: Vec::new(),
            udf_fields: Vec::new(),
            size: 0,
            group: None,
        }
    }

    pub fn with_priority(mut self, priority: AclTablePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_field(mut self, field: AclMatchField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = AclMatchField>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Declares a UDF and its `USER_DEFINED_n` field.
    pub fn with_udf_field(mut self, udf: UdfField) -> Self {
        if !self.fields.contains(&udf.field()) {
            self.fields.push(udf.field());
        }
        self.udf_fields.push(udf);
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_group(mut self, group: AclTableGroupOid) -> Self {
        self.group = Some(group);
        self
    }

    /// Validates the spec.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_null() {
            return Err("Table id is null".to_string());
        }
        if self.fields.is_empty() {
            return Err(format!("Table {}: no match fields", self.id));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(*field) {
                return Err(format!("Table {}: duplicate field {}", self.id, field));
            }
        }

        let mut udf_indexes = HashSet::new();
        for udf in &self.udf_fields {
            if udf.group.is_null() {
                return Err(format!("Table {}: null UDF group", self.id));
            }
            if !udf_indexes.insert(udf.index) {
                return Err(format!("Table {}: duplicate UDF index {}", self.id, udf.index));
            }
            if !seen.contains(&udf.field()) {
                return Err(format!(
                    "Table {}: UDF {} without field {}",
                    self.id,
                    udf,
                    udf.field()
                ));
            }
        }
        for field in &self.fields {
            if let AclMatchField::UserDefined(index) = field {
                if !udf_indexes.contains(index) {
                    return Err(format!("Table {}: field {} has no UDF group", self.id, field));
                }
            }
        }

        if self.group.is_some_and(|g| g.is_null()) {
            return Err(format!("Table {}: null table group", self.id));
        }
        Ok(())
    }
}

/// A created ACL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTable {
    pub id: AclTableOid,
    /// Index handed out by the table id allocator.
    pub index: AclTableIndex,
    pub priority: AclTablePriority,
    pub stage: AclStage,
    fields: Vec<AclMatchField>,
    udf_fields: Vec<UdfField>,
    pub size: u32,
    pub group: Option<AclTableGroupOid>,
    npu_handle: NpuHandle,
}

impl AclTable {
    pub(crate) fn from_spec(spec: AclTableSpec, index: AclTableIndex) -> Self {
        Self {
            id: spec.id,
            index,
            priority: spec.priority,
            stage: spec.stage,
            fields: spec.fields,
            udf_fields: spec.udf_fields,
            size: spec.size,
            group: spec.group,
            npu_handle: NpuHandle::NULL,
        }
    }

    /// Declared match fields, in declaration order.
    pub fn fields(&self) -> &[AclMatchField] {
        &self.fields
    }

    pub fn udf_fields(&self) -> &[UdfField] {
        &self.udf_fields
    }

    pub fn has_field(&self, field: AclMatchField) -> bool {
        self.fields.contains(&field)
    }

    pub fn npu_handle(&self) -> NpuHandle {
        self.npu_handle
    }

    pub(crate) fn set_npu_handle(&mut self, handle: NpuHandle) {
        self.npu_handle = handle;
    }

    /// Returns true if another rule fits under the declared size.
    pub fn has_room(&self, rule_count: usize) -> bool {
        self.size == 0 || rule_count < self.size as usize
    }

    /// Checks a rule's filters against the declared fields.
    pub fn check_rule(&self, rule: &AclRule) -> AclResult<()> {
        if rule.table != self.id {
            return Err(AclError::InvalidAttribute(format!(
                "Rule {} belongs to table {}, not {}",
                rule.id, rule.table, self.id
            )));
        }
        for filter in &rule.filters {
            if !self.has_field(filter.field) {
                return Err(AclError::InvalidField {
                    table: self.id,
                    field: filter.field,
                });
            }
            if let Some(udf) = filter.udf {
                if !self.udf_fields.contains(&udf) {
                    return Err(AclError::InvalidAttribute(format!(
                        "Rule {}: {} is not declared by table {}",
                        rule.id, udf, self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for AclTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AclTable[{}] index={} stage={} priority={} fields={}",
            self.id,
            self.index,
            self.stage,
            self.priority,
            self.fields.len()
        )
    }
}

/// Mutable per-table state, guarded by the table's own lock.
#[derive(Debug, Default)]
pub(crate) struct TableState {
    pub(crate) rules: RuleOrderList,
    pub(crate) rule_count: usize,
    pub(crate) counter_count: usize,
    pub(crate) next_sequence: u64,
    /// Set while the table is being destroyed; blocks new rules and counters.
    pub(crate) retired: bool,
}

impl TableState {
    pub(crate) fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// A table together with its lock-guarded state.
#[derive(Debug)]
pub(crate) struct TableEntry {
    pub(crate) table: AclTable,
    pub(crate) state: RwLock<TableState>,
}

impl TableEntry {
    pub(crate) fn new(table: AclTable) -> Self {
        Self {
            table,
            state: RwLock::new(TableState::default()),
        }
    }
}
