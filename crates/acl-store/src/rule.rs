//! ACL rule types.
//!
//! A rule is a prioritized entry of one table:
//! - Filters (which packets match)
//! - Actions (what happens to matched packets)
//! - References to shared counters, policers and sample sessions

use serde::{Deserialize, Serialize};
use sonic_sai::{
    AclCounterOid, AclEntryOid, AclTableOid, NpuHandle, PolicerOid, PortOid, SamplePacketOid,
};
use std::collections::HashSet;
use std::fmt;

use crate::ledger::SharedResource;
use crate::types::{
    AclActionType, AclMatchField, AclPacketAction, AclPriority, AdminState, SampleDirection,
    UdfField,
};
use crate::value::AclFieldValue;

fn enabled_by_default() -> bool {
    true
}

/// A field match condition: `(packet[field] & mask) == data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclFilter {
    pub field: AclMatchField,
    pub mask: AclFieldValue,
    pub data: AclFieldValue,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// UDF addressing, for `USER_DEFINED_n` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udf: Option<UdfField>,
}

impl AclFilter {
    /// Creates an enabled filter.
    pub fn new(field: AclMatchField, mask: AclFieldValue, data: AclFieldValue) -> Self {
        Self {
            field,
            mask,
            data,
            enabled: true,
            udf: None,
        }
    }

    /// Creates a filter matching `data` exactly.
    pub fn exact(field: AclMatchField, data: AclFieldValue) -> Self {
        Self::new(field, data.full_mask(), data)
    }

    /// Creates a filter on the bytes a UDF group selects.
    pub fn user_defined(udf: UdfField, mask: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            field: udf.field(),
            mask: AclFieldValue::Bytes(mask),
            data: AclFieldValue::Bytes(data),
            enabled: true,
            udf: Some(udf),
        }
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the filter on its own.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.data, &self.mask) {
            (AclFieldValue::OidList(_), _) => {}
            (data, mask) if data.width() != mask.width() => {
                return Err(format!(
                    "Filter {}: mask ({}) and data ({}) differ in shape",
                    self.field,
                    mask.kind(),
                    data.kind()
                ));
            }
            _ => {}
        }

        match (self.field, self.udf) {
            (AclMatchField::UserDefined(index), Some(udf)) if udf.index != index => Err(format!(
                "Filter {}: UDF index {} does not match the field",
                self.field, udf.index
            )),
            (AclMatchField::UserDefined(_), None) => {
                Err(format!("Filter {}: missing UDF group", self.field))
            }
            (field, Some(_)) if !field.is_user_defined() => {
                Err(format!("Filter {}: UDF addressing on a standard field", field))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for AclFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}/{}", self.field, self.data, self.mask)?;
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

/// An action applied to matched packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclAction {
    pub action_type: AclActionType,
    pub parameter: AclFieldValue,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl AclAction {
    /// Creates an enabled action.
    pub fn new(action_type: AclActionType, parameter: AclFieldValue) -> Self {
        Self {
            action_type,
            parameter,
            enabled: true,
        }
    }

    /// Creates a packet action.
    pub fn packet_action(action: AclPacketAction) -> Self {
        Self::new(
            AclActionType::PacketAction,
            AclFieldValue::Enum(action.as_i32()),
        )
    }

    pub fn drop() -> Self {
        Self::packet_action(AclPacketAction::Drop)
    }

    pub fn forward() -> Self {
        Self::packet_action(AclPacketAction::Forward)
    }

    pub fn trap() -> Self {
        Self::packet_action(AclPacketAction::Trap)
    }

    /// Redirects to a port.
    pub fn redirect(port: PortOid) -> Self {
        Self::new(AclActionType::Redirect, AclFieldValue::Oid(port.as_raw()))
    }

    pub fn set_dscp(dscp: u8) -> Self {
        Self::new(AclActionType::SetDscp, AclFieldValue::U8(dscp))
    }

    pub fn set_tc(tc: u8) -> Self {
        Self::new(AclActionType::SetTc, AclFieldValue::U8(tc))
    }

    pub fn set_meta_data(meta: u32) -> Self {
        Self::new(AclActionType::SetAclMetaData, AclFieldValue::U32(meta))
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the packet action, if this is a `PACKET_ACTION` action.
    pub fn as_packet_action(&self) -> Option<AclPacketAction> {
        match (self.action_type, &self.parameter) {
            (AclActionType::PacketAction, AclFieldValue::Enum(v)) => AclPacketAction::from_i32(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_packet_action() {
            Some(action) => write!(f, "{}={}", self.action_type, action)?,
            None => write!(f, "{}={}", self.action_type, self.parameter)?,
        }
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

/// An ACL rule.
///
/// The owning table never changes. The creation sequence is assigned by the
/// store and breaks ties between rules of equal priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub id: AclEntryOid,
    pub table: AclTableOid,
    #[serde(default)]
    pub priority: AclPriority,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub filters: Vec<AclFilter>,
    #[serde(default)]
    pub actions: Vec<AclAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<AclCounterOid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policer: Option<PolicerOid>,
    /// Sample sessions indexed by [`SampleDirection::index`].
    #[serde(default)]
    pub sample_sessions: [Option<SamplePacketOid>; SampleDirection::COUNT],
    #[serde(skip)]
    sequence: u64,
    #[serde(skip)]
    npu_handle: NpuHandle,
}

impl AclRule {
    /// Creates an enabled rule with priority 0 and no filters (a catch-all).
    pub fn new(id: AclEntryOid, table: AclTableOid) -> Self {
        Self {
            id,
            table,
            priority: 0,
            admin_state: AdminState::Enabled,
            filters: Vec::new(),
            actions: Vec::new(),
            counter: None,
            policer: None,
            sample_sessions: [None; SampleDirection::COUNT],
            sequence: 0,
            npu_handle: NpuHandle::NULL,
        }
    }

    pub fn with_priority(mut self, priority: AclPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_admin_state(mut self, admin_state: AdminState) -> Self {
        self.admin_state = admin_state;
        self
    }

    pub fn with_filter(mut self, filter: AclFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_action(mut self, action: AclAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_counter(mut self, counter: AclCounterOid) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn with_policer(mut self, policer: PolicerOid) -> Self {
        self.policer = Some(policer);
        self
    }

    pub fn with_sample_session(
        mut self,
        direction: SampleDirection,
        session: SamplePacketOid,
    ) -> Self {
        self.sample_sessions[direction.index()] = Some(session);
        self
    }

    /// Returns true if the evaluator considers this rule.
    pub fn is_enabled(&self) -> bool {
        self.admin_state == AdminState::Enabled
    }

    pub fn sample_session(&self, direction: SampleDirection) -> Option<SamplePacketOid> {
        self.sample_sessions[direction.index()]
    }

    /// Creation sequence number (tie-break between equal priorities).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Backend handle of the installed rule.
    pub fn npu_handle(&self) -> NpuHandle {
        self.npu_handle
    }

    pub(crate) fn set_npu_handle(&mut self, handle: NpuHandle) {
        self.npu_handle = handle;
    }

    /// Filters the evaluator checks.
    pub fn enabled_filters(&self) -> impl Iterator<Item = &AclFilter> + Clone {
        self.filters.iter().filter(|f| f.enabled)
    }

    /// Actions reported on a match.
    pub fn enabled_actions(&self) -> impl Iterator<Item = &AclAction> {
        self.actions.iter().filter(|a| a.enabled)
    }

    /// Returns the first enabled packet action.
    pub fn packet_action(&self) -> Option<AclPacketAction> {
        self.enabled_actions().find_map(AclAction::as_packet_action)
    }

    /// Every shared resource this rule references, one entry per reference.
    pub fn shared_resources(&self) -> Vec<SharedResource> {
        let mut resources = Vec::with_capacity(2 + SampleDirection::COUNT);
        if let Some(counter) = self.counter {
            resources.push(SharedResource::Counter(counter));
        }
        if let Some(policer) = self.policer {
            resources.push(SharedResource::Policer(policer));
        }
        resources.extend(
            self.sample_sessions
                .iter()
                .flatten()
                .map(|session| SharedResource::SamplePacket(*session)),
        );
        resources
    }

    /// Validates the rule independently of its table.
    pub fn validate(
        &self,
        min_priority: AclPriority,
        max_priority: AclPriority,
    ) -> Result<(), String> {
        if self.id.is_null() {
            return Err("Rule id is null".to_string());
        }
        if self.table.is_null() {
            return Err(format!("Rule {}: table id is null", self.id));
        }
        if self.priority < min_priority || self.priority > max_priority {
            return Err(format!(
                "Rule {}: priority {} out of range [{}, {}]",
                self.id, self.priority, min_priority, max_priority
            ));
        }
        if self.counter.is_some_and(|c| c.is_null())
            || self.policer.is_some_and(|p| p.is_null())
            || self.sample_sessions.iter().flatten().any(|s| s.is_null())
        {
            return Err(format!("Rule {}: null resource reference", self.id));
        }

        let mut seen = HashSet::new();
        for filter in &self.filters {
            if !seen.insert(filter.field) {
                return Err(format!("Rule {}: duplicate filter {}", self.id, filter.field));
            }
            filter.validate().map_err(|e| format!("Rule {}: {}", self.id, e))?;
        }

        let mut actions = HashSet::new();
        for action in &self.actions {
            if !actions.insert(action.action_type) {
                return Err(format!(
                    "Rule {}: duplicate action {}",
                    self.id, action.action_type
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AclRule[{}] priority={} filters={} actions={}",
            self.id,
            self.priority,
            self.filters.len(),
            self.actions.len()
        )?;
        if !self.is_enabled() {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

/// Changes to apply to an existing rule.
///
/// Unset fields keep their current value. For the optional references,
/// `Some(None)` clears the reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclRuleUpdate {
    pub priority: Option<AclPriority>,
    pub admin_state: Option<AdminState>,
    pub filters: Option<Vec<AclFilter>>,
    pub actions: Option<Vec<AclAction>>,
    pub counter: Option<Option<AclCounterOid>>,
    pub policer: Option<Option<PolicerOid>>,
    pub sample_sessions: Option<[Option<SamplePacketOid>; SampleDirection::COUNT]>,
}

impl AclRuleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: AclPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn admin_state(mut self, admin_state: AdminState) -> Self {
        self.admin_state = Some(admin_state);
        self
    }

    pub fn filters(mut self, filters: Vec<AclFilter>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn actions(mut self, actions: Vec<AclAction>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn counter(mut self, counter: Option<AclCounterOid>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn policer(mut self, policer: Option<PolicerOid>) -> Self {
        self.policer = Some(policer);
        self
    }

    pub fn sample_session(
        mut self,
        direction: SampleDirection,
        session: Option<SamplePacketOid>,
    ) -> Self {
        let sessions = self.sample_sessions.get_or_insert([None; SampleDirection::COUNT]);
        sessions[direction.index()] = session;
        self
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to a copy of a rule.
    ///
    /// Identity, table, sequence and handle are never touched.
    pub fn apply(&self, rule: &mut AclRule) {
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(admin_state) = self.admin_state {
            rule.admin_state = admin_state;
        }
        if let Some(filters) = &self.filters {
            rule.filters = filters.clone();
        }
        if let Some(actions) = &self.actions {
            rule.actions = actions.clone();
        }
        if let Some(counter) = self.counter {
            rule.counter = counter;
        }
        if let Some(policer) = self.policer {
            rule.policer = policer;
        }
        if let Some(sessions) = self.sample_sessions {
            rule.sample_sessions = sessions;
        }
    }
}
