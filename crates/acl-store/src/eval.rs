//! First-match rule evaluation.
//!
//! A rule matches when every enabled filter matches; a rule without enabled
//! filters matches everything. Rules are tried in list order and the first
//! match wins. Evaluation never fails: a missing packet field, a UDF that
//! cannot be resolved or a payload too short for the UDF window all make the
//! filter not match.

use serde::{Deserialize, Serialize};
use sonic_sai::{AclCounterOid, AclEntryOid, AclTableOid, PolicerOid};
use std::collections::BTreeMap;

use crate::rule::{AclAction, AclFilter, AclRule};
use crate::types::{
    AclMatchField, AclPacketAction, AclPriority, AclStage, AclTablePriority, UdfField,
};
use crate::value::{masked_equal, AclFieldValue};

/// Header fields and payload of a packet to classify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFields {
    #[serde(default)]
    fields: BTreeMap<AclMatchField, AclFieldValue>,
    /// Bytes UDF filters select from.
    #[serde(default)]
    payload: Vec<u8>,
}

impl PacketFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: AclMatchField, value: impl Into<AclFieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn set(&mut self, field: AclMatchField, value: impl Into<AclFieldValue>) {
        self.fields.insert(field, value.into());
    }

    pub fn get(&self, field: AclMatchField) -> Option<&AclFieldValue> {
        self.fields.get(&field)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `len` payload bytes starting at `offset`, if the payload is long enough.
    pub fn payload_window(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.payload.get(offset..end)
    }
}

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclMatch {
    pub rule: AclEntryOid,
    pub table: AclTableOid,
    pub priority: AclPriority,
    /// Enabled actions of the matching rule.
    pub actions: Vec<AclAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<AclCounterOid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policer: Option<PolicerOid>,
}

impl AclMatch {
    fn from_rule(rule: &AclRule) -> Self {
        Self {
            rule: rule.id,
            table: rule.table,
            priority: rule.priority,
            actions: rule.enabled_actions().cloned().collect(),
            counter: rule.counter,
            policer: rule.policer,
        }
    }

    /// Returns the first packet action of the matching rule.
    pub fn packet_action(&self) -> Option<AclPacketAction> {
        self.actions.iter().find_map(AclAction::as_packet_action)
    }
}

/// Match of one table during stage evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMatch {
    pub stage: AclStage,
    pub table_priority: AclTablePriority,
    #[serde(flatten)]
    pub matched: AclMatch,
}

/// Returns the first enabled rule matching `packet`.
///
/// `resolve_udf` maps UDF addressing to a payload offset; `None` means the
/// UDF cannot be resolved.
pub fn evaluate<'a, I, F>(rules: I, packet: &PacketFields, mut resolve_udf: F) -> Option<AclMatch>
where
    I: IntoIterator<Item = &'a AclRule>,
    F: FnMut(UdfField) -> Option<usize>,
{
    rules
        .into_iter()
        .filter(|rule| rule.is_enabled())
        .find(|rule| rule_matches(rule, packet, &mut resolve_udf))
        .map(AclMatch::from_rule)
}

/// Returns true if every enabled filter of `rule` matches.
pub fn rule_matches<F>(rule: &AclRule, packet: &PacketFields, resolve_udf: &mut F) -> bool
where
    F: FnMut(UdfField) -> Option<usize>,
{
    rule.enabled_filters()
        .all(|filter| filter_matches(filter, packet, resolve_udf))
}

/// Tests one filter against a packet.
pub fn filter_matches<F>(filter: &AclFilter, packet: &PacketFields, resolve_udf: &mut F) -> bool
where
    F: FnMut(UdfField) -> Option<usize>,
{
    let Some(udf) = filter.udf else {
        return packet
            .get(filter.field)
            .map(|value| filter.data.matches(&filter.mask, value))
            .unwrap_or(false);
    };

    let (Some(data), Some(mask)) = (filter.data.bytes(), filter.mask.bytes()) else {
        return false;
    };
    resolve_udf(udf)
        .and_then(|offset| packet.payload_window(offset, data.len()))
        .map(|window| masked_equal(window, &mask, &data))
        .unwrap_or(false)
}
