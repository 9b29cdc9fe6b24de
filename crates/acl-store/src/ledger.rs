//! Reference counting for resources shared between rules.
//!
//! Counters, policers and sample-packet sessions can be referenced by any
//! number of rules. A resource must be registered before a rule can attach to
//! it, and cannot be unregistered while any rule still holds it. Entries live
//! in a sharded map, so attach and detach on one resource are serialized
//! without blocking unrelated resources.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use sonic_sai::{AclCounterOid, AclEntryOid, PolicerOid, SamplePacketOid};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AclError, AclResult};

/// A resource rules can share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedResource {
    Counter(AclCounterOid),
    Policer(PolicerOid),
    SamplePacket(SamplePacketOid),
}

impl SharedResource {
    fn not_found(self) -> AclError {
        match self {
            Self::Counter(counter) => AclError::CounterNotFound(counter),
            other => AclError::ResourceNotFound(other),
        }
    }

    fn in_use(self, refs: u32) -> AclError {
        match self {
            Self::Counter(counter) => AclError::CounterInUse { counter, refs },
            resource => AclError::ResourceInUse { resource, refs },
        }
    }
}

impl fmt::Display for SharedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(oid) => write!(f, "counter {}", oid),
            Self::Policer(oid) => write!(f, "policer {}", oid),
            Self::SamplePacket(oid) => write!(f, "samplepacket {}", oid),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerEntry {
    /// Rule → number of references that rule holds.
    holders: BTreeMap<AclEntryOid, u32>,
    refs: u32,
}

/// Reference counts of shared resources.
#[derive(Debug, Default)]
pub struct SharingLedger {
    entries: DashMap<SharedResource, LedgerEntry>,
}

impl SharingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a resource known with zero references.
    pub fn register(&self, resource: SharedResource) -> AclResult<()> {
        match self.entries.entry(resource) {
            Entry::Occupied(_) => Err(AclError::DuplicateKey(resource.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(LedgerEntry::default());
                debug!("AclLedger: Registered {}", resource);
                Ok(())
            }
        }
    }

    /// Makes a resource known with a first reference from `rule` already
    /// taken, so it is never observable with zero references.
    pub fn register_held(&self, resource: SharedResource, rule: AclEntryOid) -> AclResult<()> {
        match self.entries.entry(resource) {
            Entry::Occupied(_) => Err(AclError::DuplicateKey(resource.to_string())),
            Entry::Vacant(slot) => {
                let mut entry = LedgerEntry::default();
                entry.holders.insert(rule, 1);
                entry.refs = 1;
                slot.insert(entry);
                debug!("AclLedger: Registered {} held by rule {}", resource, rule);
                Ok(())
            }
        }
    }

    /// Adds a reference from `rule`. Returns the new count.
    pub fn attach(&self, resource: SharedResource, rule: AclEntryOid) -> AclResult<u32> {
        let mut entry = self
            .entries
            .get_mut(&resource)
            .ok_or_else(|| resource.not_found())?;
        entry.refs += 1;
        *entry.holders.entry(rule).or_insert(0) += 1;
        Ok(entry.refs)
    }

    /// Attaches every resource, undoing the attached ones if any fails.
    pub fn attach_all(&self, resources: &[SharedResource], rule: AclEntryOid) -> AclResult<()> {
        for (done, resource) in resources.iter().enumerate() {
            if let Err(e) = self.attach(*resource, rule) {
                for attached in &resources[..done] {
                    // Cannot fail: the reference was just taken.
                    let _ = self.detach(*attached, rule);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drops a reference held by `rule`. Returns the remaining count; zero
    /// means the resource is eligible for destruction.
    pub fn detach(&self, resource: SharedResource, rule: AclEntryOid) -> AclResult<u32> {
        let mut entry = self
            .entries
            .get_mut(&resource)
            .ok_or_else(|| resource.not_found())?;
        let held = entry.holders.get_mut(&rule).ok_or_else(|| {
            AclError::Inconsistent(format!("{} is not held by rule {}", resource, rule))
        })?;
        *held -= 1;
        if *held == 0 {
            entry.holders.remove(&rule);
        }
        entry.refs -= 1;
        Ok(entry.refs)
    }

    /// Forgets a resource. Fails while any rule still references it.
    pub fn unregister(&self, resource: SharedResource) -> AclResult<()> {
        if self
            .entries
            .remove_if(&resource, |_, entry| entry.refs == 0)
            .is_some()
        {
            debug!("AclLedger: Unregistered {}", resource);
            return Ok(());
        }
        match self.entries.get(&resource) {
            Some(entry) => Err(resource.in_use(entry.refs)),
            None => Err(resource.not_found()),
        }
    }

    /// Current reference count, or `None` for unknown resources.
    pub fn ref_count(&self, resource: SharedResource) -> Option<u32> {
        self.entries.get(&resource).map(|entry| entry.refs)
    }

    /// Rules currently holding the resource, in id order.
    pub fn holders(&self, resource: SharedResource) -> Vec<AclEntryOid> {
        self.entries
            .get(&resource)
            .map(|entry| entry.holders.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, resource: SharedResource) -> bool {
        self.entries.contains_key(&resource)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
