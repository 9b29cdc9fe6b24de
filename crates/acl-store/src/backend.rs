//! Hardware backend seam.
//!
//! The store never programs hardware itself. Every object it creates is
//! handed to an [`AclBackend`], which returns an opaque [`NpuHandle`] that the
//! store gives back on removal. Backend calls are made without any store
//! lock held.

use log::debug;
use parking_lot::{Mutex, RwLock};
use sonic_sai::{NpuHandle, SaiError, SaiResult, UdfGroupOid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::counter::AclCounter;
use crate::rule::AclRule;
use crate::table::AclTable;

/// Hardware programming capability injected into the store.
pub trait AclBackend: Send + Sync {
    /// Creates a table in hardware.
    fn create_table(&self, table: &AclTable) -> SaiResult<NpuHandle>;

    /// Removes a table from hardware.
    fn remove_table(&self, handle: NpuHandle) -> SaiResult<()>;

    /// Installs a rule snapshot. Updates install the new snapshot before the
    /// old handle is removed.
    fn install_rule(&self, rule: &AclRule) -> SaiResult<NpuHandle>;

    /// Removes an installed rule.
    fn remove_rule(&self, handle: NpuHandle) -> SaiResult<()>;

    /// Creates a counter in hardware.
    fn create_counter(&self, counter: &AclCounter) -> SaiResult<NpuHandle>;

    /// Removes a counter from hardware.
    fn remove_counter(&self, handle: NpuHandle) -> SaiResult<()>;

    /// Resolves the payload byte offset a UDF group selects for a
    /// `USER_DEFINED_n` qualifier.
    fn resolve_udf(&self, group: UdfGroupOid, index: u16) -> SaiResult<usize>;
}

/// Kind of object installed in the [`SoftwareBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftwareObject {
    Table,
    Rule,
    Counter,
}

/// In-memory backend: hands out monotonic handles and resolves UDFs from a
/// configured offset table.
#[derive(Debug)]
pub struct SoftwareBackend {
    next_handle: AtomicU64,
    installed: Mutex<HashMap<NpuHandle, SoftwareObject>>,
    udf_offsets: RwLock<HashMap<(UdfGroupOid, u16), usize>>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            installed: Mutex::new(HashMap::new()),
            udf_offsets: RwLock::new(HashMap::new()),
        }
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_udf_offset(self, group: UdfGroupOid, index: u16, offset: usize) -> Self {
        self.set_udf_offset(group, index, offset);
        self
    }

    /// Configures the payload offset of a UDF.
    pub fn set_udf_offset(&self, group: UdfGroupOid, index: u16, offset: usize) {
        self.udf_offsets.write().insert((group, index), offset);
    }

    /// Number of installed objects of a kind.
    pub fn installed_count(&self, kind: SoftwareObject) -> usize {
        self.installed
            .lock()
            .values()
            .filter(|object| **object == kind)
            .count()
    }

    pub fn is_installed(&self, handle: NpuHandle) -> bool {
        self.installed.lock().contains_key(&handle)
    }

    fn install(&self, kind: SoftwareObject) -> NpuHandle {
        let handle = NpuHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.installed.lock().insert(handle, kind);
        debug!("SoftwareBackend: Installed {:?} {}", kind, handle);
        handle
    }

    fn uninstall(&self, handle: NpuHandle, kind: SoftwareObject) -> SaiResult<()> {
        let mut installed = self.installed.lock();
        match installed.get(&handle) {
            Some(object) if *object == kind => {
                installed.remove(&handle);
                Ok(())
            }
            _ => Err(SaiError::not_found(format!("{:?} {}", kind, handle))),
        }
    }
}

impl AclBackend for SoftwareBackend {
    fn create_table(&self, _table: &AclTable) -> SaiResult<NpuHandle> {
        Ok(self.install(SoftwareObject::Table))
    }

    fn remove_table(&self, handle: NpuHandle) -> SaiResult<()> {
        self.uninstall(handle, SoftwareObject::Table)
    }

    fn install_rule(&self, _rule: &AclRule) -> SaiResult<NpuHandle> {
        Ok(self.install(SoftwareObject::Rule))
    }

    fn remove_rule(&self, handle: NpuHandle) -> SaiResult<()> {
        self.uninstall(handle, SoftwareObject::Rule)
    }

    fn create_counter(&self, _counter: &AclCounter) -> SaiResult<NpuHandle> {
        Ok(self.install(SoftwareObject::Counter))
    }

    fn remove_counter(&self, handle: NpuHandle) -> SaiResult<()> {
        self.uninstall(handle, SoftwareObject::Counter)
    }

    fn resolve_udf(&self, group: UdfGroupOid, index: u16) -> SaiResult<usize> {
        self.udf_offsets
            .read()
            .get(&(group, index))
            .copied()
            .ok_or_else(|| SaiError::not_found(format!("UDF group {} index {}", group, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::AclTableSpec;
    use crate::types::{AclMatchField, AclStage};
    use sonic_sai::AclTableOid;

    #[test]
    fn test_software_backend_handles() {
        let backend = SoftwareBackend::new();
        let table = AclTable::from_spec(
            AclTableSpec::new(AclTableOid::from_raw_unchecked(1), AclStage::Ingress)
                .with_field(AclMatchField::DstIp),
            1,
        );
        let a = backend.create_table(&table).unwrap();
        let b = backend.create_table(&table).unwrap();
        assert_ne!(a, b);
        assert!(a.is_valid());
        assert_eq!(backend.installed_count(SoftwareObject::Table), 2);

        backend.remove_table(a).unwrap();
        assert!(!backend.is_installed(a));
        assert!(backend.remove_table(a).is_err());
        // Wrong kind is rejected.
        assert!(backend.remove_rule(b).is_err());
    }

    #[test]
    fn test_software_backend_udf() {
        let group = UdfGroupOid::from_raw_unchecked(0x30);
        let backend = SoftwareBackend::new().with_udf_offset(group, 1, 12);
        assert_eq!(backend.resolve_udf(group, 1).unwrap(), 12);
        assert!(matches!(
            backend.resolve_udf(group, 2),
            Err(SaiError::NotFound { .. })
        ));
    }
}
