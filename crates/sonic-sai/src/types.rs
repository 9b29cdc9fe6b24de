//! Type-safe SAI object ID wrappers.
//!
//! Object IDs are opaque 64-bit values whose encoding belongs to the id
//! allocation facility. The wrappers here only add a phantom kind so that an
//! ACL rule ID cannot be passed where a counter ID is expected, and make the
//! IDs usable as ordered map keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw SAI object ID type (matches sai_object_id_t in C).
pub type RawSaiObjectId = u64;

/// Marker trait for SAI object kinds.
pub trait SaiObjectKind: Send + Sync + 'static {
    /// Returns the SAI object type name for debugging.
    fn type_name() -> &'static str;
}

/// A type-safe SAI object ID.
///
/// # Examples
///
/// ```
/// use sonic_sai::{AclEntryOid, AclTableOid};
///
/// let table = AclTableOid::from_raw(0x7000000000001).unwrap();
/// let rule = AclEntryOid::from_raw(0x8000000000001).unwrap();
/// assert!(table.is_valid() && rule.is_valid());
///
/// // Mixing kinds does not compile:
/// // let _: AclTableOid = rule;
/// ```
pub struct SaiObjectId<T: SaiObjectKind> {
    raw: RawSaiObjectId,
    _marker: PhantomData<T>,
}

impl<T: SaiObjectKind> SaiObjectId<T> {
    /// The null object ID (SAI_NULL_OBJECT_ID).
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates a new object ID from a raw value.
    ///
    /// Returns `None` if the raw value is 0 (null object ID).
    pub fn from_raw(raw: RawSaiObjectId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self::from_raw_unchecked(raw))
        }
    }

    /// Creates a new object ID from a raw value, including null.
    pub const fn from_raw_unchecked(raw: RawSaiObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw object ID value.
    pub const fn as_raw(&self) -> RawSaiObjectId {
        self.raw
    }

    /// Returns true if this is a null object ID.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Returns true if this is a valid (non-null) object ID.
    pub const fn is_valid(&self) -> bool {
        self.raw != 0
    }
}

// Manual impls: derives would put bounds on `T`, which is only a marker.

impl<T: SaiObjectKind> Clone for SaiObjectId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SaiObjectKind> Copy for SaiObjectId<T> {}

impl<T: SaiObjectKind> fmt::Debug for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:016x})", T::type_name(), self.raw)
    }
}

impl<T: SaiObjectKind> fmt::Display for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.raw)
    }
}

impl<T: SaiObjectKind> PartialEq for SaiObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: SaiObjectKind> Eq for SaiObjectId<T> {}

impl<T: SaiObjectKind> PartialOrd for SaiObjectId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SaiObjectKind> Ord for SaiObjectId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: SaiObjectKind> Hash for SaiObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: SaiObjectKind> Default for SaiObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T: SaiObjectKind> From<SaiObjectId<T>> for RawSaiObjectId {
    fn from(oid: SaiObjectId<T>) -> Self {
        oid.raw
    }
}

// Serialized as the bare raw value so configuration files stay readable.
impl<T: SaiObjectKind> Serialize for SaiObjectId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw)
    }
}

impl<'de, T: SaiObjectKind> Deserialize<'de> for SaiObjectId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawSaiObjectId::deserialize(deserializer).map(Self::from_raw_unchecked)
    }
}

/// Opaque handle returned by the NPU backend for an installed object.
///
/// The store never interprets the value; it only hands it back to the
/// backend on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NpuHandle(u64);

impl NpuHandle {
    /// Handle of an object that has not been programmed.
    pub const NULL: Self = NpuHandle(0);

    /// Wraps a backend-specific value.
    pub const fn new(raw: u64) -> Self {
        NpuHandle(raw)
    }

    /// Returns the backend-specific value.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns true if the object is programmed.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npu:0x{:x}", self.0)
    }
}

// ============================================================================
// Object Kind Markers
// ============================================================================

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $oid_alias:ident) => {
        #[doc = concat!("Marker type for SAI ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl SaiObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Type alias for ", $type_name, " object IDs.")]
        pub type $oid_alias = SaiObjectId<$name>;
    };
}

define_object_kind!(AclTableKind, "AclTable", AclTableOid);
define_object_kind!(AclTableGroupKind, "AclTableGroup", AclTableGroupOid);
define_object_kind!(AclEntryKind, "AclEntry", AclEntryOid);
define_object_kind!(AclCounterKind, "AclCounter", AclCounterOid);
define_object_kind!(PolicerKind, "Policer", PolicerOid);
define_object_kind!(SamplePacketKind, "SamplePacket", SamplePacketOid);
define_object_kind!(UdfGroupKind, "UdfGroup", UdfGroupOid);
define_object_kind!(PortKind, "Port", PortOid);
