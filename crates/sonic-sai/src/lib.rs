//! Typed SAI vocabulary shared by the ACL store and its hardware backends.
//!
//! - [`types`]: type-safe object IDs and the opaque [`NpuHandle`]
//! - [`error`]: SAI status codes and the [`SaiError`] returned by backends
//!
//! # Example
//!
//! ```
//! use sonic_sai::{AclCounterOid, SaiError, SaiResult};
//!
//! fn lookup(counter: AclCounterOid) -> SaiResult<u64> {
//!     if counter.is_null() {
//!         return Err(SaiError::invalid_parameter("null counter"));
//!     }
//!     Ok(counter.as_raw())
//! }
//!
//! assert!(lookup(AclCounterOid::NULL).is_err());
//! ```

pub mod error;
pub mod types;

pub use types::{
    AclCounterKind, AclCounterOid, AclEntryKind, AclEntryOid, AclTableGroupKind,
    AclTableGroupOid, AclTableKind, AclTableOid, NpuHandle, PolicerKind, PolicerOid, PortKind,
    PortOid, RawSaiObjectId, SaiObjectId, SaiObjectKind, SamplePacketKind, SamplePacketOid,
    UdfGroupKind, UdfGroupOid,
};

pub use error::{SaiError, SaiResult, SaiStatus};
