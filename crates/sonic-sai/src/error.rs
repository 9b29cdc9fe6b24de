//! SAI error types and status handling.
//!
//! Hardware backends report failures with these types. The ACL store wraps
//! them unchanged, so the status a backend returned is still visible to the
//! caller after the store has rolled its own state back.

use std::fmt;
use thiserror::Error;

macro_rules! sai_statuses {
    ($($variant:ident = $code:literal => $name:literal),+ $(,)?) => {
        /// SAI status codes matching the SAI C API (`sai_status_t`).
        #[repr(i32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SaiStatus {
            $($variant = $code,)+
        }

        impl SaiStatus {
            /// Returns the C constant name of the status.
            pub fn name(&self) -> &'static str {
                match self {
                    $(SaiStatus::$variant => $name,)+
                }
            }
        }
    };
}

sai_statuses! {
    Success = 0 => "SAI_STATUS_SUCCESS",
    Failure = -1 => "SAI_STATUS_FAILURE",
    NotSupported = -2 => "SAI_STATUS_NOT_SUPPORTED",
    NoMemory = -3 => "SAI_STATUS_NO_MEMORY",
    InsufficientResources = -4 => "SAI_STATUS_INSUFFICIENT_RESOURCES",
    InvalidParameter = -5 => "SAI_STATUS_INVALID_PARAMETER",
    ItemAlreadyExists = -6 => "SAI_STATUS_ITEM_ALREADY_EXISTS",
    ItemNotFound = -7 => "SAI_STATUS_ITEM_NOT_FOUND",
    BufferOverflow = -8 => "SAI_STATUS_BUFFER_OVERFLOW",
    Uninitialized = -12 => "SAI_STATUS_UNINITIALIZED",
    TableFull = -13 => "SAI_STATUS_TABLE_FULL",
    MandatoryAttributeMissing = -14 => "SAI_STATUS_MANDATORY_ATTRIBUTE_MISSING",
    NotImplemented = -15 => "SAI_STATUS_NOT_IMPLEMENTED",
    ObjectInUse = -17 => "SAI_STATUS_OBJECT_IN_USE",
    InvalidObjectType = -18 => "SAI_STATUS_INVALID_OBJECT_TYPE",
    InvalidObjectId = -19 => "SAI_STATUS_INVALID_OBJECT_ID",
    HwTableFull = -22 => "SAI_STATUS_HW_TABLE_FULL",
    NotExecuted = -23 => "SAI_STATUS_NOT_EXECUTED",
    InvalidAttribute = -24 => "SAI_STATUS_INVALID_ATTRIBUTE",
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for SAI operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaiError {
    /// SAI API returned an error status.
    #[error("SAI operation failed: {status}")]
    Status { status: SaiStatus },

    /// The requested feature is not supported by the SAI implementation.
    #[error("Feature not supported: {feature}")]
    NotSupported { feature: String },

    /// Invalid parameter passed to SAI API.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The requested item was not found.
    #[error("Item not found: {item}")]
    NotFound { item: String },

    /// Hardware table is full.
    #[error("Table full: {table}")]
    TableFull { table: String },

    /// Object is in use and cannot be removed.
    #[error("Object in use: {object}")]
    ObjectInUse { object: String },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SaiError {
    /// Creates an error from a SAI status code.
    pub fn from_status(status: SaiStatus) -> Self {
        match status {
            SaiStatus::Success => SaiError::Internal {
                message: "from_status called with success status".to_string(),
            },
            SaiStatus::NotSupported | SaiStatus::NotImplemented => SaiError::NotSupported {
                feature: status.name().to_string(),
            },
            SaiStatus::InvalidParameter
            | SaiStatus::InvalidObjectType
            | SaiStatus::InvalidObjectId
            | SaiStatus::InvalidAttribute
            | SaiStatus::MandatoryAttributeMissing => SaiError::InvalidParameter {
                message: format!("SAI returned {}", status),
            },
            SaiStatus::ItemNotFound => SaiError::NotFound {
                item: status.name().to_string(),
            },
            SaiStatus::TableFull | SaiStatus::HwTableFull => SaiError::TableFull {
                table: status.name().to_string(),
            },
            SaiStatus::ObjectInUse => SaiError::ObjectInUse {
                object: status.name().to_string(),
            },
            _ => SaiError::Status { status },
        }
    }

    /// Creates an invalid parameter error with a message.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a not found error with an item description.
    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaiError::Status {
                status: SaiStatus::InsufficientResources
                    | SaiStatus::NoMemory
                    | SaiStatus::NotExecuted
            }
        )
    }
}

/// Result type for SAI operations.
pub type SaiResult<T> = Result<T, SaiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(SaiStatus::TableFull.to_string(), "SAI_STATUS_TABLE_FULL");
    }

    #[test]
    fn test_error_from_status() {
        assert!(matches!(
            SaiError::from_status(SaiStatus::ItemNotFound),
            SaiError::NotFound { .. }
        ));
        assert!(matches!(
            SaiError::from_status(SaiStatus::HwTableFull),
            SaiError::TableFull { .. }
        ));
        assert!(matches!(
            SaiError::from_status(SaiStatus::InsufficientResources),
            SaiError::Status { .. }
        ));
    }

    #[test]
    fn test_error_retryable() {
        assert!(SaiError::from_status(SaiStatus::NoMemory).is_retryable());
        assert!(!SaiError::from_status(SaiStatus::ObjectInUse).is_retryable());
    }
}
