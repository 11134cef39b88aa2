use super::DeviceSize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No block had room and no new block could be created.
    #[error("out of device memory")]
    OutOfMemory,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(DeviceSize),
    #[error("allocation size must be non-zero")]
    ZeroSize,
    #[error("invalid allocation handle: {0}")]
    InvalidHandle(&'static str),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl AllocError {
    /// Only running out of memory can be fixed by the caller, e.g. by evicting
    /// other resources and trying again. Everything else is a contract violation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AllocError::OutOfMemory)
    }
}

/// Returns `AllocError::ValidationFailed` from the enclosing function if the
/// condition does not hold.
macro_rules! ensure_valid {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::suballoc::AllocError::ValidationFailed(format!($($arg)*)));
        }
    };
}

pub(crate) use ensure_valid;
