//! Unified error handling for transferbench
//!
//! Every layer of the crate reports failures through [`BenchError`]. Errors are
//! grouped into categories that decide how a measurement session reacts:
//! - Configuration errors (rejected before any memory is allocated)
//! - Allocation errors (zero-size requests, unsupported memory, misplaced pages)
//! - Accessibility errors (peer access between devices impossible)
//! - Validation errors (destination data does not match the reference)
//! - Backend errors (HIP runtime, NUMA syscalls, kernel launches)
//! - Internal errors (bugs, poisoned locks, panicked workers)

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for transferbench
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    // ========== Configuration Errors ==========
    /// Invalid run-wide configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A Transfer description violates an invariant
    #[error("Invalid transfer #{index}: {reason}")]
    InvalidTransfer { index: usize, reason: String },

    /// A logical NUMA node or device index does not exist
    #[error("{what} index {index} out of range (only {count} available)")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        count: usize,
    },

    /// Endpoint or executor token could not be parsed
    #[error("Unable to parse '{0}'")]
    ParseError(String),

    // ========== Allocation Errors ==========
    /// Zero-byte allocation requested
    #[error("Unable to allocate memory: requested size is 0 bytes")]
    ZeroSizeAllocation,

    /// Memory kind not supported by the active platform
    #[error("Unsupported memory: {0}")]
    UnsupportedMemory(String),

    /// Allocator reported a failure
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A page of a host allocation is not resident on the requested NUMA node
    #[error("Page {page} is located on NUMA node {actual} instead of node {expected}")]
    PagePlacement {
        page: usize,
        expected: usize,
        actual: i32,
    },

    // ========== Accessibility Errors ==========
    /// Device cannot access a peer device's memory
    #[error("Unable to enable peer access from device {device} to device {peer}")]
    PeerAccessUnavailable { device: usize, peer: usize },

    // ========== Validation Errors ==========
    /// Output data differs from the reference pattern
    #[error("Validation failed: {0}")]
    ValidationMismatch(String),

    // ========== Backend Errors ==========
    /// HIP/ROCm backend error
    #[error("HIP error: {0}")]
    HipError(String),

    /// Kernel launch failed
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// NUMA policy or affinity syscall failed
    #[error("NUMA error: {0}")]
    NumaError(String),

    // ========== I/O Errors ==========
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// An executor worker thread panicked
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl BenchError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            BenchError::InvalidConfiguration(_)
            | BenchError::InvalidTransfer { .. }
            | BenchError::IndexOutOfRange { .. }
            | BenchError::ParseError(_) => ErrorCategory::Configuration,

            BenchError::ZeroSizeAllocation
            | BenchError::UnsupportedMemory(_)
            | BenchError::AllocationFailed(_)
            | BenchError::PagePlacement { .. } => ErrorCategory::Allocation,

            BenchError::PeerAccessUnavailable { .. } => ErrorCategory::Accessibility,

            BenchError::ValidationMismatch(_) => ErrorCategory::Validation,

            BenchError::HipError(_) | BenchError::KernelLaunchFailed(_) | BenchError::NumaError(_) => {
                ErrorCategory::Backend
            }

            BenchError::IoError(_)
            | BenchError::InternalError(_)
            | BenchError::LockPoisoned(_)
            | BenchError::WorkerPanicked(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error was caused by the caller's input
    ///
    /// Configuration errors are raised before any resource is acquired, so the
    /// caller can fix the Transfer list and retry.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Configuration)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid Transfer description or engine configuration
    Configuration,
    /// Memory could not be allocated or placed
    Allocation,
    /// Peer access between devices impossible
    Accessibility,
    /// Output data mismatch
    Validation,
    /// GPU runtime or OS failure
    Backend,
    /// Bug or unexpected state
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Allocation => write!(f, "Allocation"),
            ErrorCategory::Accessibility => write!(f, "Accessibility"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for BenchError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BenchError::LockPoisoned(err.to_string())
    }
}

// Helper type alias for Results using BenchError
pub type BenchResult<T> = std::result::Result<T, BenchError>;

// ========== Helper Macros ==========

/// Create a configuration error with context
///
/// # Examples
/// ```ignore
/// return Err(config_error!("block_bytes must be a multiple of 4, got {}", bytes));
/// ```
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::BenchError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::BenchError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::BenchError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::BenchError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Create a backend error with context
#[macro_export]
macro_rules! backend_error {
    ($msg:expr) => {
        $crate::error::BenchError::HipError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::BenchError::HipError(format!($fmt, $($arg)*))
    };
}

/// Wrap an IO error with context
///
/// # Examples
/// ```ignore
/// let list = fs::read_to_string(path).map_err(|e| io_context(e, "reading cpulist"))?;
/// ```
pub fn io_context(err: std::io::Error, msg: &str) -> BenchError {
    BenchError::IoError(std::io::Error::new(err.kind(), format!("{}: {}", msg, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            BenchError::InvalidTransfer {
                index: 0,
                reason: "no endpoints".to_string()
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            BenchError::IndexOutOfRange {
                what: "GPU",
                index: 4,
                count: 2
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(BenchError::ZeroSizeAllocation.category(), ErrorCategory::Allocation);
        assert_eq!(
            BenchError::PagePlacement {
                page: 3,
                expected: 0,
                actual: 1
            }
            .category(),
            ErrorCategory::Allocation
        );
        assert_eq!(
            BenchError::PeerAccessUnavailable { device: 0, peer: 1 }.category(),
            ErrorCategory::Accessibility
        );
        assert_eq!(
            BenchError::ValidationMismatch("idx 3".to_string()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            BenchError::HipError("test".to_string()).category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            BenchError::WorkerPanicked("boom".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_is_configuration_error() {
        assert!(config_error!("bad").is_configuration_error());
        assert!(BenchError::ParseError("X0".to_string()).is_configuration_error());
        assert!(!BenchError::ZeroSizeAllocation.is_configuration_error());
        assert!(!internal_error!("bug").is_configuration_error());
    }

    #[test]
    fn test_error_display() {
        let err = BenchError::IndexOutOfRange {
            what: "GPU",
            index: 4,
            count: 2,
        };
        assert_eq!(err.to_string(), "GPU index 4 out of range (only 2 available)");

        let err = BenchError::PeerAccessUnavailable { device: 0, peer: 3 };
        assert_eq!(
            err.to_string(),
            "Unable to enable peer access from device 0 to device 3"
        );

        let err = config_error!("value: {}", 42);
        assert_eq!(err.to_string(), "Invalid configuration: value: 42");
    }

    #[test]
    fn test_macros() {
        assert!(matches!(internal_error!("bug"), BenchError::InternalError(_)));
        assert!(matches!(backend_error!("hipMalloc"), BenchError::HipError(_)));
        assert!(matches!(
            backend_error!("code {}", 2),
            BenchError::HipError(ref msg) if msg == "code 2"
        ));
    }

    #[test]
    fn test_io_context_helper() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "cpulist");
        let err = io_context(io_err, "reading node topology");
        assert!(matches!(err, BenchError::IoError(_)));
        assert!(err.to_string().contains("reading node topology"));
        assert!(err.is_internal_error());
    }

    #[test]
    fn test_poison_error_from_impl_exists() {
        use std::sync::PoisonError;

        fn convert_poison<T>(err: PoisonError<T>) -> BenchError {
            BenchError::from(err)
        }

        let _ = convert_poison::<i32> as fn(PoisonError<i32>) -> BenchError;
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Configuration.to_string(), "Configuration");
        assert_eq!(ErrorCategory::Accessibility.to_string(), "Accessibility");
        assert_eq!(ErrorCategory::Validation.to_string(), "Validation");
    }
}
