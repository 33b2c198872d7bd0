//! HIP error types

use crate::error::BenchError;
use thiserror::Error;

/// HIP error types
#[derive(Error, Debug, Clone)]
pub enum HipError {
    #[error("HIP initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Kernel loading failed: {0}")]
    KernelLoadFailed(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Device error: {0}")]
    DeviceError(String),
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

impl From<HipError> for BenchError {
    fn from(err: HipError) -> Self {
        match err {
            HipError::MemoryAllocationFailed(msg) => BenchError::AllocationFailed(msg),
            HipError::KernelLaunchFailed(msg) => BenchError::KernelLaunchFailed(msg),
            other => BenchError::HipError(other.to_string()),
        }
    }
}
