//! ROCm/HIP backend
//!
//! Device memory, copy engines and the transfer kernel on AMD GPUs.

pub mod device;
pub mod device_context;
pub mod error;
pub mod event;
pub mod ffi;
pub mod memory;
pub mod module;
pub mod platform;
pub mod stream;

pub use error::{HipError, HipResult};
pub use event::HipEvent;
pub use module::{HipKernel, HipModule};
pub use platform::{HipPlatform, HipTimedStream};
pub use stream::HipStream;
