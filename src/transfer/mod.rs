//! Transfer descriptions, partitioning and reference data

pub mod descriptor;
pub mod partition;
pub mod pattern;
pub mod types;

pub use descriptor::{SystemTopology, TransferSpec, ELEMENT_BYTES};
pub use partition::{assign_preferred_xcc, partition, SubExecutorUnit};
pub use pattern::{find_mismatch, source_value, validate_buffer, Mismatch, MismatchPolicy, PatternGenerator};
pub use types::{parse_domain_list, Executor, ExecutorKind, MemoryDomain, MemoryKind};
