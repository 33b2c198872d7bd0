//! Memory domain and executor identifiers
//!
//! Both are written as a kind character followed by an index, e.g. `G0`
//! (device 0 standard memory) or `C1` (pinned memory on NUMA node 1).

use crate::error::{BenchError, BenchResult};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Kind of memory a Transfer endpoint lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MemoryKind {
    /// Pinned, coherent host memory
    HostPinned,
    /// Pinned, non-coherent ("fine") host memory
    HostFine,
    /// Unpinned host memory bound to a NUMA node
    HostUnpinned,
    /// Standard device memory
    Device,
    /// Fine-grained device memory
    DeviceFine,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 5] = [
        MemoryKind::HostPinned,
        MemoryKind::HostFine,
        MemoryKind::HostUnpinned,
        MemoryKind::Device,
        MemoryKind::DeviceFine,
    ];

    pub fn as_char(&self) -> char {
        match self {
            MemoryKind::HostPinned => 'C',
            MemoryKind::HostFine => 'B',
            MemoryKind::HostUnpinned => 'U',
            MemoryKind::Device => 'G',
            MemoryKind::DeviceFine => 'F',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(MemoryKind::HostPinned),
            'B' => Some(MemoryKind::HostFine),
            'U' => Some(MemoryKind::HostUnpinned),
            'G' => Some(MemoryKind::Device),
            'F' => Some(MemoryKind::DeviceFine),
            _ => None,
        }
    }

    /// Host kinds are indexed by NUMA node, device kinds by device.
    pub fn is_host(&self) -> bool {
        matches!(
            self,
            MemoryKind::HostPinned | MemoryKind::HostFine | MemoryKind::HostUnpinned
        )
    }

    pub fn is_device(&self) -> bool {
        !self.is_host()
    }
}

/// A memory kind together with its (logical) NUMA node or device index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryDomain {
    pub kind: MemoryKind,
    pub index: usize,
}

impl MemoryDomain {
    pub const fn new(kind: MemoryKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub const fn host(node: usize) -> Self {
        Self::new(MemoryKind::HostPinned, node)
    }

    pub const fn device(index: usize) -> Self {
        Self::new(MemoryKind::Device, index)
    }

    pub fn is_host(&self) -> bool {
        self.kind.is_host()
    }

    pub fn is_device(&self) -> bool {
        self.kind.is_device()
    }
}

impl fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.as_char(), self.index)
    }
}

impl FromStr for MemoryDomain {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        let (c, index) = split_token(s)?;
        let kind = MemoryKind::from_char(c)
            .ok_or_else(|| BenchError::ParseError(format!("{}: unknown memory type '{}'", s, c)))?;
        Ok(MemoryDomain::new(kind, index))
    }
}

impl Serialize for MemoryDomain {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Resource that performs a Transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExecutorKind {
    /// Host threads pinned to a NUMA node
    HostThreads,
    /// Compute kernel grid on a device
    DeviceKernel,
    /// Copy (DMA) engine of a device
    DeviceDma,
}

impl ExecutorKind {
    pub fn as_char(&self) -> char {
        match self {
            ExecutorKind::HostThreads => 'C',
            ExecutorKind::DeviceKernel => 'G',
            ExecutorKind::DeviceDma => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(ExecutorKind::HostThreads),
            'G' => Some(ExecutorKind::DeviceKernel),
            'D' => Some(ExecutorKind::DeviceDma),
            _ => None,
        }
    }

    pub fn is_device(&self) -> bool {
        !matches!(self, ExecutorKind::HostThreads)
    }
}

/// An executor kind together with its (logical) NUMA node or device index
///
/// Ordering (kind first, then index) decides executor grouping and report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Executor {
    pub kind: ExecutorKind,
    pub index: usize,
}

impl Executor {
    pub const fn new(kind: ExecutorKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub const fn kernel(device: usize) -> Self {
        Self::new(ExecutorKind::DeviceKernel, device)
    }

    pub const fn dma(device: usize) -> Self {
        Self::new(ExecutorKind::DeviceDma, device)
    }

    pub const fn host(node: usize) -> Self {
        Self::new(ExecutorKind::HostThreads, node)
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.as_char(), self.index)
    }
}

impl FromStr for Executor {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        let (c, index) = split_token(s)?;
        let kind = ExecutorKind::from_char(c)
            .ok_or_else(|| BenchError::ParseError(format!("{}: unknown executor type '{}'", s, c)))?;
        Ok(Executor::new(kind, index))
    }
}

impl Serialize for Executor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parse a list of memory domains such as `"G0G1"`, `"G0,C1"` or `"N"` (none).
pub fn parse_domain_list(s: &str) -> BenchResult<Vec<MemoryDomain>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("n") || s.is_empty() {
        return Ok(Vec::new());
    }

    let mut domains = Vec::new();
    let mut chars = s.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c == ',' || c.is_whitespace() {
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = i + d.len_utf8();
            chars.next();
        }
        domains.push(s[start..end].parse()?);
    }
    Ok(domains)
}

fn split_token(s: &str) -> BenchResult<(char, usize)> {
    let s = s.trim();
    let mut chars = s.chars();
    let c = chars
        .next()
        .ok_or_else(|| BenchError::ParseError("empty token".to_string()))?;
    let digits = chars.as_str();
    let index = digits
        .parse::<usize>()
        .map_err(|_| BenchError::ParseError(format!("{}: missing or invalid index", s)))?;
    Ok((c, index))
}
