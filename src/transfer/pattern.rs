//! Reference data generation and output validation

use crate::error::{BenchError, BenchResult};
use crate::kernels::FILL_VALUE;

/// Value of element `i` of source `src_index` in the default pattern.
///
/// Small positive integers scaled per source, so sums stay exact in f32 and
/// differ between sources.
pub fn source_value(src_index: usize, i: usize) -> f32 {
    ((((i % 383) * 517) % 383 + 31) * (src_index + 1)) as f32
}

/// Generates the expected contents of sources and destinations
#[derive(Debug, Clone, Default)]
pub struct PatternGenerator {
    fill_pattern: Option<Vec<f32>>,
}

impl PatternGenerator {
    pub fn new(fill_pattern: Option<Vec<f32>>) -> Self {
        Self {
            fill_pattern: fill_pattern.filter(|p| !p.is_empty()),
        }
    }

    /// Contents of source `src_index` of a Transfer of `len` elements
    pub fn source(&self, src_index: usize, len: usize) -> Vec<f32> {
        match &self.fill_pattern {
            Some(pattern) => (0..len).map(|i| pattern[i % pattern.len()]).collect(),
            None => (0..len).map(|i| source_value(src_index, i)).collect(),
        }
    }

    /// Expected contents of every destination of a Transfer with `num_srcs` sources
    pub fn destination(&self, num_srcs: usize, len: usize) -> Vec<f32> {
        if num_srcs == 0 {
            return vec![FILL_VALUE; len];
        }

        let mut expected = self.source(0, len);
        for s in 1..num_srcs {
            let src = self.source(s, len);
            for (e, v) in expected.iter_mut().zip(&src) {
                *e += *v;
            }
        }
        expected
    }
}

/// First element that differs from the reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub actual: f32,
    pub expected: f32,
}

impl Mismatch {
    pub fn describe(&self) -> String {
        format!(
            "index {}: found {:.5} ({:08x}), expected {:.5} ({:08x})",
            self.index,
            self.actual,
            self.actual.to_bits(),
            self.expected,
            self.expected.to_bits()
        )
    }
}

/// Element-wise comparison; returns the first mismatch.
pub fn find_mismatch(actual: &[f32], expected: &[f32]) -> Option<Mismatch> {
    let len = actual.len().min(expected.len());
    if let Some(i) = (0..len).find(|&i| actual[i] != expected[i]) {
        return Some(Mismatch {
            index: i,
            actual: actual[i],
            expected: expected[i],
        });
    }
    // A length difference counts as a mismatch at the first missing element
    if actual.len() != expected.len() {
        return Some(Mismatch {
            index: len,
            actual: actual.get(len).copied().unwrap_or(f32::NAN),
            expected: expected.get(len).copied().unwrap_or(f32::NAN),
        });
    }
    None
}

/// What to do when a buffer does not match its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Return a validation error
    Abort,
    /// Log, mark the Transfer invalid and keep going
    Continue,
}

/// Compare `actual` with `expected`.
///
/// `Ok(true)` if they match, `Ok(false)` on a mismatch under
/// [`MismatchPolicy::Continue`], and an error under [`MismatchPolicy::Abort`].
/// `context` identifies the Transfer and buffer in the log and error message.
pub fn validate_buffer(
    actual: &[f32],
    expected: &[f32],
    policy: MismatchPolicy,
    context: &str,
) -> BenchResult<bool> {
    let Some(mismatch) = find_mismatch(actual, expected) else {
        return Ok(true);
    };

    let message = format!("{}: unexpected mismatch at {}", context, mismatch.describe());
    tracing::error!("{}", message);
    match policy {
        MismatchPolicy::Abort => Err(BenchError::ValidationMismatch(message)),
        MismatchPolicy::Continue => Ok(false),
    }
}
