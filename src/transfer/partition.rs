//! Sub-executor partitioning
//!
//! A Transfer's element range is split into `S` contiguous chunks, each a
//! multiple of the alignment granularity except possibly the last used one.
//! Trailing sub-executors receive empty chunks when the range is too small to
//! give every one of them at least one granule.

use serde::Serialize;

/// Slice of a Transfer processed by one sub-executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubExecutorUnit {
    /// Elements processed
    pub count: usize,
    /// First element, relative to the start of every source and destination
    pub offset: usize,
    /// XCC the unit should execute on, if any
    pub preferred_xcc: Option<i32>,
    /// Hardware cycle counter at block start (written by the executor)
    pub start_cycle: i64,
    /// Hardware cycle counter at block end (written by the executor)
    pub stop_cycle: i64,
}

impl SubExecutorUnit {
    pub fn end(&self) -> usize {
        self.offset + self.count
    }
}

/// Split `num_elements` into exactly `num_sub_execs` units aligned to
/// `align_elements`.
pub fn partition(num_elements: usize, num_sub_execs: usize, align_elements: usize) -> Vec<SubExecutorUnit> {
    let align = align_elements.max(1);
    let max_usable = div_ceil(num_elements, align).min(num_sub_execs);

    let mut units = Vec::with_capacity(num_sub_execs);
    let mut assigned = 0usize;
    for i in 0..num_sub_execs {
        let left = max_usable.saturating_sub(i);
        let remaining = num_elements - assigned;
        let count = if left > 0 {
            remaining.min(div_ceil(remaining, align) / left * align)
        } else {
            0
        };

        units.push(SubExecutorUnit {
            count,
            offset: assigned,
            ..Default::default()
        });
        assigned += count;
    }

    debug_assert_eq!(assigned, num_elements);
    tracing::trace!(
        "partition: {} elements -> {} units (granule {}, {} used)",
        num_elements,
        num_sub_execs,
        align,
        max_usable
    );
    units
}

/// Pin every unit to one XCC.
pub fn assign_preferred_xcc(units: &mut [SubExecutorUnit], xcc: i32) {
    for unit in units {
        unit.preferred_xcc = Some(xcc);
    }
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}
