//! Host copy/reduce kernel
//!
//! Every destination receives the element-wise sum of all sources, added in
//! source order so results are bit-identical to the reference pattern.
//! Without sources, destinations are filled with [`FILL_VALUE`].

use super::params::{BlockParams, FILL_VALUE};
use std::slice;

/// Elements reduced per inner pass; keeps the accumulator in L1.
const CHUNK: usize = 1024;

/// Reduce `n` elements from `srcs` into every pointer of `dsts`.
///
/// # Safety
///
/// Every source must be valid for `n` reads and every destination for `n`
/// writes. Destinations must not overlap sources or each other.
pub unsafe fn reduce_range(srcs: &[*const f32], dsts: &[*mut f32], n: usize) {
    if n == 0 {
        return;
    }

    match srcs {
        [] => {
            for &dst in dsts {
                slice::from_raw_parts_mut(dst, n).fill(FILL_VALUE);
            }
        }
        [src] => {
            for &dst in dsts {
                std::ptr::copy_nonoverlapping(*src, dst, n);
            }
        }
        [first, rest @ ..] => {
            let mut acc = [0.0f32; CHUNK];
            let mut base = 0;
            while base < n {
                let len = CHUNK.min(n - base);
                let acc = &mut acc[..len];
                acc.copy_from_slice(slice::from_raw_parts(first.add(base), len));
                for &src in rest {
                    let s = slice::from_raw_parts(src.add(base), len);
                    for (a, v) in acc.iter_mut().zip(s) {
                        *a += *v;
                    }
                }
                for &dst in dsts {
                    slice::from_raw_parts_mut(dst.add(base), len).copy_from_slice(acc);
                }
                base += len;
            }
        }
    }
}

/// Execute the data movement described by one block.
///
/// # Safety
///
/// Same requirements as [`reduce_range`] for the pointers stored in `params`.
pub unsafe fn reduce_block(params: &BlockParams) {
    reduce_range(params.srcs(), params.dsts(), params.n as usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_source_copies() {
        let src: Vec<f32> = (0..3000).map(|i| i as f32).collect();
        let mut d0 = vec![0.0f32; 3000];
        let mut d1 = vec![0.0f32; 3000];
        unsafe {
            reduce_range(&[src.as_ptr()], &[d0.as_mut_ptr(), d1.as_mut_ptr()], src.len());
        }
        assert_eq!(d0, src);
        assert_eq!(d1, src);
    }

    #[test]
    fn test_multi_source_sums_across_chunks() {
        let n = CHUNK * 2 + 17;
        let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..n).map(|i| (2 * i) as f32).collect();
        let c = vec![0.5f32; n];
        let mut dst = vec![0.0f32; n];
        unsafe {
            reduce_range(&[a.as_ptr(), b.as_ptr(), c.as_ptr()], &[dst.as_mut_ptr()], n);
        }
        for i in 0..n {
            assert_eq!(dst[i], a[i] + b[i] + c[i], "mismatch at {}", i);
        }
    }

    #[test]
    fn test_no_sources_fills() {
        let mut dst = vec![1.0f32; 10];
        unsafe {
            reduce_range(&[], &[dst.as_mut_ptr()], 7);
        }
        assert!(dst[..7].iter().all(|&v| v == FILL_VALUE));
        assert_eq!(dst[7], 1.0);
    }

    #[test]
    fn test_reduce_block_uses_params() {
        let src = vec![4.0f32; 64];
        let mut dst = vec![0.0f32; 64];
        let params = unsafe { BlockParams::new(16, &[src.as_ptr().add(8)], &[dst.as_mut_ptr().add(8)], None) };
        unsafe { reduce_block(&params) };
        assert!(dst[..8].iter().all(|&v| v == 0.0));
        assert!(dst[8..24].iter().all(|&v| v == 4.0));
        assert!(dst[24..].iter().all(|&v| v == 0.0));
    }
}
