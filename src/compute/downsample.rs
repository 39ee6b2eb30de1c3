//! Uniform index downsampling
//!
//! **Problem**: interactive views choke on 10^4+ point series.
//!
//! **Solution**: keep `cap` evenly spaced indices, always including the first
//! and last point, so the shape and both endpoints survive.
//!
//! The selection depends only on `(len, cap)`, so downsampling the same series
//! twice yields the same points.

/// Indices to keep when reducing `len` points to at most `cap`.
///
/// Returns `0..len` when `len <= cap`. Otherwise returns exactly `cap`
/// strictly increasing indices starting at 0 and ending at `len - 1`
/// (a single `0` when `cap == 1`).
#[must_use]
pub fn uniform_indices(len: usize, cap: usize) -> Vec<usize> {
    if len <= cap {
        return (0..len).collect();
    }
    match cap {
        0 => Vec::new(),
        1 => vec![0],
        // step = (len-1)/(cap-1) > 1, so floor(i * step) is strictly increasing
        _ => (0..cap).map(|i| i * (len - 1) / (cap - 1)).collect(),
    }
}

/// Pick `indices` out of `values`.
#[must_use]
pub fn select<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| values.get(i).cloned()).collect()
}
