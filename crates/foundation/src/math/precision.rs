//! Precision policies.
//!
//! A deterministic float ordering used for sorting and keys, plus an
//! approximate equality helper for raster values.

use core::cmp::Ordering;

/// Canonicalize a floating-point value for deterministic ordering.
///
/// Rules:
/// - `-0.0` becomes `0.0`
/// - all NaNs become a single canonical NaN
pub fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        // Handles +0.0 and -0.0.
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Deterministic total ordering for floats.
///
/// Prefer this any time you sort floats or use them in ordered keys.
pub fn stable_total_cmp_f64(a: f64, b: f64) -> Ordering {
    canonical_f64(a).total_cmp(&canonical_f64(b))
}

/// Same-value test for raster cells: NaN equals NaN, `-0.0` equals `0.0`.
pub fn same_cell_value(a: f64, b: f64) -> bool {
    stable_total_cmp_f64(a, b) == Ordering::Equal
}
