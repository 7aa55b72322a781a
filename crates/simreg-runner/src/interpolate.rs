//! Time-grid resampling
//!
//! Simulators may emit the same time stamp more than once around events, and
//! the number of output points shifts when event locations move. Results are
//! therefore resampled onto a fixed grid before they are stored or compared.

use crate::error::{Error, Result};

/// Relative width (of the average step) under which two stamps are considered duplicates
const DUPLICATE_TOLERANCE: f64 = 1e-4;

/// `n` evenly spaced points from `t_min` to `t_max`, both inclusive
///
/// For `n == 1` the grid is `[t_min]`; for `n == 0` it is empty.
#[must_use]
pub fn time_grid(t_min: f64, t_max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![t_min],
        _ => {
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| t_min + (i as f64) / last * (t_max - t_min))
                .collect()
        }
    }
}

/// Resample `(source_time, source_values)` onto `target_grid`
///
/// Trailing stamps that do not advance time are dropped. Interior stamps
/// that lie within `1e-4` of the average step of their predecessor are moved
/// forward by ten times that amount when this keeps the series strictly
/// increasing, and dropped otherwise. The final stamp is never moved. Values
/// outside the source interval are clamped to the end values.
///
/// # Errors
///
/// Returns [`Error::Interpolation`] on NaN input or output, on a length
/// mismatch, on an empty source, or when the source or target time is not
/// strictly increasing.
pub fn resample(target_grid: &[f64], source_time: &[f64], source_values: &[f64]) -> Result<Vec<f64>> {
    if target_grid.iter().any(|v| v.is_nan()) {
        return Err(Error::Interpolation("NaN in target time grid".into()));
    }
    if source_time.iter().any(|v| v.is_nan()) {
        return Err(Error::Interpolation("NaN in time values of data".into()));
    }
    if source_values.iter().any(|v| v.is_nan()) {
        return Err(Error::Interpolation("NaN in function values of data".into()));
    }
    if source_time.len() != source_values.len() {
        return Err(Error::Interpolation(format!(
            "len(t) = {} but len(y) = {}, they must be equal",
            source_time.len(),
            source_values.len()
        )));
    }
    if source_time.is_empty() {
        return Err(Error::Interpolation("no data points".into()));
    }

    let (t, y) = remove_duplicate_stamps(source_time, source_values);

    if t.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Interpolation("Time t is not strictly increasing".into()));
    }
    if target_grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Interpolation(
            "Target time grid is not strictly increasing".into(),
        ));
    }

    let out: Vec<f64> = target_grid.iter().map(|&x| linear_at(&t, &y, x)).collect();
    if out.iter().any(|v| v.is_nan()) {
        return Err(Error::Interpolation("NaN in interpolation".into()));
    }
    Ok(out)
}

/// Drop trailing repeats and nudge interior near-duplicates forward
fn remove_duplicate_stamps(t: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    if t.len() == 1 {
        return (t.to_vec(), y.to_vec());
    }
    let mut i_max = t.len() - 1;
    let max_t = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_t = t.iter().copied().fold(f64::INFINITY, f64::min);
    let dt = (max_t - min_t) / i_max as f64;
    while i_max > 0 && t[i_max] <= t[i_max - 1] {
        i_max -= 1;
    }

    let t_tol = DUPLICATE_TOLERANCE * dt;
    let t_inc = 10.0 * t_tol;

    let mut t_new = Vec::with_capacity(i_max + 1);
    let mut y_new = Vec::with_capacity(i_max + 1);
    t_new.push(t[0]);
    y_new.push(y[0]);
    for i in 1..i_max {
        if t[i] > t[i - 1] + t_tol {
            t_new.push(t[i]);
            y_new.push(y[i]);
        } else if t[i] != t[i - 1] && t[i - 1] + t_inc < max_t && t[i - 1] + t_inc < t[i + 1] {
            t_new.push(t[i - 1] + t_inc);
            y_new.push(y[i]);
        }
    }
    if i_max > 0 {
        t_new.push(t[i_max]);
        y_new.push(y[i_max]);
    }
    (t_new, y_new)
}

/// Piecewise-linear value at `x`, clamped at both ends
fn linear_at(t: &[f64], y: &[f64], x: f64) -> f64 {
    let last = t.len() - 1;
    if x <= t[0] {
        return y[0];
    }
    if x >= t[last] {
        return y[last];
    }
    // first index with t[idx] > x; 1 <= idx <= last here
    let idx = t.partition_point(|&v| v <= x);
    let (t0, t1) = (t[idx - 1], t[idx]);
    let (y0, y1) = (y[idx - 1], y[idx]);
    y0 + (y1 - y0) * (x - t0) / (t1 - t0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-12, "{x} != {y}");
        }
    }

    #[test]
    fn test_time_grid_inclusive() {
        let g = time_grid(0.0, 10.0, 11);
        assert_eq!(g.len(), 11);
        assert_eq!(g[0], 0.0);
        assert_eq!(g[10], 10.0);
        assert!((g[5] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_grid_degenerate() {
        assert!(time_grid(0.0, 1.0, 0).is_empty());
        assert_eq!(time_grid(2.0, 3.0, 1), vec![2.0]);
    }

    #[test]
    fn test_identity_resample() {
        let t = time_grid(0.0, 1.0, 5);
        let y = vec![1.0, 3.0, 2.0, 5.0, 4.0];
        let out = resample(&t, &t, &y).unwrap();
        assert_close(&out, &y);
    }

    #[test]
    fn test_linear_midpoints() {
        let out = resample(&[0.5, 1.5], &[0.0, 1.0, 2.0], &[0.0, 10.0, 30.0]).unwrap();
        assert_close(&out, &[5.0, 20.0]);
    }

    #[test]
    fn test_clamps_outside_interval() {
        let out = resample(&[-1.0, 3.0], &[0.0, 1.0], &[2.0, 4.0]).unwrap();
        assert_close(&out, &[2.0, 4.0]);
    }

    #[test]
    fn test_trailing_duplicates_removed() {
        let t = [0.0, 1.0, 2.0, 2.0, 2.0];
        let y = [0.0, 1.0, 2.0, 9.0, 9.0];
        let out = resample(&[0.0, 1.0, 2.0], &t, &y).unwrap();
        assert_close(&out, &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_exact_interior_duplicate_dropped() {
        // event at t=1: the second sample is discarded
        let t = [0.0, 1.0, 1.0, 2.0];
        let y = [0.0, 1.0, 5.0, 5.0];
        let out = resample(&[0.0, 1.0, 2.0], &t, &y).unwrap();
        assert_close(&out, &[0.0, 1.0, 5.0]);
    }

    #[test]
    fn test_near_duplicate_nudged() {
        // average step 0.75, so 1e-6 apart lies inside the duplicate window
        let t = [0.0, 1.0, 1.000_001, 2.0, 3.0];
        let y = [0.0, 1.0, 2.0, 2.0, 2.0];
        let out = resample(&[1.00075, 1.001], &t, &y).unwrap();
        // nudged stamp sits at 1.00075 and carries the post-event value
        assert!((out[0] - 2.0).abs() < 1e-9);
        assert!((out[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_final_stamp_kept() {
        let t = [0.0, 0.5, 1.0];
        let y = [0.0, 0.5, 7.0];
        let out = resample(&[1.0], &t, &y).unwrap();
        assert_close(&out, &[7.0]);
    }

    #[test]
    fn test_nan_input_rejected() {
        assert!(resample(&[0.0, f64::NAN], &[0.0, 1.0], &[0.0, 1.0]).is_err());
        assert!(resample(&[0.0], &[0.0, f64::NAN], &[0.0, 1.0]).is_err());
        assert!(resample(&[0.0], &[0.0, 1.0], &[f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = resample(&[0.0], &[0.0, 1.0], &[1.0]).unwrap_err();
        assert!(err.to_string().contains("len(t) = 2"));
    }

    #[test]
    fn test_non_monotonic_target_rejected() {
        assert!(resample(&[0.0, 1.0, 0.5], &[0.0, 1.0], &[0.0, 1.0]).is_err());
    }

    #[test]
    fn test_non_monotonic_source_rejected() {
        assert!(resample(&[0.0], &[0.0, 2.0, 1.0, 3.0], &[0.0, 1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_single_point_source() {
        let out = resample(&[0.0, 1.0], &[0.5], &[3.0]).unwrap();
        assert_close(&out, &[3.0, 3.0]);
    }

    #[test]
    fn test_empty_source_rejected() {
        assert!(resample(&[0.0], &[], &[]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_identity_on_grid(
            values in proptest::collection::vec(-1e6f64..1e6, 2..60),
            t0 in -100.0f64..100.0,
            span in 0.1f64..1000.0,
        ) {
            let t = time_grid(t0, t0 + span, values.len());
            let out = resample(&t, &t, &values).unwrap();
            for (a, b) in out.iter().zip(&values) {
                prop_assert!((a - b).abs() <= 1e-9 * (1.0 + b.abs()));
            }
        }

        #[test]
        fn prop_output_within_source_bounds(
            values in proptest::collection::vec(-1e3f64..1e3, 2..40),
            n in 2usize..120,
        ) {
            let t = time_grid(0.0, 1.0, values.len());
            let grid = time_grid(0.0, 1.0, n);
            let out = resample(&grid, &t, &values).unwrap();
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for v in out {
                prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
            }
        }
    }
}
