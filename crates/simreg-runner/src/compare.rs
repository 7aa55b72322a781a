//! Tolerance-based equality of time series
//!
//! A new series is resampled onto the grid of the stored reference and
//! compared point by point. The error measure adds the absolute error and,
//! where the reference value is large enough, the relative error.

use crate::error::{Error, Result};
use crate::interpolate::{resample, time_grid};
use crate::reference::scientific;
use crate::result::{DEFAULT_POINTS, is_parameter};
use serde::Serialize;

/// Default pointwise tolerance
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// Largest accepted difference of the first and last time stamps
pub const TIME_TOLERANCE: f64 = 1e-3;

/// Variable suffixes that may collapse to a parameter in one library but not in another
const HEAT_PORT_SUFFIXES: [&str; 2] = ["heatPort.T", "heatPort.Q_flow"];

/// Outcome of comparing one variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    /// True if the series agree within tolerance
    pub equal: bool,
    /// Grid time of the largest error, if a pointwise check located one
    pub time_of_max_error: Option<f64>,
    /// Human-readable explanation for a mismatch
    pub message: Option<String>,
    /// Largest absolute error of the pointwise check
    pub max_absolute_error: f64,
    /// Largest relative error of the pointwise check
    pub max_relative_error: f64,
}

impl Comparison {
    fn equal() -> Self {
        Self {
            equal: true,
            time_of_max_error: None,
            message: None,
            max_absolute_error: 0.0,
            max_relative_error: 0.0,
        }
    }

    /// A mismatch without error magnitudes
    #[must_use]
    pub const fn mismatch(time_of_max_error: Option<f64>, message: String) -> Self {
        Self {
            equal: false,
            time_of_max_error,
            message: Some(message),
            max_absolute_error: 0.0,
            max_relative_error: 0.0,
        }
    }
}

/// Compares new results against stored references
///
/// A two-point series (a parameter) is broadcast as a constant when the
/// other side holds a full grid of `n_points` values. Variables ending in a
/// heat-port suffix are broadcast regardless of the other side's length.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonEngine {
    tolerance: f64,
    n_points: usize,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ComparisonEngine {
    /// Engine with pointwise tolerance `tolerance`
    #[must_use]
    pub const fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            n_points: DEFAULT_POINTS,
        }
    }

    /// Set the number of points of a full grid
    #[must_use]
    pub const fn with_points(mut self, n_points: usize) -> Self {
        self.n_points = n_points;
        self
    }

    /// Configured tolerance
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Compare the new series `(new_t, new_y)` against the reference `(old_t, old_y)`
    ///
    /// A time vector may either hold one stamp per value or only the first
    /// and the last stamp, in which case an evenly spaced grid is assumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interpolation`] if a time vector is empty or the new
    /// series cannot be resampled onto the reference grid.
    pub fn are_equal(
        &self,
        old_t: &[f64],
        old_y: &[f64],
        new_t: &[f64],
        new_y: &[f64],
        variable: &str,
    ) -> Result<Comparison> {
        let (Some(&old_start), Some(&old_end)) = (old_t.first(), old_t.last()) else {
            return Err(Error::Interpolation(format!("{variable}: empty reference time")));
        };
        let (Some(&new_start), Some(&new_end)) = (new_t.first(), new_t.last()) else {
            return Err(Error::Interpolation(format!("{variable}: empty result time")));
        };
        if old_y.is_empty() || new_y.is_empty() {
            return Err(Error::Interpolation(format!("{variable}: empty series")));
        }

        let start_differs = (old_start - new_start).abs() > TIME_TOLERANCE;
        let end_differs = (old_end - new_end).abs() > TIME_TOLERANCE;
        if start_differs || end_differs {
            let time = if end_differs {
                old_end.min(new_end)
            } else {
                old_start.min(new_start)
            };
            let which = if start_differs { "start" } else { "end" };
            return Ok(Comparison::mismatch(
                Some(time),
                format!(
                    "{variable}: Different {which} time between reference and test data.\n\
                     Old reference points are for {old_start} <= t <= {old_end}\n\
                     New reference points are for {new_start} <= t <= {new_end}"
                ),
            ));
        }

        if new_y.len() > 2 && new_y.len() < old_y.len() {
            return Ok(Comparison::mismatch(
                None,
                format!(
                    "{variable}: Fewer data points than reference results.\n\
                     len(yOld) = {}\n\
                     len(yNew) = {}\n\
                     Skipping error checking for this variable.",
                    old_y.len(),
                    new_y.len()
                ),
            ));
        }

        // Endpoints agree within tolerance; align them so resampling never clamps.
        let old_grid = aligned_grid(old_t, old_y.len(), new_start, new_end);
        let new_grid = aligned_grid(new_t, new_y.len(), new_start, new_end);

        let heat_port = HEAT_PORT_SUFFIXES.iter().any(|s| variable.ends_with(s));
        let (grid, reference, candidate): (Vec<f64>, Vec<f64>, Vec<f64>) =
            if old_y.len() == new_y.len() {
                (old_grid, old_y.to_vec(), new_y.to_vec())
            } else if is_parameter(new_y) && (heat_port || old_y.len() == self.n_points) {
                (old_grid, old_y.to_vec(), vec![new_y[0]; old_y.len()])
            } else if is_parameter(old_y) && new_y.len() == self.n_points {
                (new_grid, vec![old_y[0]; new_y.len()], new_y.to_vec())
            } else if is_parameter(old_y) || is_parameter(new_y) {
                return Ok(Comparison::mismatch(
                    None,
                    format!(
                        "{variable}: reference and result have different lengths.\n\
                         len(yOld) = {}\n\
                         len(yNew) = {}",
                        old_y.len(),
                        new_y.len()
                    ),
                ));
            } else {
                let resampled = resample(&old_grid, &new_grid, new_y).map_err(|e| {
                    Error::Interpolation(format!(
                        "{variable}: data series have different length \
                         (len(old) = {}, len(new) = {}): {e}",
                        old_y.len(),
                        new_y.len()
                    ))
                })?;
                (old_grid, old_y.to_vec(), resampled)
            };

        self.pointwise(&grid, &reference, &candidate, variable, is_parameter(new_y))
    }

    fn pointwise(
        &self,
        grid: &[f64],
        reference: &[f64],
        candidate: &[f64],
        variable: &str,
        parameter: bool,
    ) -> Result<Comparison> {
        let mut max_abs = 0.0_f64;
        let mut max_rel = 0.0_f64;
        let mut max_combined = 0.0_f64;
        let mut worst = 0;

        for (i, (old, new)) in reference.iter().zip(candidate).enumerate() {
            let abs = (old - new).abs();
            if abs.is_nan() {
                return Err(Error::Interpolation(format!(
                    "{variable}: NaN in error at index {i}"
                )));
            }
            let rel = if old.abs() > 10.0 * self.tolerance {
                abs / old.abs()
            } else {
                0.0
            };
            let combined = abs + rel;
            max_abs = max_abs.max(abs);
            max_rel = max_rel.max(rel);
            if combined > max_combined {
                max_combined = combined;
                worst = i;
            }
        }

        if max_combined <= self.tolerance {
            return Ok(Comparison::equal());
        }

        let time = grid.get(worst).copied();
        let mut message = format!(
            "{variable} has absolute and relative error = {}, {}.\n",
            scientific(max_abs, 3),
            scientific(max_rel, 3)
        );
        if parameter {
            message.push_str(&format!("             {variable} is a parameter."));
        } else if let Some(t) = time {
            message.push_str(&format!("             Maximum error is at t = {t}"));
        }
        Ok(Comparison {
            equal: false,
            time_of_max_error: time,
            message: Some(message),
            max_absolute_error: max_abs,
            max_relative_error: max_rel,
        })
    }
}

/// Stored time vector if it has one stamp per value, else an even grid
///
/// The endpoints are replaced by `start` and `end`.
fn aligned_grid(t: &[f64], n: usize, start: f64, end: f64) -> Vec<f64> {
    let mut grid = if t.len() == n {
        t.to_vec()
    } else {
        time_grid(t[0], t[t.len() - 1], n)
    };
    if let Some(first) = grid.first_mut() {
        *first = start;
    }
    if grid.len() > 1 {
        if let Some(last) = grid.last_mut() {
            *last = end;
        }
    }
    grid
}

/// Compare with the default tolerance
///
/// # Errors
///
/// See [`ComparisonEngine::are_equal`].
pub fn are_equal(
    old_t: &[f64],
    old_y: &[f64],
    new_t: &[f64],
    new_y: &[f64],
    variable: &str,
) -> Result<Comparison> {
    ComparisonEngine::default().are_equal(old_t, old_y, new_t, new_y, variable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_self_equal() {
        let t = time_grid(0.0, 1.0, 11);
        let y: Vec<f64> = t.iter().map(|v| v * v).collect();
        let cmp = are_equal(&t, &y, &t, &y, "x").unwrap();
        assert!(cmp.equal);
        assert!(cmp.time_of_max_error.is_none());
        assert!(cmp.message.is_none());
    }

    #[test]
    fn test_coarse_reference_against_fine_result() {
        let old_y: Vec<f64> = time_grid(0.0, 10.0, 11).iter().map(|t| 2.0 * t).collect();
        let new_t = time_grid(0.0, 10.0, 101);
        let new_y: Vec<f64> = new_t.iter().map(|t| 2.0 * t).collect();
        let cmp = are_equal(&[0.0, 10.0], &old_y, &new_t, &new_y, "x").unwrap();
        assert!(cmp.equal, "{:?}", cmp.message);
    }

    #[test]
    fn test_midpoint_perturbation_located() {
        let old_y: Vec<f64> = time_grid(0.0, 10.0, 11).iter().map(|t| 2.0 * t).collect();
        let new_t = time_grid(0.0, 10.0, 101);
        let mut new_y: Vec<f64> = new_t.iter().map(|t| 2.0 * t).collect();
        new_y[50] += 0.01;
        let cmp = are_equal(&[0.0, 10.0], &old_y, &new_t, &new_y, "x").unwrap();
        assert!(!cmp.equal);
        assert_eq!(cmp.time_of_max_error, Some(5.0));
        assert!(cmp.message.unwrap().contains("Maximum error is at t = 5"));
    }

    #[test]
    fn test_different_end_time() {
        let cmp = are_equal(&[0.0, 10.0], &[1.0, 1.0], &[0.0, 9.0], &[1.0, 1.0], "x").unwrap();
        assert!(!cmp.equal);
        assert_eq!(cmp.time_of_max_error, Some(9.0));
        assert!(cmp.message.unwrap().contains("Different end time"));
    }

    #[test]
    fn test_different_start_time() {
        let cmp = are_equal(&[1.0, 10.0], &[1.0, 1.0], &[0.0, 10.0], &[1.0, 1.0], "x").unwrap();
        assert!(!cmp.equal);
        assert_eq!(cmp.time_of_max_error, Some(0.0));
    }

    #[test]
    fn test_small_time_difference_tolerated() {
        let old_t = [0.0, 10.0];
        let new_t = [0.0, 10.0005];
        let cmp = are_equal(&old_t, &[3.0, 3.0], &new_t, &[3.0, 3.0], "k").unwrap();
        assert!(cmp.equal);
    }

    #[test]
    fn test_early_termination() {
        let old_y = vec![0.0; 101];
        let new_t = time_grid(0.0, 10.0, 50);
        let new_y = vec![0.0; 50];
        let cmp = are_equal(&[0.0, 10.0], &old_y, &new_t, &new_y, "x").unwrap();
        assert!(!cmp.equal);
        assert!(cmp.time_of_max_error.is_none());
        assert!(cmp.message.unwrap().contains("Fewer data points"));
    }

    #[test]
    fn test_parameter_changed() {
        let cmp = are_equal(&[0.0, 1.0], &[2.0, 2.0], &[0.0, 1.0], &[2.5, 2.5], "k").unwrap();
        assert!(!cmp.equal);
        assert!(cmp.message.unwrap().contains("k is a parameter"));
    }

    #[test]
    fn test_parameter_against_constant_series() {
        let old_y = vec![4.0; 101];
        let cmp = are_equal(&[0.0, 1.0], &old_y, &[0.0, 1.0], &[4.0, 4.0], "k").unwrap();
        assert!(cmp.equal);
    }

    #[test]
    fn test_reference_parameter_expanded() {
        let new_t = time_grid(0.0, 1.0, 101);
        let new_y = vec![4.0; 101];
        let cmp = are_equal(&[0.0, 1.0], &[4.0, 4.0], &new_t, &new_y, "k").unwrap();
        assert!(cmp.equal);
    }

    #[test]
    fn test_parameter_against_partial_grid_is_mismatch() {
        let old_y = vec![4.0; 50];
        let cmp = are_equal(&[0.0, 1.0], &old_y, &[0.0, 1.0], &[4.0, 4.0], "k").unwrap();
        assert!(!cmp.equal);
        assert!(cmp.message.unwrap().contains("different lengths"));
    }

    #[test]
    fn test_heat_port_broadcast_any_length() {
        let old_y = vec![300.0; 50];
        let cmp = are_equal(&[0.0, 1.0], &old_y, &[0.0, 1.0], &[300.0, 300.0], "vol.heatPort.Q_flow")
            .unwrap();
        assert!(cmp.equal);
    }

    #[test]
    fn test_heat_port_broadcast() {
        let old_y = vec![293.15; 101];
        let cmp = are_equal(
            &[0.0, 1.0],
            &old_y,
            &[0.0, 1.0],
            &[293.15, 300.0],
            "wall.heatPort.T",
        )
        .unwrap();
        // first value is broadcast, the second is ignored
        assert!(cmp.equal);
    }

    #[test]
    fn test_relative_error_only_for_large_values() {
        // |old| = 0.005 < 10 * tol: only the absolute error counts
        let cmp = are_equal(&[0.0, 1.0], &[0.005, 0.005], &[0.0, 1.0], &[0.0059, 0.0059], "x")
            .unwrap();
        assert!(cmp.equal);
        // |old| = 100: absolute 1e-3 plus relative 1e-5 lands just above tol
        let cmp = are_equal(&[0.0, 1.0], &[100.0, 100.0], &[0.0, 1.0], &[100.001, 100.001], "x")
            .unwrap();
        assert!(!cmp.equal);
    }

    #[test]
    fn test_configured_tolerance() {
        let engine = ComparisonEngine::new(0.1);
        let cmp = engine
            .are_equal(&[0.0, 1.0], &[1.0, 1.0], &[0.0, 1.0], &[1.01, 1.01], "x")
            .unwrap();
        assert!(cmp.equal);
        assert!((engine.tolerance() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_time_is_error() {
        assert!(are_equal(&[], &[1.0], &[0.0, 1.0], &[1.0, 1.0], "x").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_self_equality(values in proptest::collection::vec(-1e4f64..1e4, 3..101)) {
            let t = time_grid(0.0, 5.0, values.len());
            let cmp = are_equal(&[0.0, 5.0], &values, &t, &values, "x").unwrap();
            prop_assert!(cmp.equal);
        }

        #[test]
        fn prop_single_perturbation_located(
            values in proptest::collection::vec(-10.0f64..10.0, 5..60),
            idx_seed in 0usize..1000,
        ) {
            let n = values.len();
            let idx = idx_seed % n;
            let t = time_grid(0.0, 1.0, n);
            let mut perturbed = values.clone();
            perturbed[idx] += 1.0;
            let cmp = are_equal(&t, &values, &t, &perturbed, "x").unwrap();
            prop_assert!(!cmp.equal);
            prop_assert_eq!(cmp.time_of_max_error, Some(t[idx]));
        }
    }
}
