// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use iid_core::DetectError;
use std::collections::VecDeque;

/// p-value assigned to any deviation from a zero-spread window, and the
/// floor for every other p-value.
pub const DEGENERATE_P_VALUE: f64 = 1e-24;

/// Silverman's rule-of-thumb constant: `h = 1.06 * s * n^(-1/5)`.
const SILVERMAN_FACTOR: f64 = 1.06;

/// Bounded FIFO of the most recent observation values.
///
/// Holds only values seen before the point currently being scored.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Appends `value`, evicting the oldest entry once capacity is exceeded.
    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Arithmetic mean of the window.
    ///
    /// Summed in units of the largest magnitude so windows near `f64::MAX`
    /// do not overflow.
    pub fn mean(&self) -> Option<f64> {
        let scale = self.scale()?;
        if scale == 0.0 {
            return Some(0.0);
        }
        let sum: f64 = self.values.iter().map(|&w| w / scale).sum();
        Some(scale * (sum / self.values.len() as f64))
    }

    /// Two-sided empirical p-value of `x` against the window.
    ///
    /// A Gaussian-kernel estimate of the window's distribution function,
    /// with Silverman's bandwidth, gives the fraction of window mass on
    /// either side of `x`; the p-value is twice the smaller tail. This is a
    /// rank count with the step indicator smoothed, so it keeps falling as
    /// `x` moves past the window extremes instead of stopping at `1/n`.
    ///
    /// An empty window yields 1.0. A window whose values are all identical
    /// yields 1.0 for a repeat and [`DEGENERATE_P_VALUE`] for anything else.
    /// Every result lies in `[DEGENERATE_P_VALUE, 1.0]`.
    pub fn p_value(&self, x: f64) -> f64 {
        if self.values.is_empty() {
            return 1.0;
        }
        if let Some(constant) = self.constant_value() {
            return if x == constant {
                1.0
            } else {
                DEGENERATE_P_VALUE
            };
        }

        // Non-constant, so at least two values and a positive scale.
        let Some(scale) = self.scale() else {
            return 1.0;
        };
        let n = self.values.len() as f64;
        let x = x / scale;
        let mean = self.values.iter().map(|&w| w / scale).sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|&w| {
                let d = w / scale - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        let bandwidth = SILVERMAN_FACTOR * variance.sqrt() * n.powf(-0.2);
        if bandwidth.is_nan() || bandwidth <= 0.0 {
            // Spread lost to rounding: fall back to a range check.
            let (lo, hi) = self
                .values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &w| {
                    (lo.min(w / scale), hi.max(w / scale))
                });
            return if (lo..=hi).contains(&x) {
                1.0
            } else {
                DEGENERATE_P_VALUE
            };
        }

        let mut upper = 0.0;
        let mut lower = 0.0;
        for &w in &self.values {
            let w = w / scale;
            upper += normal_upper_tail((x - w) / bandwidth);
            lower += normal_upper_tail((w - x) / bandwidth);
        }
        let tail = (upper / n).min(lower / n);
        (2.0 * tail).clamp(DEGENERATE_P_VALUE, 1.0)
    }

    fn constant_value(&self) -> Option<f64> {
        let first = *self.values.front()?;
        self.values.iter().all(|&w| w == first).then_some(first)
    }

    fn scale(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().fold(0.0_f64, |acc, &w| acc.max(w.abs())))
    }

    pub(crate) fn validate(&self, expected_capacity: usize) -> Result<(), DetectError> {
        if self.capacity != expected_capacity {
            return Err(DetectError::invalid_input(format!(
                "history window capacity mismatch: state={}, config.history_length={}",
                self.capacity, expected_capacity
            )));
        }
        if self.values.len() > self.capacity {
            return Err(DetectError::invalid_input(format!(
                "history window holds {} values but capacity is {}",
                self.values.len(),
                self.capacity
            )));
        }
        if let Some((idx, value)) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, value)| !value.is_finite())
        {
            return Err(DetectError::invalid_input(format!(
                "history window value at position {idx} must be finite; got {value}"
            )));
        }
        Ok(())
    }
}

/// `P(Z > z)` for a standard normal `Z`.
fn normal_upper_tail(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Complementary error function, Abramowitz and Stegun 7.1.26.
///
/// Evaluated directly rather than as `1 - erf` so far tails stay positive.
fn erfc(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    if x.is_infinite() {
        return 0.0;
    }
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    poly * (-x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::{DEGENERATE_P_VALUE, HistoryWindow};

    fn window_of(capacity: usize, values: &[f64]) -> HistoryWindow {
        let mut window = HistoryWindow::new(capacity);
        for &value in values {
            window.push(value);
        }
        window
    }

    #[test]
    fn push_evicts_oldest_first() {
        let window = window_of(3, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(window.len(), 3);
        assert_eq!(window.values().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_window_is_neutral() {
        let window = HistoryWindow::new(4);
        assert_eq!(window.mean(), None);
        assert_eq!(window.p_value(123.0), 1.0);
    }

    #[test]
    fn constant_window_repeat_is_never_extreme() {
        let window = window_of(4, &[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(window.p_value(10.0), 1.0);
        assert_eq!(window.p_value(10.5), DEGENERATE_P_VALUE);
        assert_eq!(window.p_value(-1e9), DEGENERATE_P_VALUE);
    }

    #[test]
    fn constant_window_of_inexact_decimals_still_repeats_cleanly() {
        let window = window_of(5, &[0.1; 5]);
        assert_eq!(window.p_value(0.1), 1.0);
        assert_eq!(window.p_value(0.2), DEGENERATE_P_VALUE);
    }

    #[test]
    fn p_value_shrinks_with_distance_from_the_window() {
        let window = window_of(5, &[10.0, 10.0, 10.0, 10.0, 50.0]);
        assert!((window.p_value(50.0) - 0.2029).abs() < 1e-3);
        assert!((window.p_value(10.0) - 0.8007).abs() < 1e-3);
        assert_eq!(window.p_value(200.0), DEGENERATE_P_VALUE);
    }

    #[test]
    fn p_value_is_two_sided() {
        let window = window_of(4, &[9.0, 11.0, 9.0, 11.0]);
        let high = window.p_value(13.0);
        let low = window.p_value(7.0);
        assert!((high - low).abs() < 1e-12);
        assert!((high - 0.0155).abs() < 1e-3);
        assert_eq!(window.p_value(30.0), DEGENERATE_P_VALUE);
    }

    #[test]
    fn p_value_stays_in_unit_interval() {
        let window = window_of(6, &[3.0, -1.0, 4.0, 1.5, -9.0, 2.6]);
        for x in [-100.0, -9.0, 0.0, 1.0, 2.6, 50.0] {
            let p = window.p_value(x);
            assert!((DEGENERATE_P_VALUE..=1.0).contains(&p), "p={p} for x={x}");
        }
        assert!(window.p_value(1.0) > 0.9);
        assert!(window.p_value(-9.0) < window.p_value(0.0));
    }

    #[test]
    fn small_noisy_window_still_flags_a_far_outlier() {
        let window = window_of(
            9,
            &[100.0, 101.0, 102.0, 100.5, 101.5, 100.2, 101.8, 100.9, 101.1],
        );
        assert_eq!(window.p_value(1e9), DEGENERATE_P_VALUE);
        assert!(window.p_value(105.0) < 1e-6);
        assert!(window.p_value(101.0) > 0.95);
    }

    #[test]
    fn values_near_f64_max_do_not_overflow() {
        let window = window_of(3, &[1.7e308, 1.6e308, 1.5e308]);
        let mean = window.mean().expect("non-empty window has a mean");
        assert!(mean.is_finite());
        assert!((mean - 1.6e308).abs() < 1e294);
        assert!(window.p_value(1.6e308) > 0.99);
        assert_eq!(window.p_value(-1.7e308), DEGENERATE_P_VALUE);
    }

    #[test]
    fn validate_rejects_capacity_mismatch_and_non_finite_values() {
        let window = window_of(3, &[1.0, 2.0]);
        assert!(window.validate(3).is_ok());
        assert!(window.validate(4).is_err());

        let mut poisoned = window.clone();
        poisoned.values.push_back(f64::NAN);
        assert!(poisoned.validate(3).is_err());

        let mut overfull = HistoryWindow::new(2);
        overfull.values.extend([1.0, 2.0, 3.0]);
        assert!(overfull.validate(2).is_err());
    }
}
