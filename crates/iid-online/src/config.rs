// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use iid_core::DetectError;

/// Smallest history length that still yields a non-trivial reference window.
pub const MIN_HISTORY_LENGTH: usize = 2;

/// Shared configuration for the IID spike and change-point detectors.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IidConfig {
    /// Maximum number of past observations kept as the reference window.
    pub history_length: usize,
    /// Confidence level as a percentage in `(0, 100)`.
    pub confidence: f64,
    /// Fraction of `history_length` that must be filled before scoring starts.
    #[cfg_attr(feature = "serde", serde(default = "default_warmup_fraction"))]
    pub warmup_fraction: f64,
    /// Reset accumulated evidence after an alerting point.
    #[cfg_attr(feature = "serde", serde(default))]
    pub reset_on_alert: bool,
}

#[cfg(feature = "serde")]
fn default_warmup_fraction() -> f64 {
    1.0
}

impl Default for IidConfig {
    fn default() -> Self {
        Self {
            history_length: 10,
            confidence: 95.0,
            warmup_fraction: 1.0,
            reset_on_alert: false,
        }
    }
}

impl IidConfig {
    pub fn new(history_length: usize, confidence: f64) -> Self {
        Self {
            history_length,
            confidence,
            ..Self::default()
        }
    }

    pub fn with_warmup_fraction(mut self, warmup_fraction: f64) -> Self {
        self.warmup_fraction = warmup_fraction;
        self
    }

    pub fn with_reset_on_alert(mut self, reset_on_alert: bool) -> Self {
        self.reset_on_alert = reset_on_alert;
        self
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        if self.history_length < MIN_HISTORY_LENGTH {
            return Err(DetectError::invalid_configuration(format!(
                "history_length must be >= {MIN_HISTORY_LENGTH}; got {}",
                self.history_length
            )));
        }
        if !self.confidence.is_finite() || self.confidence <= 0.0 || self.confidence >= 100.0 {
            return Err(DetectError::invalid_configuration(format!(
                "confidence must be finite and in (0, 100); got {}",
                self.confidence
            )));
        }
        if !self.warmup_fraction.is_finite()
            || self.warmup_fraction <= 0.0
            || self.warmup_fraction > 1.0
        {
            return Err(DetectError::invalid_configuration(format!(
                "warmup_fraction must be finite and in (0, 1]; got {}",
                self.warmup_fraction
            )));
        }
        Ok(())
    }

    /// Number of history values required before a point is scored.
    pub fn warmup_len(&self) -> usize {
        let scaled = (self.history_length as f64 * self.warmup_fraction).ceil() as usize;
        scaled.clamp(1, self.history_length.max(1))
    }

    /// Spike alerts fire when the p-value is at or below this level.
    pub fn alert_p_value(&self) -> f64 {
        1.0 - self.confidence / 100.0
    }

    /// Change-point alerts fire when the martingale exceeds this value.
    pub fn martingale_threshold(&self) -> f64 {
        1.0 / self.alert_p_value()
    }
}

/// History length used for a series of `n` points when none is given: a
/// quarter of the series, never below [`MIN_HISTORY_LENGTH`].
pub fn history_length_for_series_len(n: usize) -> usize {
    (n / 4).max(MIN_HISTORY_LENGTH)
}
