// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::IidConfig;
use crate::window::HistoryWindow;
use iid_core::{DetectError, DetectionResult, StreamDetector};
use tracing::{debug, trace};

/// Stable detector identifier reported by [`StreamDetector::detector_id`].
pub const IID_CHANGEPOINT_DETECTOR_ID: &str = "iid_changepoint";

/// Exponent `ε` of the power martingale `∏ ε·p^(ε-1)`.
/// Must lie in `(0, 1)` for the betting function to be a p-value calibrator.
pub const POWER_MARTINGALE_EPSILON: f64 = 0.92;

/// Saturation bound for the log-martingale; `exp(±700)` stays finite and
/// strictly positive.
pub const LOG_MARTINGALE_LIMIT: f64 = 700.0;

/// Serializable IID change-point state for save/restore.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IidChangePointState {
    /// Number of observations scored so far.
    pub t: usize,
    pub window: HistoryWindow,
    /// Natural log of the running martingale; 0.0 means martingale 1.0.
    pub log_martingale: f64,
    pub alerts_emitted: usize,
}

impl IidChangePointState {
    fn new(history_length: usize) -> Self {
        Self {
            t: 0,
            window: HistoryWindow::new(history_length),
            log_martingale: 0.0,
            alerts_emitted: 0,
        }
    }

    pub fn martingale(&self) -> f64 {
        self.log_martingale.exp()
    }

    pub(crate) fn validate(&self, config: &IidConfig) -> Result<(), DetectError> {
        self.window.validate(config.history_length)?;
        if !self.log_martingale.is_finite() || self.log_martingale.abs() > LOG_MARTINGALE_LIMIT {
            return Err(DetectError::invalid_input(format!(
                "IID change-point state log_martingale must be finite and within +/-{LOG_MARTINGALE_LIMIT}; got {}",
                self.log_martingale
            )));
        }
        if self.alerts_emitted > self.t {
            return Err(DetectError::invalid_input(format!(
                "IID change-point state alerts_emitted={} exceeds t={}",
                self.alerts_emitted, self.t
            )));
        }
        Ok(())
    }
}

/// Flags persistent distribution shifts by accumulating a power martingale
/// over the same window p-values the spike detector uses.
#[derive(Clone, Debug)]
pub struct IidChangePointDetector {
    config: IidConfig,
    warmup_len: usize,
    martingale_threshold: f64,
    state: IidChangePointState,
}

impl IidChangePointDetector {
    pub fn new(config: IidConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            warmup_len: config.warmup_len(),
            martingale_threshold: config.martingale_threshold(),
            state: IidChangePointState::new(config.history_length),
            config,
        })
    }

    /// Builds a detector from the two required parameters, using defaults for
    /// everything else.
    pub fn with_params(history_length: usize, confidence: f64) -> Result<Self, DetectError> {
        Self::new(IidConfig::new(history_length, confidence))
    }

    pub fn config(&self) -> &IidConfig {
        &self.config
    }

    pub fn state(&self) -> &IidChangePointState {
        &self.state
    }

    pub fn martingale(&self) -> f64 {
        self.state.martingale()
    }

    pub fn martingale_threshold(&self) -> f64 {
        self.martingale_threshold
    }

    pub fn is_warming_up(&self) -> bool {
        self.state.window.len() < self.warmup_len
    }
}

/// One multiplicative martingale step in the log domain, saturated so the
/// exponentiated value stays finite and strictly positive.
fn next_log_martingale(log_martingale: f64, p_value: f64) -> f64 {
    let increment =
        POWER_MARTINGALE_EPSILON.ln() + (POWER_MARTINGALE_EPSILON - 1.0) * p_value.ln();
    (log_martingale + increment).clamp(-LOG_MARTINGALE_LIMIT, LOG_MARTINGALE_LIMIT)
}

impl StreamDetector for IidChangePointDetector {
    type State = IidChangePointState;

    fn detector_id(&self) -> &'static str {
        IID_CHANGEPOINT_DETECTOR_ID
    }

    fn reset(&mut self) {
        self.state = IidChangePointState::new(self.config.history_length);
    }

    fn score(&mut self, value: f64) -> Result<DetectionResult, DetectError> {
        if !value.is_finite() {
            return Err(DetectError::invalid_observation(format!(
                "IID change-point observation at index {} must be finite; got {value}",
                self.state.t
            )));
        }

        let index = self.state.t;
        let warming_up = self.is_warming_up();
        let p_value = if warming_up {
            1.0
        } else {
            self.state.window.p_value(value)
        };
        if !warming_up {
            self.state.log_martingale = next_log_martingale(self.state.log_martingale, p_value);
        }
        let martingale = self.state.martingale();
        let alert = !warming_up && martingale > self.martingale_threshold;

        self.state.window.push(value);
        self.state.t += 1;

        if warming_up && !self.is_warming_up() {
            trace!(
                detector = IID_CHANGEPOINT_DETECTOR_ID,
                index, "warm-up complete"
            );
        }

        if alert {
            self.state.alerts_emitted += 1;
            debug!(
                detector = IID_CHANGEPOINT_DETECTOR_ID,
                index, value, p_value, martingale, "change-point alert"
            );
            if self.config.reset_on_alert {
                self.state.log_martingale = 0.0;
                debug!(
                    detector = IID_CHANGEPOINT_DETECTOR_ID,
                    index, "martingale reset after alert"
                );
            }
        }

        Ok(DetectionResult {
            index,
            alert,
            raw_score: value,
            p_value,
            martingale: Some(martingale),
            alert_reason: alert.then(|| {
                format!(
                    "martingale={martingale:.4} > {:.4} (confidence={}%)",
                    self.martingale_threshold, self.config.confidence
                )
            }),
        })
    }

    fn save_state(&self) -> Self::State {
        self.state.clone()
    }

    fn load_state(&mut self, state: &Self::State) -> Result<(), DetectError> {
        state.validate(&self.config)?;
        self.state = state.clone();
        debug!(
            detector = IID_CHANGEPOINT_DETECTOR_ID,
            t = state.t,
            window_len = state.window.len(),
            martingale = state.martingale(),
            "state loaded"
        );
        Ok(())
    }
}
