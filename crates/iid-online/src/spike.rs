// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::IidConfig;
use crate::window::HistoryWindow;
use iid_core::{DetectError, DetectionResult, StreamDetector};
use tracing::{debug, trace};

/// Stable detector identifier reported by [`StreamDetector::detector_id`].
pub const IID_SPIKE_DETECTOR_ID: &str = "iid_spike";

/// Serializable IID spike state for save/restore.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IidSpikeState {
    /// Number of observations scored so far.
    pub t: usize,
    pub window: HistoryWindow,
    pub alerts_emitted: usize,
}

impl IidSpikeState {
    fn new(history_length: usize) -> Self {
        Self {
            t: 0,
            window: HistoryWindow::new(history_length),
            alerts_emitted: 0,
        }
    }

    pub(crate) fn validate(&self, config: &IidConfig) -> Result<(), DetectError> {
        self.window.validate(config.history_length)?;
        if self.alerts_emitted > self.t {
            return Err(DetectError::invalid_input(format!(
                "IID spike state alerts_emitted={} exceeds t={}",
                self.alerts_emitted, self.t
            )));
        }
        Ok(())
    }
}

/// Flags single-point outliers against a trailing window of past values.
#[derive(Clone, Debug)]
pub struct IidSpikeDetector {
    config: IidConfig,
    warmup_len: usize,
    alert_p_value: f64,
    state: IidSpikeState,
}

impl IidSpikeDetector {
    pub fn new(config: IidConfig) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            warmup_len: config.warmup_len(),
            alert_p_value: config.alert_p_value(),
            state: IidSpikeState::new(config.history_length),
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

    pub fn state(&self) -> &IidSpikeState {
        &self.state
    }

    pub fn is_warming_up(&self) -> bool {
        self.state.window.len() < self.warmup_len
    }
}

impl StreamDetector for IidSpikeDetector {
    type State = IidSpikeState;

    fn detector_id(&self) -> &'static str {
        IID_SPIKE_DETECTOR_ID
    }

    fn reset(&mut self) {
        self.state = IidSpikeState::new(self.config.history_length);
    }

    fn score(&mut self, value: f64) -> Result<DetectionResult, DetectError> {
        if !value.is_finite() {
            return Err(DetectError::invalid_observation(format!(
                "IID spike observation at index {} must be finite; got {value}",
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
        let alert = !warming_up && p_value <= self.alert_p_value;

        self.state.window.push(value);
        self.state.t += 1;

        if warming_up && !self.is_warming_up() {
            trace!(
                detector = IID_SPIKE_DETECTOR_ID,
                index, "warm-up complete"
            );
        }

        if alert {
            self.state.alerts_emitted += 1;
            debug!(
                detector = IID_SPIKE_DETECTOR_ID,
                index, value, p_value, "spike alert"
            );
            if self.config.reset_on_alert {
                self.state.window.clear();
                debug!(
                    detector = IID_SPIKE_DETECTOR_ID,
                    index, "history cleared after alert"
                );
            }
        }

        Ok(DetectionResult {
            index,
            alert,
            raw_score: value,
            p_value,
            martingale: None,
            alert_reason: alert.then(|| {
                format!(
                    "p_value={p_value:.3e} <= {:.3e} (confidence={}%)",
                    self.alert_p_value, self.config.confidence
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
            detector = IID_SPIKE_DETECTOR_ID,
            t = state.t,
            window_len = state.window.len(),
            "state loaded"
        );
        Ok(())
    }
}
