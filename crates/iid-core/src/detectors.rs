// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{CancelToken, DetectError};

/// Per-observation decision emitted by a streaming detector.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// Zero-based position of the observation in the stream.
    pub index: usize,
    pub alert: bool,
    /// The observed value itself.
    pub raw_score: f64,
    pub p_value: f64,
    /// Running martingale; absent for detectors that do not accumulate evidence.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub martingale: Option<f64>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub alert_reason: Option<String>,
}

impl DetectionResult {
    /// Alert flag as the `0`/`1` integer used by tabular reports.
    pub fn alert_flag(&self) -> u8 {
        u8::from(self.alert)
    }
}

/// Streaming detector contract: one `score` call per observation, in order.
pub trait StreamDetector {
    type State: Clone + std::fmt::Debug;

    /// Stable identifier used in logs and reports.
    fn detector_id(&self) -> &'static str;

    fn reset(&mut self);

    /// Scores `value` against the current history and advances the stream.
    ///
    /// On error the detector state is left exactly as it was before the call.
    fn score(&mut self, value: f64) -> Result<DetectionResult, DetectError>;

    fn save_state(&self) -> Self::State;

    /// Restores a previously saved state after validating it against the
    /// detector's configuration.
    fn load_state(&mut self, state: &Self::State) -> Result<(), DetectError>;

    /// Default batched path implemented on top of `score`.
    ///
    /// Cancellation is polled before each observation; results scored before
    /// cancellation stay applied to the detector state.
    fn score_many(
        &mut self,
        values: &[f64],
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<DetectionResult>, DetectError> {
        let mut out = Vec::with_capacity(values.len());
        for &value in values {
            if let Some(token) = cancel {
                token.check()?;
            }
            out.push(self.score(value)?);
        }
        Ok(out)
    }
}

/// Indices of alerting results, in stream order.
pub fn alert_indices(results: &[DetectionResult]) -> Vec<usize> {
    results
        .iter()
        .filter(|result| result.alert)
        .map(|result| result.index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DetectionResult, StreamDetector, alert_indices};
    use crate::{CancelToken, DetectError};

    #[derive(Clone, Debug, PartialEq)]
    struct MockState {
        seen: usize,
    }

    struct ThresholdDetector {
        threshold: f64,
        state: MockState,
    }

    impl StreamDetector for ThresholdDetector {
        type State = MockState;

        fn detector_id(&self) -> &'static str {
            "mock_threshold"
        }

        fn reset(&mut self) {
            self.state = MockState { seen: 0 };
        }

        fn score(&mut self, value: f64) -> Result<DetectionResult, DetectError> {
            if !value.is_finite() {
                return Err(DetectError::invalid_observation("value must be finite"));
            }
            let index = self.state.seen;
            self.state.seen += 1;
            let alert = value > self.threshold;
            Ok(DetectionResult {
                index,
                alert,
                raw_score: value,
                p_value: if alert { 0.0 } else { 1.0 },
                martingale: None,
                alert_reason: alert.then(|| format!("value={value} > {}", self.threshold)),
            })
        }

        fn save_state(&self) -> Self::State {
            self.state.clone()
        }

        fn load_state(&mut self, state: &Self::State) -> Result<(), DetectError> {
            self.state = state.clone();
            Ok(())
        }
    }

    fn mock() -> ThresholdDetector {
        ThresholdDetector {
            threshold: 5.0,
            state: MockState { seen: 0 },
        }
    }

    #[test]
    fn score_many_preserves_order_and_indices() {
        let mut detector = mock();
        let results = detector
            .score_many(&[1.0, 9.0, 2.0, 7.0], None)
            .expect("score_many should succeed");
        let indices = results.iter().map(|r| r.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(alert_indices(&results), vec![1, 3]);
        assert_eq!(results[1].alert_flag(), 1);
        assert_eq!(results[0].alert_flag(), 0);
    }

    #[test]
    fn score_many_stops_on_first_error() {
        let mut detector = mock();
        let err = detector
            .score_many(&[1.0, f64::NAN, 2.0], None)
            .expect_err("NaN should fail");
        assert!(matches!(err, DetectError::InvalidObservation(_)));
        assert_eq!(detector.save_state().seen, 1);
    }

    #[test]
    fn score_many_honors_pre_cancelled_token() {
        let mut detector = mock();
        let token = CancelToken::new();
        token.cancel();
        let err = detector
            .score_many(&[1.0, 2.0], Some(&token))
            .expect_err("cancelled token should abort");
        assert_eq!(err, DetectError::Cancelled);
        assert_eq!(detector.save_state().seen, 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn absent_martingale_is_omitted_from_json() {
        let result = DetectionResult {
            index: 3,
            alert: false,
            raw_score: 10.0,
            p_value: 1.0,
            martingale: None,
            alert_reason: None,
        };
        let encoded = serde_json::to_string(&result).expect("result should serialize");
        assert!(!encoded.contains("martingale"));
        let decoded: DetectionResult =
            serde_json::from_str(&encoded).expect("result should deserialize");
        assert_eq!(decoded, result);
    }
}
