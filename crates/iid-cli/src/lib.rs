// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use iid_core::{DetectError, DetectionResult, StreamDetector, alert_indices};
use iid_online::{IidChangePointDetector, IidConfig, IidSpikeDetector};
use serde::Serialize;
use std::fmt::Write as _;

/// Which detectors a run should execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorSelection {
    Spike,
    ChangePoint,
    Both,
}

/// Results of one detector over the full series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectorSection {
    pub alerts: Vec<usize>,
    pub results: Vec<DetectionResult>,
}

impl DetectorSection {
    fn from_results(results: Vec<DetectionResult>) -> Self {
        Self {
            alerts: alert_indices(&results),
            results,
        }
    }
}

/// Combined output of a detection run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionReport {
    pub config: IidConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spike: Option<DetectorSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changepoint: Option<DetectorSection>,
}

fn run_spike(values: &[f64], config: &IidConfig) -> Result<DetectorSection, DetectError> {
    let mut detector = IidSpikeDetector::new(config.clone())?;
    Ok(DetectorSection::from_results(
        detector.score_many(values, None)?,
    ))
}

fn run_changepoint(values: &[f64], config: &IidConfig) -> Result<DetectorSection, DetectError> {
    let mut detector = IidChangePointDetector::new(config.clone())?;
    Ok(DetectorSection::from_results(
        detector.score_many(values, None)?,
    ))
}

#[cfg(feature = "rayon")]
fn run_both(
    values: &[f64],
    config: &IidConfig,
) -> Result<(DetectorSection, DetectorSection), DetectError> {
    let (spike, changepoint) = rayon::join(
        || run_spike(values, config),
        || run_changepoint(values, config),
    );
    Ok((spike?, changepoint?))
}

#[cfg(not(feature = "rayon"))]
fn run_both(
    values: &[f64],
    config: &IidConfig,
) -> Result<(DetectorSection, DetectorSection), DetectError> {
    Ok((run_spike(values, config)?, run_changepoint(values, config)?))
}

/// Runs the selected detectors over `values`, each with its own fresh state.
pub fn run_detectors(
    values: &[f64],
    config: &IidConfig,
    selection: DetectorSelection,
) -> Result<DetectionReport, DetectError> {
    config.validate()?;
    let (spike, changepoint) = match selection {
        DetectorSelection::Both => {
            let (spike, changepoint) = run_both(values, config)?;
            (Some(spike), Some(changepoint))
        }
        DetectorSelection::Spike => (Some(run_spike(values, config)?), None),
        DetectorSelection::ChangePoint => (None, Some(run_changepoint(values, config)?)),
    };

    Ok(DetectionReport {
        config: config.clone(),
        spike,
        changepoint,
    })
}

/// Formats `value` in .NET `E2` style: two mantissa decimals and a signed,
/// three-digit exponent (`1.00E+000`, `3.33E-001`).
pub fn format_exponent_e2(value: f64) -> String {
    let rendered = format!("{value:.2e}");
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return rendered;
    };
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}E{sign}{:03}", exponent.unsigned_abs())
}

/// Renders the spike section as `alert\tscore\tp-value` rows.
pub fn render_spike_section(out: &mut String, results: &[DetectionResult]) {
    out.push_str("Spike Detection:\n");
    for result in results {
        let _ = write!(
            out,
            "{}\t{:.2}\t{}",
            result.alert_flag(),
            result.raw_score,
            format_exponent_e2(result.p_value)
        );
        if result.alert {
            out.push_str("  <-- Spike detected");
        }
        out.push('\n');
    }
    out.push('\n');
}

/// Renders the change-point section as `alert\tscore\tp-value\tmartingale` rows.
pub fn render_changepoint_section(out: &mut String, results: &[DetectionResult]) {
    out.push_str("Detect Persistent changes in pattern\n");
    out.push_str("Alert\tScore\tP-Value\tMartingale value\n");
    for result in results {
        let _ = write!(
            out,
            "{}\t{:.2}\t{:.2}\t{:.2}",
            result.alert_flag(),
            result.raw_score,
            result.p_value,
            result.martingale.unwrap_or(f64::NAN)
        );
        if result.alert {
            out.push_str("  <-- alert is on, predicted changepoint");
        }
        out.push('\n');
    }
    out.push('\n');
}

/// Renders every section present in `report` in tabular text form.
pub fn render_text_report(report: &DetectionReport) -> String {
    let mut out = String::new();
    if let Some(spike) = &report.spike {
        render_spike_section(&mut out, &spike.results);
    }
    if let Some(changepoint) = &report.changepoint {
        render_changepoint_section(&mut out, &changepoint.results);
    }
    out
}
