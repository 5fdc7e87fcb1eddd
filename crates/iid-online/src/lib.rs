// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Streaming IID spike and change-point detectors.
//!
//! Both detectors score each observation against a bounded FIFO window of
//! earlier values. [`IidSpikeDetector`] alerts on individual outliers;
//! [`IidChangePointDetector`] feeds the same p-values into a power martingale
//! and alerts on persistent shifts.

pub mod changepoint;
pub mod config;
pub mod spike;
pub mod window;

pub use changepoint::{
    IID_CHANGEPOINT_DETECTOR_ID, IidChangePointDetector, IidChangePointState,
    LOG_MARTINGALE_LIMIT, POWER_MARTINGALE_EPSILON,
};
pub use config::{IidConfig, MIN_HISTORY_LENGTH, history_length_for_series_len};
pub use spike::{IID_SPIKE_DETECTOR_ID, IidSpikeDetector, IidSpikeState};
pub use window::{DEGENERATE_P_VALUE, HistoryWindow};
