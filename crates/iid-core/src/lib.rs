// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

//! Core shared types and traits for IID streaming detectors.

pub mod control;
pub mod detectors;
pub mod error;

pub use control::CancelToken;
pub use detectors::{DetectionResult, StreamDetector, alert_indices};
pub use error::DetectError;
