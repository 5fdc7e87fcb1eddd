// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::fmt;

/// Error type shared by every IID detector operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectError {
    /// Detector construction rejected a configuration value.
    InvalidConfiguration(String),
    /// A single observation could not be scored; detector state is unchanged.
    InvalidObservation(String),
    /// Malformed saved state or caller-supplied input.
    InvalidInput(String),
    /// I/O, clock, or counter limits were hit.
    ResourceLimit(String),
    /// Cooperative cancellation was observed.
    Cancelled,
}

impl DetectError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn invalid_observation(msg: impl Into<String>) -> Self {
        Self::InvalidObservation(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn resource_limit(msg: impl Into<String>) -> Self {
        Self::ResourceLimit(msg.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    /// Stable machine-readable code for structured error output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::InvalidObservation(_) => "invalid_observation",
            Self::InvalidInput(_) => "invalid_input",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::InvalidObservation(msg) => write!(f, "invalid observation: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::ResourceLimit(msg) => write!(f, "resource limit: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for DetectError {}
