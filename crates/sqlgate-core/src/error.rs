// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the query pipeline
//!
//! Configuration problems, session setup failures and chain wiring mistakes
//! all map onto this one enum so the service layer can report them uniformly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all pipeline operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum FilterError {
    #[error("Invalid configuration for {filter}: {message}")]
    Config { filter: String, message: String },

    #[error("Invalid regular expression '{pattern}' for the '{parameter}' parameter: {message}")]
    InvalidPattern {
        parameter: String,
        pattern: String,
        message: String,
    },

    #[error("{filter}: no '{parameter}' parameter defined")]
    MissingParameter { filter: String, parameter: String },

    #[error("{filter}: invalid value '{value}' for parameter '{parameter}'")]
    InvalidParameter {
        filter: String,
        parameter: String,
        value: String,
    },

    #[error("Session setup failed for {filter}: {message}")]
    SessionSetup { filter: String, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Filter chain is not wired: {message}")]
    NotWired { message: String },

    #[error("Filter chain already wired: {message}")]
    AlreadyWired { message: String },

    #[error("{filter} forwarded {count} times, expected exactly once")]
    ForwardingViolation { filter: String, count: usize },
}

impl FilterError {
    pub fn config(filter: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            filter: filter.into(),
            message: msg.into(),
        }
    }

    pub fn invalid_pattern(
        parameter: impl Into<String>,
        pattern: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::InvalidPattern {
            parameter: parameter.into(),
            pattern: pattern.into(),
            message: msg.into(),
        }
    }

    pub fn missing_parameter(filter: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::MissingParameter {
            filter: filter.into(),
            parameter: parameter.into(),
        }
    }

    pub fn invalid_parameter(
        filter: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            filter: filter.into(),
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn session_setup(filter: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SessionSetup {
            filter: filter.into(),
            message: msg.into(),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn not_wired(msg: impl Into<String>) -> Self {
        Self::NotWired { message: msg.into() }
    }

    pub fn already_wired(msg: impl Into<String>) -> Self {
        Self::AlreadyWired { message: msg.into() }
    }

    pub fn forwarding_violation(filter: impl Into<String>, count: usize) -> Self {
        Self::ForwardingViolation {
            filter: filter.into(),
            count,
        }
    }

    /// Returns true for errors raised while reading filter configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidPattern { .. }
                | Self::MissingParameter { .. }
                | Self::InvalidParameter { .. }
        )
    }
}

/// Result type alias for pipeline operations
pub type FilterResult<T> = Result<T, FilterError>;
