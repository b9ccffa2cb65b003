// SPDX-License-Identifier: Apache-2.0

//! Filter Parameter Parsing
//!
//! Shared helpers for turning the raw `name = value` parameters and option
//! words of a filter definition into typed settings.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use tracing::warn;

use sqlgate_core::{ConnectionContext, FilterError, FilterResult};

/// Parameters understood by the service layer itself, never reported as unknown
const STANDARD_PARAMETERS: [&str; 3] = ["type", "module", "options"];

/// Reads typed values out of a parameter map, tracking which keys were used
pub struct ParameterReader<'a> {
    filter: &'a str,
    params: &'a BTreeMap<String, String>,
    consumed: BTreeSet<String>,
}

impl<'a> ParameterReader<'a> {
    pub fn new(filter: &'a str, params: &'a BTreeMap<String, String>) -> Self {
        Self {
            filter,
            params,
            consumed: BTreeSet::new(),
        }
    }

    pub fn filter(&self) -> &str {
        self.filter
    }

    /// Raw string value of a parameter
    pub fn string(&mut self, key: &str) -> Option<String> {
        let value = self.params.get(key)?;
        self.consumed.insert(key.to_string());
        Some(value.clone())
    }

    /// First present value among several accepted spellings
    pub fn string_any(&mut self, keys: &[&str]) -> Option<String> {
        let mut found = None;
        for key in keys {
            if let Some(value) = self.string(key) {
                if found.is_none() {
                    found = Some(value);
                }
            }
        }
        found
    }

    /// A parameter that must be present and non-empty
    pub fn required(&mut self, key: &str) -> FilterResult<String> {
        match self.string(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => {
                let err = FilterError::missing_parameter(self.filter, key);
                tracing::error!("{}", err);
                Err(err)
            }
        }
    }

    /// Parses a numeric (or otherwise `FromStr`) parameter
    pub fn parse<T: FromStr>(&mut self, key: &str) -> FilterResult<Option<T>> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        raw.trim().parse::<T>().map(Some).map_err(|_| {
            let err = FilterError::invalid_parameter(self.filter, key, raw.as_str());
            tracing::error!("{}", err);
            err
        })
    }

    pub fn parse_or<T: FromStr>(&mut self, key: &str, default: T) -> FilterResult<T> {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Logs every parameter that nothing consumed
    ///
    /// Unknown parameters are reported but do not invalidate the definition.
    pub fn finish(self) -> Vec<String> {
        let unknown: Vec<String> = self
            .params
            .keys()
            .filter(|key| !self.consumed.contains(*key))
            .filter(|key| !STANDARD_PARAMETERS.contains(&key.as_str()))
            .cloned()
            .collect();

        for key in &unknown {
            warn!("{}: Unexpected parameter '{}', ignoring it.", self.filter, key);
        }
        unknown
    }
}

/// Regex compilation flags selected by filter option words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternOptions {
    pub case_sensitive: bool,
    pub extended: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            extended: false,
        }
    }
}

impl PatternOptions {
    /// Interprets `ignorecase`, `case` and `extended`; anything else is
    /// logged and ignored
    pub fn parse(filter: &str, options: &[String]) -> Self {
        let mut parsed = Self::default();
        for option in options {
            match option.trim().to_ascii_lowercase().as_str() {
                "ignorecase" => parsed.case_sensitive = false,
                "case" => parsed.case_sensitive = true,
                "extended" => parsed.extended = true,
                "" => {}
                _ => warn!("{}: Unsupported option '{}', ignoring it.", filter, option),
            }
        }
        parsed
    }
}

/// Restricts a filter to connections from one address and/or one user
#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub source: Option<String>,
    pub user: Option<String>,
}

impl ClientFilter {
    pub fn from_params(params: &mut ParameterReader<'_>) -> Self {
        Self {
            source: params.string("source"),
            user: params.string("user"),
        }
    }

    /// Whether a session for this connection should be active
    ///
    /// A connection whose address or user is unknown is not excluded by
    /// that criterion.
    pub fn admits(&self, ctx: &ConnectionContext) -> bool {
        if let (Some(source), Some(remote)) = (&self.source, &ctx.remote) {
            if source != remote {
                return false;
            }
        }
        if let (Some(user), Some(name)) = (&self.user, &ctx.user) {
            if user != name {
                return false;
            }
        }
        true
    }
}
