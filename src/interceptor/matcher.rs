// SPDX-License-Identifier: Apache-2.0

//! Pattern Matcher
//!
//! Compiled include/exclude regular-expression pair shared by every filter
//! that gates on statement text.

use regex::{Regex, RegexBuilder};
use tracing::error;

use sqlgate_core::{FilterError, FilterResult};

use super::params::{ParameterReader, PatternOptions};

/// Include/exclude pattern pair
///
/// A statement passes when it matches the include pattern (if any) and does
/// not match the exclude pattern (if any).
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    include: Option<Regex>,
    exclude: Option<Regex>,
    options: PatternOptions,
}

impl PatternMatcher {
    /// Compiles both patterns; a malformed pattern is a configuration error
    pub fn new(
        include: Option<&str>,
        exclude: Option<&str>,
        options: PatternOptions,
    ) -> FilterResult<Self> {
        Ok(Self {
            include: include
                .map(|p| compile("match", p, options))
                .transpose()?,
            exclude: exclude
                .map(|p| compile("exclude", p, options))
                .transpose()?,
            options,
        })
    }

    /// Matcher that lets every statement through
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Reads `match` and the first present exclude spelling from a definition
    pub fn from_params(
        params: &mut ParameterReader<'_>,
        exclude_keys: &[&str],
        options: PatternOptions,
    ) -> FilterResult<Self> {
        let include = params.string("match");
        let exclude = params.string_any(exclude_keys);
        Self::new(include.as_deref(), exclude.as_deref(), options).map_err(|e| {
            error!("{}: {}", params.filter(), e);
            e
        })
    }

    pub fn passes(&self, statement: &str) -> bool {
        if let Some(ref include) = self.include {
            if !include.is_match(statement) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(statement) {
                return false;
            }
        }
        true
    }

    pub fn include_pattern(&self) -> Option<&str> {
        self.include.as_ref().map(Regex::as_str)
    }

    pub fn exclude_pattern(&self) -> Option<&str> {
        self.exclude.as_ref().map(Regex::as_str)
    }

    pub fn options(&self) -> PatternOptions {
        self.options
    }
}

fn compile(parameter: &str, pattern: &str, options: PatternOptions) -> FilterResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!options.case_sensitive)
        .ignore_whitespace(options.extended)
        .build()
        .map_err(|e| FilterError::invalid_pattern(parameter, pattern, e.to_string()))
}
