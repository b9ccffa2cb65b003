//! Interceptor Types
//!
//! Filter definitions as read from service configuration, and the
//! statistics snapshots filters expose for diagnostics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The filter implementation a definition refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterModule {
    /// Causal-consistency routing hints after writes
    #[serde(rename = "ccrfilter", alias = "routing_hint")]
    RoutingHint,
    /// Top-N slowest statements per session
    #[serde(rename = "topfilter", alias = "top_n")]
    TopN,
    /// Per-session query log
    #[serde(rename = "qlafilter", alias = "query_log")]
    QueryLog,
    /// Per-session statement counter
    #[serde(rename = "testfilter", alias = "query_counter")]
    QueryCounter,
}

impl FilterModule {
    pub fn module_name(&self) -> &'static str {
        match self {
            Self::RoutingHint => "ccrfilter",
            Self::TopN => "topfilter",
            Self::QueryLog => "qlafilter",
            Self::QueryCounter => "testfilter",
        }
    }

    /// One-line description shown in diagnostics
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoutingHint => {
                "A routing hint filter that sends queries to the primary after data modification"
            }
            Self::TopN => "A top N query logging filter",
            Self::QueryLog => "A simple query logging filter",
            Self::QueryCounter => "A simple query counting filter",
        }
    }
}

impl fmt::Display for FilterModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

/// One configured filter of a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefinition {
    /// Instance name, unique within a service
    pub name: String,
    pub module: FilterModule,
    /// Option words such as `case` or `extended`
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl FilterDefinition {
    pub fn new(name: impl Into<String>, module: FilterModule) -> Self {
        Self {
            name: name.into(),
            module,
            options: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }
}

/// Instance-wide routing hint counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingHintStats {
    /// Writes that opened a hint window
    pub data_modifications: u64,
    /// Reads hinted because the count window was open
    pub hints_by_count: u64,
    /// Reads hinted because the time window was open
    pub hints_by_time: u64,
}

/// Instance-wide top-N counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNStats {
    pub sessions: u64,
    pub statements_timed: u64,
    pub reports_written: u64,
}

/// Instance-wide query log counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogStats {
    pub sessions: u64,
    pub active_sessions: u64,
    pub lines_written: u64,
    pub write_failures: u64,
}
