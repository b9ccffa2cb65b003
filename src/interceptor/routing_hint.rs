// SPDX-License-Identifier: Apache-2.0

//! Routing Hint Filter
//!
//! Keeps reads on the primary for a while after a write so a client never
//! observes a replica that has not caught up with its own modification.
//! The window is open for the next `count` reads, and after that for as long
//! as the last write is younger than `time` seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use sqlgate_core::{
    Clock, ConnectionContext, FilterResult, Query, QueryClassifier, RoutingHint,
};

use super::matcher::PatternMatcher;
use super::params::{ParameterReader, PatternOptions};
use super::pipeline::{Downstream, Filter, FilterEnv, FilterSession};
use super::types::{FilterDefinition, FilterModule, RoutingHintStats};

const DEFAULT_TIME_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RoutingHintConfig {
    /// Reads hinted after each matched write
    pub count: u32,
    /// Seconds after a matched write during which reads are hinted
    pub time: u64,
    pub matcher: PatternMatcher,
}

impl RoutingHintConfig {
    pub fn from_definition(definition: &FilterDefinition) -> FilterResult<Self> {
        let mut params = ParameterReader::new(&definition.name, &definition.parameters);
        let options = PatternOptions::parse(&definition.name, &definition.options);

        let count = params.parse_or("count", 0u32)?;
        let time = params.parse_or("time", DEFAULT_TIME_WINDOW_SECS)?;
        let matcher = PatternMatcher::from_params(&mut params, &["exclude", "ignore"], options)?;
        params.finish();

        Ok(Self {
            count,
            time,
            matcher,
        })
    }

    fn window(&self) -> Duration {
        i64::try_from(self.time)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Default)]
struct Counters {
    data_modifications: AtomicU64,
    hints_by_count: AtomicU64,
    hints_by_time: AtomicU64,
}

pub struct RoutingHintFilter {
    name: String,
    config: RoutingHintConfig,
    classifier: Arc<dyn QueryClassifier>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl RoutingHintFilter {
    pub fn create(definition: &FilterDefinition, env: &FilterEnv) -> FilterResult<Self> {
        let config = RoutingHintConfig::from_definition(definition)?;
        debug!(
            "{}: count={} time={}s classifier={}",
            definition.name,
            config.count,
            config.time,
            env.classifier.name()
        );
        Ok(Self {
            name: definition.name.clone(),
            config,
            classifier: Arc::clone(&env.classifier),
            clock: Arc::clone(&env.clock),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &RoutingHintConfig {
        &self.config
    }

    pub fn stats(&self) -> RoutingHintStats {
        RoutingHintStats {
            data_modifications: self.counters.data_modifications.load(Ordering::Relaxed),
            hints_by_count: self.counters.hints_by_count.load(Ordering::Relaxed),
            hints_by_time: self.counters.hints_by_time.load(Ordering::Relaxed),
        }
    }
}

impl Filter for RoutingHintFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> FilterModule {
        FilterModule::RoutingHint
    }

    fn new_session(
        self: Arc<Self>,
        _ctx: &ConnectionContext,
    ) -> FilterResult<Box<dyn FilterSession>> {
        Ok(Box::new(RoutingHintSession {
            filter: self,
            hints_left: 0,
            last_write: None,
        }))
    }

    fn diagnostics(&self) -> String {
        let mut out = format!(
            "Configuration:\n\tCount: {}\n\tTime: {} seconds\n",
            self.config.count, self.config.time
        );
        if let Some(pattern) = self.config.matcher.include_pattern() {
            out.push_str(&format!("\tMatch regex: {}\n", pattern));
        }
        if let Some(pattern) = self.config.matcher.exclude_pattern() {
            out.push_str(&format!("\tExclude regex: {}\n", pattern));
        }
        let stats = self.stats();
        out.push_str("\nStatistics:\n");
        out.push_str(&format!(
            "\tNo. of data modifications: {}\n",
            stats.data_modifications
        ));
        out.push_str(&format!(
            "\tNo. of hints added based on count: {}\n",
            stats.hints_by_count
        ));
        out.push_str(&format!(
            "\tNo. of hints added based on time: {}\n",
            stats.hints_by_time
        ));
        out
    }
}

/// Which branch decided the fate of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Write that opened (or reopened) the window
    WindowOpened,
    /// Write rejected by the matcher
    WriteIgnored,
    HintedByCount,
    HintedByTime,
    NoHint,
}

pub struct RoutingHintSession {
    filter: Arc<RoutingHintFilter>,
    hints_left: u32,
    last_write: Option<DateTime<Utc>>,
}

impl RoutingHintSession {
    fn decide(&mut self, query: &mut Query, now: DateTime<Utc>) -> Decision {
        let filter = &self.filter;
        let classification = filter.classifier.classify(query);

        if !classification.operation.is_pure_read() {
            let passes = query
                .sql()
                .map(|sql| filter.config.matcher.passes(&sql))
                .unwrap_or(false);
            if !passes {
                return Decision::WriteIgnored;
            }
            self.hints_left = filter.config.count;
            self.last_write = Some(now);
            filter
                .counters
                .data_modifications
                .fetch_add(1, Ordering::Relaxed);
            return Decision::WindowOpened;
        }

        if self.hints_left > 0 {
            self.hints_left -= 1;
            filter.counters.hints_by_count.fetch_add(1, Ordering::Relaxed);
            return Decision::HintedByCount;
        }

        match self.last_write {
            Some(at) if now - at < filter.config.window() => {
                filter.counters.hints_by_time.fetch_add(1, Ordering::Relaxed);
                Decision::HintedByTime
            }
            _ => Decision::NoHint,
        }
    }

    pub fn hints_left(&self) -> u32 {
        self.hints_left
    }
}

impl FilterSession for RoutingHintSession {
    fn filter_name(&self) -> &str {
        &self.filter.name
    }

    fn route_query(&mut self, mut query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
        if query.is_sql() {
            let now = self.filter.clock.now();
            let decision = self.decide(&mut query, now);
            if matches!(decision, Decision::HintedByCount | Decision::HintedByTime) {
                query.add_hint(RoutingHint::RouteToPrimary);
            }
            trace!("{}: {:?}", self.filter.name, decision);
        }
        down.route_query(query)
    }

    fn diagnostics(&self) -> String {
        let last_write = self
            .last_write
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "{}\tHints left: {}\n\tLast data modification: {}\n",
            self.filter.diagnostics(),
            self.hints_left,
            last_write
        )
    }
}
