// SPDX-License-Identifier: Apache-2.0

//! Top-N Filter
//!
//! Times every matched statement from request to first reply and keeps the
//! slowest N per session. When the session closes a ranked report is written
//! to `<filebase>.<session ordinal>`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use sqlgate_core::{
    Clock, ConnectionContext, FilterError, FilterResult, Query, Reply,
};

use super::matcher::PatternMatcher;
use super::params::{ClientFilter, ParameterReader, PatternOptions};
use super::pipeline::{Downstream, Filter, FilterEnv, FilterSession, Upstream};
use super::ranking::{Offer, TopRanking};
use super::types::{FilterDefinition, FilterModule, TopNStats};

const DEFAULT_REPORT_SIZE: usize = 10;

/// Largest accepted report size
pub const MAX_REPORT_SIZE: usize = 10_000;

const TABLE_RULE: &str =
    "-----+------------+------------------------------------------------------";

#[derive(Debug, Clone)]
pub struct TopNConfig {
    pub report_size: usize,
    pub filebase: String,
    pub matcher: PatternMatcher,
    pub clients: ClientFilter,
}

impl TopNConfig {
    pub fn from_definition(definition: &FilterDefinition) -> FilterResult<Self> {
        let mut params = ParameterReader::new(&definition.name, &definition.parameters);
        let options = PatternOptions::parse(&definition.name, &definition.options);

        let report_size = params.parse_or("count", DEFAULT_REPORT_SIZE)?;
        if report_size == 0 || report_size > MAX_REPORT_SIZE {
            let err =
                FilterError::invalid_parameter(&definition.name, "count", report_size.to_string());
            error!("{}", err);
            return Err(err);
        }
        let filebase = params.required("filebase")?;
        let matcher = PatternMatcher::from_params(&mut params, &["exclude"], options)?;
        let clients = ClientFilter::from_params(&mut params);
        params.finish();

        Ok(Self {
            report_size,
            filebase,
            matcher,
            clients,
        })
    }
}

pub struct TopNFilter {
    name: String,
    config: TopNConfig,
    clock: Arc<dyn Clock>,
    sessions: AtomicU64,
    statements_timed: AtomicU64,
    reports_written: AtomicU64,
}

impl TopNFilter {
    pub fn create(definition: &FilterDefinition, env: &FilterEnv) -> FilterResult<Self> {
        let config = TopNConfig::from_definition(definition)?;
        Ok(Self {
            name: definition.name.clone(),
            config,
            clock: Arc::clone(&env.clock),
            sessions: AtomicU64::new(0),
            statements_timed: AtomicU64::new(0),
            reports_written: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &TopNConfig {
        &self.config
    }

    pub fn stats(&self) -> TopNStats {
        TopNStats {
            sessions: self.sessions.load(Ordering::Relaxed),
            statements_timed: self.statements_timed.load(Ordering::Relaxed),
            reports_written: self.reports_written.load(Ordering::Relaxed),
        }
    }
}

impl Filter for TopNFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> FilterModule {
        FilterModule::TopN
    }

    fn new_session(self: Arc<Self>, ctx: &ConnectionContext) -> FilterResult<Box<dyn FilterSession>> {
        let ordinal = self.sessions.fetch_add(1, Ordering::Relaxed);
        let report_path = PathBuf::from(format!("{}.{}", self.config.filebase, ordinal));
        let active = self.config.clients.admits(ctx);
        let ranking = TopRanking::new(self.config.report_size);

        let report = if active {
            match File::create(&report_path) {
                Ok(file) => Some(file),
                Err(e) => {
                    error!(
                        "{}: Opening report file '{}' failed: {}",
                        self.name,
                        report_path.display(),
                        e
                    );
                    return Err(FilterError::io(&report_path, &e));
                }
            }
        } else {
            debug!("{}: session {} is inactive", self.name, ctx.session_id);
            None
        };

        let identity = (ctx.user.is_some() || ctx.remote.is_some()).then(|| ctx.identity());
        let connected = self.clock.now();

        Ok(Box::new(TopNSession {
            filter: self,
            active,
            report_path,
            report,
            identity,
            ranking,
            pending: None,
            statements: 0,
            total: Duration::zero(),
            connected,
        }))
    }

    fn diagnostics(&self) -> String {
        let mut out = format!("\t\tReport size            {}\n", self.config.report_size);
        if let Some(ref source) = self.config.clients.source {
            out.push_str(&format!(
                "\t\tLimit logging to connections from  {}\n",
                source
            ));
        }
        if let Some(ref user) = self.config.clients.user {
            out.push_str(&format!("\t\tLimit logging to user      {}\n", user));
        }
        if let Some(pattern) = self.config.matcher.include_pattern() {
            out.push_str(&format!("\t\tInclude queries that match     {}\n", pattern));
        }
        if let Some(pattern) = self.config.matcher.exclude_pattern() {
            out.push_str(&format!("\t\tExclude queries that match     {}\n", pattern));
        }
        out
    }
}

struct PendingStatement {
    sql: String,
    started: DateTime<Utc>,
}

pub struct TopNSession {
    filter: Arc<TopNFilter>,
    active: bool,
    report_path: PathBuf,
    /// Open while the report has not been written
    report: Option<File>,
    identity: Option<String>,
    ranking: TopRanking,
    pending: Option<PendingStatement>,
    statements: u64,
    total: Duration,
    connected: DateTime<Utc>,
}

impl TopNSession {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn ranking(&self) -> &TopRanking {
        &self.ranking
    }

    /// Renders the session report as of `ended`
    pub fn render_report(&self, ended: DateTime<Utc>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Top {} longest running queries in session.\n",
            self.filter.config.report_size
        ));
        out.push_str("==========================================\n\n");
        out.push_str("Rank | Time (sec) | Query\n");
        out.push_str(TABLE_RULE);
        out.push('\n');
        for (rank, entry) in self.ranking.entries().enumerate() {
            out.push_str(&format!(
                "{:>4} | {:>10} | {}\n",
                rank + 1,
                format_seconds(entry.duration),
                entry.sql
            ));
        }
        out.push_str(TABLE_RULE);
        out.push_str("\n\n");

        out.push_str(&format!(
            "Session started {}\n",
            self.connected.format("%a %b %e %H:%M:%S %Y")
        ));
        if let Some(ref identity) = self.identity {
            out.push_str(&format!("Client          {}\n", identity));
        }

        let average = match i32::try_from(self.statements) {
            Ok(n) if n > 0 => self.total / n,
            _ => Duration::zero(),
        };
        out.push_str(&format!(
            "\nTotal of {} statements timed.\n",
            self.statements
        ));
        out.push_str(&format!(
            "Total statement execution time   {} seconds\n",
            format_seconds(self.total)
        ));
        out.push_str(&format!(
            "Average statement execution time {} seconds\n",
            format_seconds(average)
        ));
        out.push_str(&format!(
            "Total connection time            {} seconds\n",
            format_seconds(ended - self.connected)
        ));
        out
    }
}

impl FilterSession for TopNSession {
    fn filter_name(&self) -> &str {
        &self.filter.name
    }

    fn route_query(&mut self, mut query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
        if self.active {
            if let Some(sql) = query.sql() {
                if self.filter.config.matcher.passes(&sql) {
                    self.pending = Some(PendingStatement {
                        sql,
                        started: self.filter.clock.now(),
                    });
                }
            }
        }
        down.route_query(query)
    }

    fn wants_replies(&self) -> bool {
        true
    }

    fn client_reply(&mut self, reply: Reply, up: &mut dyn Upstream) -> FilterResult<()> {
        if let Some(pending) = self.pending.take() {
            let elapsed = truncate_to_micros(self.filter.clock.now() - pending.started);
            self.statements += 1;
            self.total = self.total + elapsed;
            self.filter.statements_timed.fetch_add(1, Ordering::Relaxed);

            if let Offer::Evicted(old) = self.ranking.offer(elapsed, pending.sql) {
                debug!(
                    "{}: '{}' dropped out of the top {}",
                    self.filter.name, old.sql, self.filter.config.report_size
                );
            }
        }
        up.client_reply(reply)
    }

    fn close(&mut self) -> FilterResult<()> {
        let Some(mut file) = self.report.take() else {
            return Ok(());
        };
        let report = self.render_report(self.filter.clock.now());
        file.write_all(report.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                error!(
                    "{}: Writing report '{}' failed: {}",
                    self.filter.name,
                    self.report_path.display(),
                    e
                );
                FilterError::io(&self.report_path, &e)
            })?;
        self.filter.reports_written.fetch_add(1, Ordering::Relaxed);
        info!(
            "{}: wrote top {} report to {}",
            self.filter.name,
            self.filter.config.report_size,
            self.report_path.display()
        );
        Ok(())
    }

    fn diagnostics(&self) -> String {
        let mut out = self.filter.diagnostics();
        if !self.active {
            return out;
        }
        out.push_str(&format!(
            "\t\tLogging to file {}.\n",
            self.report_path.display()
        ));
        out.push_str(&format!(
            "\t\tCurrent Top {}:\n",
            self.filter.config.report_size
        ));
        for (rank, entry) in self.ranking.entries().enumerate() {
            out.push_str(&format!("\t\t{} place:\n", rank + 1));
            out.push_str(&format!(
                "\t\t\tExecution time: {} seconds\n",
                format_seconds(entry.duration)
            ));
            out.push_str(&format!("\t\t\tSQL: {}\n", entry.sql));
        }
        out
    }
}

fn truncate_to_micros(elapsed: Duration) -> Duration {
    if elapsed < Duration::zero() {
        return Duration::zero();
    }
    elapsed
        .num_microseconds()
        .map(Duration::microseconds)
        .unwrap_or(elapsed)
}

/// Seconds with millisecond precision, truncated
fn format_seconds(duration: Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    format!("{}.{:03}", millis / 1000, millis % 1000)
}
