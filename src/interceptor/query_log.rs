//! Query Log Filter
//!
//! Appends one line per matched statement to a per-session file named
//! `<filebase>.<session ordinal>`:
//!
//! ```text
//! 2024-05-01 12:00:00,bob@10.0.0.1,SELECT * FROM t WHERE a = 1
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, error};

use sqlgate_core::{Clock, ConnectionContext, FilterError, FilterResult, Query};

use super::matcher::PatternMatcher;
use super::params::{ClientFilter, ParameterReader, PatternOptions};
use super::pipeline::{Downstream, Filter, FilterEnv, FilterSession};
use super::types::{FilterDefinition, FilterModule, QueryLogStats};

#[derive(Debug, Clone)]
pub struct QueryLogConfig {
    pub filebase: String,
    pub matcher: PatternMatcher,
    pub clients: ClientFilter,
}

impl QueryLogConfig {
    pub fn from_definition(definition: &FilterDefinition) -> FilterResult<Self> {
        let mut params = ParameterReader::new(&definition.name, &definition.parameters);
        let options = PatternOptions::parse(&definition.name, &definition.options);

        let filebase = params.required("filebase")?;
        let matcher = PatternMatcher::from_params(&mut params, &["exclude"], options)?;
        let clients = ClientFilter::from_params(&mut params);
        params.finish();

        Ok(Self {
            filebase,
            matcher,
            clients,
        })
    }
}

#[derive(Default)]
struct Counters {
    sessions: AtomicU64,
    active_sessions: AtomicU64,
    lines_written: AtomicU64,
    write_failures: AtomicU64,
}

pub struct QueryLogFilter {
    name: String,
    config: QueryLogConfig,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl QueryLogFilter {
    pub fn create(definition: &FilterDefinition, env: &FilterEnv) -> FilterResult<Self> {
        Ok(Self {
            name: definition.name.clone(),
            config: QueryLogConfig::from_definition(definition)?,
            clock: Arc::clone(&env.clock),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &QueryLogConfig {
        &self.config
    }

    pub fn stats(&self) -> QueryLogStats {
        QueryLogStats {
            sessions: self.counters.sessions.load(Ordering::Relaxed),
            active_sessions: self.counters.active_sessions.load(Ordering::Relaxed),
            lines_written: self.counters.lines_written.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    fn describe_limits(&self, out: &mut String) {
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
    }
}

impl Filter for QueryLogFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> FilterModule {
        FilterModule::QueryLog
    }

    fn new_session(self: Arc<Self>, ctx: &ConnectionContext) -> FilterResult<Box<dyn FilterSession>> {
        let ordinal = self.counters.sessions.fetch_add(1, Ordering::Relaxed);
        let path = PathBuf::from(format!("{}.{}", self.config.filebase, ordinal));
        let active = self.config.clients.admits(ctx);

        let writer = if active {
            let file = open_log(&path).map_err(|e| {
                error!("{}: Opening output file '{}' failed: {}", self.name, path.display(), e);
                FilterError::io(&path, &e)
            })?;
            self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
            Some(BufWriter::new(file))
        } else {
            debug!("{}: session {} is inactive", self.name, ctx.session_id);
            None
        };

        Ok(Box::new(QueryLogSession {
            filter: self,
            identity: ctx.identity(),
            path,
            writer,
        }))
    }

    fn diagnostics(&self) -> String {
        let mut out = String::new();
        self.describe_limits(&mut out);
        out
    }
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub struct QueryLogSession {
    filter: Arc<QueryLogFilter>,
    identity: String,
    path: PathBuf,
    /// Present only while the session is active
    writer: Option<BufWriter<File>>,
}

impl QueryLogSession {
    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, at: DateTime<Utc>, sql: &str) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writeln!(
            writer,
            "{},{},{}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            self.identity,
            normalize(sql)
        )?;
        writer.flush()
    }
}

impl FilterSession for QueryLogSession {
    fn filter_name(&self) -> &str {
        &self.filter.name
    }

    fn route_query(&mut self, mut query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
        if self.is_active() {
            if let Some(sql) = query.sql() {
                if self.filter.config.matcher.passes(&sql) {
                    let now = self.filter.clock.now();
                    match self.append(now, &sql) {
                        Ok(()) => {
                            self.filter.counters.lines_written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.filter
                                .counters
                                .write_failures
                                .fetch_add(1, Ordering::Relaxed);
                            error!(
                                "{}: Writing to '{}' failed: {}",
                                self.filter.name,
                                self.path.display(),
                                e
                            );
                        }
                    }
                }
            }
        }
        down.route_query(query)
    }

    fn close(&mut self) -> FilterResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| FilterError::io(&self.path, &e))?;
        }
        Ok(())
    }

    fn diagnostics(&self) -> String {
        let mut out = String::new();
        if self.is_active() {
            out.push_str(&format!(
                "\t\tLogging to file            {}.\n",
                self.path.display()
            ));
        }
        self.filter.describe_limits(&mut out);
        out
    }
}

/// Trims and collapses whitespace runs to a single space
pub fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
