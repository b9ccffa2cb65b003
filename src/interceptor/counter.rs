//! Query counting filter, the smallest complete pipeline stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sqlgate_core::{ConnectionContext, FilterResult, Query};

use super::params::ParameterReader;
use super::pipeline::{Downstream, Filter, FilterEnv, FilterSession};
use super::types::{FilterDefinition, FilterModule};

pub struct QueryCounterFilter {
    name: String,
    sessions: AtomicU64,
    statements: AtomicU64,
}

impl QueryCounterFilter {
    pub fn create(definition: &FilterDefinition, _env: &FilterEnv) -> FilterResult<Self> {
        ParameterReader::new(&definition.name, &definition.parameters).finish();
        Ok(Self {
            name: definition.name.clone(),
            sessions: AtomicU64::new(0),
            statements: AtomicU64::new(0),
        })
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// SQL statements seen across all sessions
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }
}

impl Filter for QueryCounterFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> FilterModule {
        FilterModule::QueryCounter
    }

    fn new_session(self: Arc<Self>, _ctx: &ConnectionContext) -> FilterResult<Box<dyn FilterSession>> {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(QueryCounterSession {
            filter: self,
            count: 0,
        }))
    }

    fn diagnostics(&self) -> String {
        format!("\t\tNo. of sessions created: {}\n", self.sessions())
    }
}

pub struct QueryCounterSession {
    filter: Arc<QueryCounterFilter>,
    count: u64,
}

impl QueryCounterSession {
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl FilterSession for QueryCounterSession {
    fn filter_name(&self) -> &str {
        &self.filter.name
    }

    fn route_query(&mut self, query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
        if query.is_sql() {
            self.count += 1;
            self.filter.statements.fetch_add(1, Ordering::Relaxed);
        }
        down.route_query(query)
    }

    fn diagnostics(&self) -> String {
        format!("\t\tNo. of queries routed by filter: {}\n", self.count)
    }
}
