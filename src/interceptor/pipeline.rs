// SPDX-License-Identifier: Apache-2.0

//! Interceptor Pipeline
//!
//! The composition protocol every filter implements, and the per-connection
//! chain that drives it:
//! 1. Request path: each stage inspects or annotates a query and forwards it
//!    exactly once to the next stage, the last stage forwards to the router.
//! 2. Reply path: replies travel back through the stages that registered a
//!    reply hook, in reverse order, and finally reach the client.
//!
//! Instance state (`Filter`) is shared by every connection of a service and
//! only holds immutable configuration plus atomic counters. Session state
//! (`FilterSession`) is owned by the single worker servicing a connection.

use std::sync::Arc;

use tracing::{debug, error, warn};

use sqlgate_core::{
    Clock, ConnectionContext, FilterError, FilterResult, Query, QueryClassifier, Reply, SessionId,
    SystemClock,
};

use super::counter::QueryCounterFilter;
use super::query_log::QueryLogFilter;
use super::routing_hint::RoutingHintFilter;
use super::top_n::TopNFilter;
use super::types::{FilterDefinition, FilterModule};
use crate::classifier::NullClassifier;
use crate::metrics;

/// Next hop for a request: another filter or the router
pub trait Downstream {
    fn route_query(&mut self, query: Query) -> FilterResult<()>;
}

/// Next hop for a reply: another filter or the client
pub trait Upstream {
    fn client_reply(&mut self, reply: Reply) -> FilterResult<()>;
}

/// A configured filter, shared by all sessions of a service
pub trait Filter: Send + Sync {
    /// Instance name from the filter definition
    fn name(&self) -> &str;

    fn module(&self) -> FilterModule;

    /// Allocates per-connection state
    ///
    /// A session may come back inactive, in which case it only passes
    /// traffic through.
    fn new_session(self: Arc<Self>, ctx: &ConnectionContext) -> FilterResult<Box<dyn FilterSession>>;

    /// Read-only report of the instance-wide state
    fn diagnostics(&self) -> String;
}

/// Per-connection filter state
pub trait FilterSession: Send {
    fn filter_name(&self) -> &str;

    /// Request hook; must forward to `down` exactly once
    fn route_query(&mut self, query: Query, down: &mut dyn Downstream) -> FilterResult<()>;

    /// Whether this session takes part in the reply path
    fn wants_replies(&self) -> bool {
        false
    }

    /// Reply hook; must forward to `up` exactly once
    fn client_reply(&mut self, reply: Reply, up: &mut dyn Upstream) -> FilterResult<()> {
        up.client_reply(reply)
    }

    /// Final reporting on connection close; resources are released on drop
    fn close(&mut self) -> FilterResult<()> {
        Ok(())
    }

    /// Read-only report of this session, including its instance settings
    fn diagnostics(&self) -> String;
}

/// Instance diagnostics when `session` is absent, session diagnostics otherwise
pub fn diagnostics(filter: &dyn Filter, session: Option<&dyn FilterSession>) -> String {
    match session {
        Some(session) => session.diagnostics(),
        None => filter.diagnostics(),
    }
}

/// Collaborators handed to filters at instance creation
#[derive(Clone)]
pub struct FilterEnv {
    pub classifier: Arc<dyn QueryClassifier>,
    pub clock: Arc<dyn Clock>,
}

impl FilterEnv {
    pub fn new(classifier: Arc<dyn QueryClassifier>, clock: Arc<dyn Clock>) -> Self {
        Self { classifier, clock }
    }
}

impl Default for FilterEnv {
    fn default() -> Self {
        Self {
            classifier: Arc::new(NullClassifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Creates a filter instance for a definition
///
/// Fails on malformed patterns, malformed numbers and missing mandatory
/// parameters; such a filter must never be placed in a chain.
pub fn create_instance(definition: &FilterDefinition, env: &FilterEnv) -> FilterResult<Arc<dyn Filter>> {
    let filter: Arc<dyn Filter> = match definition.module {
        FilterModule::RoutingHint => Arc::new(RoutingHintFilter::create(definition, env)?),
        FilterModule::TopN => Arc::new(TopNFilter::create(definition, env)?),
        FilterModule::QueryLog => Arc::new(QueryLogFilter::create(definition, env)?),
        FilterModule::QueryCounter => Arc::new(QueryCounterFilter::create(definition, env)?),
    };
    debug!(
        "Created {} instance '{}'",
        definition.module,
        definition.name
    );
    Ok(filter)
}

/// The filter sessions of one client connection, in request order
pub struct FilterChain {
    session_id: SessionId,
    stages: Vec<Box<dyn FilterSession>>,
    router: Option<Box<dyn Downstream + Send>>,
    client: Option<Box<dyn Upstream + Send>>,
    closed: bool,
}

impl FilterChain {
    pub fn new(session_id: SessionId, stages: Vec<Box<dyn FilterSession>>) -> Self {
        metrics::record_session_opened();
        Self {
            session_id,
            stages,
            router: None,
            client: None,
            closed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.filter_name()).collect()
    }

    /// Wires the router behind the last stage; allowed once
    pub fn set_downstream(&mut self, router: Box<dyn Downstream + Send>) -> FilterResult<()> {
        if self.router.is_some() {
            return Err(FilterError::already_wired("downstream already set"));
        }
        self.router = Some(router);
        Ok(())
    }

    /// Wires the client in front of the first stage; allowed once
    pub fn set_upstream(&mut self, client: Box<dyn Upstream + Send>) -> FilterResult<()> {
        if self.client.is_some() {
            return Err(FilterError::already_wired("upstream already set"));
        }
        self.client = Some(client);
        Ok(())
    }

    /// Sends a client query through every stage to the router
    pub fn route_query(&mut self, query: Query) -> FilterResult<()> {
        if self.closed {
            return Err(FilterError::not_wired("session already closed"));
        }
        let Some(router) = self.router.as_deref_mut() else {
            return Err(FilterError::not_wired("no downstream set"));
        };
        metrics::record_query();

        let mut path = RequestPath {
            stages: &mut self.stages,
            router,
            forwarded: 0,
        };
        path.route_query(query)
    }

    /// Sends a backend reply back through the reply hooks to the client
    pub fn client_reply(&mut self, reply: Reply) -> FilterResult<()> {
        if self.closed {
            return Err(FilterError::not_wired("session already closed"));
        }
        let Some(client) = self.client.as_deref_mut() else {
            return Err(FilterError::not_wired("no upstream set"));
        };
        metrics::record_reply();

        let mut path = ReplyPath {
            stages: &mut self.stages,
            client,
            forwarded: 0,
        };
        path.client_reply(reply)
    }

    /// Closes every session once, even when some fail
    ///
    /// Returns the first failure after all stages have been closed.
    pub fn close(&mut self) -> FilterResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        metrics::record_session_closed();

        let mut first_error = None;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.close() {
                error!(
                    "Closing {} for session {} failed: {}",
                    stage.filter_name(),
                    self.session_id,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Diagnostics of every stage, in chain order
    pub fn diagnostics(&self) -> Vec<(String, String)> {
        self.stages
            .iter()
            .map(|s| (s.filter_name().to_string(), s.diagnostics()))
            .collect()
    }
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session {} dropped without close, closing filters", self.session_id);
            let _ = self.close();
        }
    }
}

/// The remainder of the request path as seen from one stage
struct RequestPath<'a> {
    stages: &'a mut [Box<dyn FilterSession>],
    router: &'a mut dyn Downstream,
    forwarded: usize,
}

impl Downstream for RequestPath<'_> {
    fn route_query(&mut self, query: Query) -> FilterResult<()> {
        self.forwarded += 1;
        match self.stages.split_first_mut() {
            None => self.router.route_query(query),
            Some((head, tail)) => {
                let mut next = RequestPath {
                    stages: tail,
                    router: &mut *self.router,
                    forwarded: 0,
                };
                let result = head.route_query(query, &mut next);
                check_forwarded(head.filter_name(), next.forwarded)?;
                result
            }
        }
    }
}

/// The remainder of the reply path as seen from one stage
struct ReplyPath<'a> {
    stages: &'a mut [Box<dyn FilterSession>],
    client: &'a mut dyn Upstream,
    forwarded: usize,
}

impl Upstream for ReplyPath<'_> {
    fn client_reply(&mut self, reply: Reply) -> FilterResult<()> {
        self.forwarded += 1;
        match self.stages.iter().rposition(|s| s.wants_replies()) {
            None => self.client.client_reply(reply),
            Some(idx) => {
                let (before, rest) = self.stages.split_at_mut(idx);
                let stage = &mut rest[0];
                let mut next = ReplyPath {
                    stages: before,
                    client: &mut *self.client,
                    forwarded: 0,
                };
                let result = stage.client_reply(reply, &mut next);
                check_forwarded(stage.filter_name(), next.forwarded)?;
                result
            }
        }
    }
}

fn check_forwarded(filter: &str, count: usize) -> FilterResult<()> {
    if count == 1 {
        return Ok(());
    }
    metrics::record_forwarding_violation();
    let err = FilterError::forwarding_violation(filter, count);
    error!("{}", err);
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use sqlgate_core::RoutingHint;

    /// Records what reaches the end of the request path
    #[derive(Clone, Default)]
    struct RecordingRouter {
        queries: Arc<Mutex<Vec<Query>>>,
    }

    impl Downstream for RecordingRouter {
        fn route_query(&mut self, query: Query) -> FilterResult<()> {
            self.queries.lock().push(query);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingClient {
        replies: Arc<Mutex<Vec<Reply>>>,
    }

    impl Upstream for RecordingClient {
        fn client_reply(&mut self, reply: Reply) -> FilterResult<()> {
            self.replies.lock().push(reply);
            Ok(())
        }
    }

    /// Tags queries and replies with its name so ordering can be checked
    struct TagStage {
        name: String,
        replies: bool,
        seen_replies: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicUsize>,
    }

    impl FilterSession for TagStage {
        fn filter_name(&self) -> &str {
            &self.name
        }

        fn route_query(&mut self, mut query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
            query.add_hint(RoutingHint::RouteToNamedServer(self.name.clone()));
            down.route_query(query)
        }

        fn wants_replies(&self) -> bool {
            self.replies
        }

        fn client_reply(&mut self, reply: Reply, up: &mut dyn Upstream) -> FilterResult<()> {
            self.seen_replies.lock().push(self.name.clone());
            up.client_reply(reply)
        }

        fn close(&mut self) -> FilterResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn diagnostics(&self) -> String {
            format!("tag {}", self.name)
        }
    }

    /// Breaks the contract by forwarding a configurable number of times
    struct MisbehavingStage {
        forwards: usize,
    }

    impl FilterSession for MisbehavingStage {
        fn filter_name(&self) -> &str {
            "misbehaving"
        }

        fn route_query(&mut self, query: Query, down: &mut dyn Downstream) -> FilterResult<()> {
            for _ in 0..self.forwards {
                down.route_query(query.clone())?;
            }
            Ok(())
        }

        fn diagnostics(&self) -> String {
            String::new()
        }
    }

    struct Harness {
        seen_replies: Arc<Mutex<Vec<String>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                seen_replies: Arc::new(Mutex::new(Vec::new())),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn stage(&self, name: &str, replies: bool) -> Box<dyn FilterSession> {
            Box::new(TagStage {
                name: name.to_string(),
                replies,
                seen_replies: Arc::clone(&self.seen_replies),
                closes: Arc::clone(&self.closes),
            })
        }
    }

    #[test]
    fn test_requests_flow_in_chain_order() {
        let harness = Harness::new();
        let router = RecordingRouter::default();
        let mut chain = FilterChain::new(
            SessionId::new(),
            vec![harness.stage("a", false), harness.stage("b", false)],
        );
        chain.set_downstream(Box::new(router.clone())).unwrap();

        chain.route_query(Query::from_sql("SELECT 1")).unwrap();

        let queries = router.queries.lock();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].hints(),
            &[
                RoutingHint::RouteToNamedServer("a".to_string()),
                RoutingHint::RouteToNamedServer("b".to_string())
            ]
        );
    }

    #[test]
    fn test_replies_skip_stages_without_hook() {
        let harness = Harness::new();
        let client = RecordingClient::default();
        let mut chain = FilterChain::new(
            SessionId::new(),
            vec![
                harness.stage("a", true),
                harness.stage("b", false),
                harness.stage("c", true),
            ],
        );
        chain.set_upstream(Box::new(client.clone())).unwrap();

        chain.client_reply(Reply::new("ok")).unwrap();

        assert_eq!(client.replies.lock().len(), 1);
        assert_eq!(
            *harness.seen_replies.lock(),
            vec!["c".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_wiring_is_once_only() {
        let mut chain = FilterChain::new(SessionId::new(), Vec::new());
        assert!(matches!(
            chain.route_query(Query::from_sql("SELECT 1")),
            Err(FilterError::NotWired { .. })
        ));
        chain
            .set_downstream(Box::new(RecordingRouter::default()))
            .unwrap();
        assert!(matches!(
            chain.set_downstream(Box::new(RecordingRouter::default())),
            Err(FilterError::AlreadyWired { .. })
        ));
        chain.set_upstream(Box::new(RecordingClient::default())).unwrap();
        assert!(chain.set_upstream(Box::new(RecordingClient::default())).is_err());
    }

    #[test]
    fn test_forwarding_violations_are_detected() {
        for forwards in [0usize, 2] {
            let router = RecordingRouter::default();
            let mut chain = FilterChain::new(
                SessionId::new(),
                vec![Box::new(MisbehavingStage { forwards })],
            );
            chain.set_downstream(Box::new(router.clone())).unwrap();

            let err = chain.route_query(Query::from_sql("SELECT 1")).unwrap_err();
            assert!(matches!(
                err,
                FilterError::ForwardingViolation { count, .. } if count == forwards
            ));
        }
    }

    #[test]
    fn test_close_runs_once_including_drop() {
        let harness = Harness::new();
        {
            let mut chain = FilterChain::new(
                SessionId::new(),
                vec![harness.stage("a", false), harness.stage("b", true)],
            );
            chain.close().unwrap();
            chain.close().unwrap();
            assert!(chain.is_closed());
        }
        assert_eq!(harness.closes.load(Ordering::SeqCst), 2);

        {
            let _chain = FilterChain::new(SessionId::new(), vec![harness.stage("c", false)]);
        }
        assert_eq!(harness.closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_closed_chain_rejects_traffic() {
        let mut chain = FilterChain::new(SessionId::new(), Vec::new());
        chain
            .set_downstream(Box::new(RecordingRouter::default()))
            .unwrap();
        chain.close().unwrap();
        assert!(chain.route_query(Query::from_sql("SELECT 1")).is_err());
    }
}
