// SPDX-License-Identifier: Apache-2.0

//! Service
//!
//! A proxied service and its configured filters. Instances are created once
//! when the service starts; each client connection gets its own
//! [`FilterChain`] built from them.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use sqlgate_core::{Clock, ConnectionContext, FilterError, FilterResult, QueryClassifier};

use crate::interceptor::{
    create_instance, Filter, FilterChain, FilterDefinition, FilterEnv, FilterSession,
};
use crate::metrics;

/// What to do when a filter cannot start a session for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionErrorPolicy {
    /// Refuse the connection
    #[default]
    Reject,
    /// Leave the failing filter out of this connection's chain
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub on_session_error: SessionErrorPolicy,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

impl ServiceConfig {
    pub fn from_json(content: &str) -> FilterResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| FilterError::config("service", format!("Failed to parse config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> FilterResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FilterError::io(path, &e))?;
        let config = Self::from_json(&content)?;
        info!("Loaded service '{}' from {:?}", config.name, path);
        Ok(config)
    }
}

pub struct Service {
    name: String,
    policy: SessionErrorPolicy,
    filters: Vec<Arc<dyn Filter>>,
}

impl Service {
    /// Creates every filter instance, failing on the first bad definition
    pub fn new(
        config: ServiceConfig,
        classifier: Arc<dyn QueryClassifier>,
        clock: Arc<dyn Clock>,
    ) -> FilterResult<Self> {
        let env = FilterEnv::new(classifier, clock);

        let mut seen = HashSet::new();
        let mut filters = Vec::with_capacity(config.filters.len());
        for definition in &config.filters {
            if !seen.insert(definition.name.as_str()) {
                let err = FilterError::config(
                    &definition.name,
                    format!("duplicate filter name in service '{}'", config.name),
                );
                error!("{}", err);
                return Err(err);
            }
            let filter = create_instance(definition, &env).map_err(|e| {
                error!(
                    "Service '{}': filter '{}' could not be created: {}",
                    config.name, definition.name, e
                );
                e
            })?;
            filters.push(filter);
        }

        info!(
            "Service '{}' started with {} filter(s)",
            config.name,
            filters.len()
        );
        Ok(Self {
            name: config.name,
            policy: config.on_session_error,
            filters,
        })
    }

    pub fn load(
        path: impl AsRef<Path>,
        classifier: Arc<dyn QueryClassifier>,
        clock: Arc<dyn Clock>,
    ) -> FilterResult<Self> {
        Self::new(ServiceConfig::load(path)?, classifier, clock)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> SessionErrorPolicy {
        self.policy
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn filter(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.iter().find(|f| f.name() == name)
    }

    /// Builds the filter chain for a new connection
    #[instrument(skip(self, ctx), fields(service = %self.name, session = %ctx.session_id))]
    pub fn new_chain(&self, ctx: &ConnectionContext) -> FilterResult<FilterChain> {
        let mut stages = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            match Arc::clone(filter).new_session(ctx) {
                Ok(session) => stages.push(session),
                Err(e) => {
                    metrics::record_session_failure();
                    match self.policy {
                        SessionErrorPolicy::Reject => {
                            error!("Filter '{}' rejected the session: {}", filter.name(), e);
                            close_started(&mut stages);
                            return Err(FilterError::session_setup(filter.name(), e.to_string()));
                        }
                        SessionErrorPolicy::Skip => {
                            warn!("Filter '{}' skipped for this session: {}", filter.name(), e);
                        }
                    }
                }
            }
        }
        Ok(FilterChain::new(ctx.session_id, stages))
    }

    pub fn diagnostics(&self) -> String {
        let mut out = format!("Service: {}\n", self.name);
        for filter in &self.filters {
            out.push_str(&format!(
                "Filter: {}\n\tModule: {}\n\tDescription: {}\n",
                filter.name(),
                filter.module(),
                filter.module().description()
            ));
            out.push_str(&filter.diagnostics());
        }
        out
    }
}

/// Closes the sessions of a chain that will not be built
fn close_started(stages: &mut [Box<dyn FilterSession>]) {
    for stage in stages.iter_mut() {
        if let Err(e) = stage.close() {
            warn!(
                "Closing filter '{}' of a rejected session failed: {}",
                stage.filter_name(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use sqlgate_core::SystemClock;

    fn start(json: &str) -> FilterResult<Service> {
        Service::new(
            ServiceConfig::from_json(json)?,
            Arc::new(KeywordClassifier),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_policy_defaults_to_reject() {
        let config = ServiceConfig::from_json(r#"{"name": "rw"}"#).unwrap();
        assert_eq!(config.on_session_error, SessionErrorPolicy::Reject);
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_bad_definition_fails_start() {
        let err = start(
            r#"{"name": "rw", "filters": [
                {"name": "hints", "module": "ccrfilter", "parameters": {"match": "("}}
            ]}"#,
        )
        .err()
        .unwrap();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = start(
            r#"{"name": "rw", "filters": [
                {"name": "c", "module": "testfilter"},
                {"name": "c", "module": "testfilter"}
            ]}"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, FilterError::Config { .. }));
    }

    #[test]
    fn test_unknown_module_is_parse_error() {
        assert!(ServiceConfig::from_json(r#"{"name": "rw", "filters": [{"name": "x", "module": "nope"}]}"#).is_err());
    }

    #[test]
    fn test_session_error_policy() {
        let dir = tempfile::tempdir().unwrap();
        let filebase = dir.path().join("absent").join("qla");
        let json = |policy: &str| {
            serde_json::json!({
                "name": "rw",
                "on_session_error": policy,
                "filters": [
                    {"name": "count", "module": "testfilter"},
                    {"name": "log", "module": "qlafilter",
                     "parameters": {"filebase": filebase.to_string_lossy()}}
                ]
            })
            .to_string()
        };

        let service = start(&json("reject")).unwrap();
        let err = service.new_chain(&ConnectionContext::default()).err().unwrap();
        assert!(matches!(err, FilterError::SessionSetup { ref filter, .. } if filter == "log"));

        let service = start(&json("skip")).unwrap();
        let chain = service.new_chain(&ConnectionContext::default()).unwrap();
        assert_eq!(chain.stage_names(), vec!["count"]);
    }

    #[test]
    fn test_rejected_session_closes_started_filters() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::json!({
            "name": "rw",
            "filters": [
                {"name": "top", "module": "topfilter",
                 "parameters": {"filebase": dir.path().join("top").to_string_lossy()}},
                {"name": "log", "module": "qlafilter",
                 "parameters": {"filebase": dir.path().join("absent").join("qla").to_string_lossy()}}
            ]
        })
        .to_string();

        let service = start(&json).unwrap();
        assert!(service.new_chain(&ConnectionContext::default()).is_err());
        let report = fs::read_to_string(dir.path().join("top.0")).unwrap();
        assert!(report.starts_with("Top 10 longest running queries in session."));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingClose {
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FilterSession for FailingClose {
        fn filter_name(&self) -> &str {
            "flaky"
        }

        fn route_query(
            &mut self,
            query: sqlgate_core::Query,
            down: &mut dyn crate::interceptor::Downstream,
        ) -> FilterResult<()> {
            down.route_query(query)
        }

        fn close(&mut self) -> FilterResult<()> {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
            Err(FilterError::config("flaky", "disk gone"))
        }

        fn diagnostics(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn test_close_errors_of_rejected_session_are_logged() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let first = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let second = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut stages: Vec<Box<dyn FilterSession>> = vec![
            Box::new(FailingClose { closed: first.clone() }),
            Box::new(FailingClose { closed: second.clone() }),
        ];
        tracing::subscriber::with_default(subscriber, || close_started(&mut stages));

        assert!(first.load(std::sync::atomic::Ordering::SeqCst));
        assert!(second.load(std::sync::atomic::Ordering::SeqCst));
        let output = String::from_utf8(log.0.lock().clone()).unwrap();
        assert_eq!(output.matches("Closing filter 'flaky' of a rejected session failed").count(), 2);
        assert!(output.contains("WARN"));
        assert!(output.contains("disk gone"));
    }

    #[test]
    fn test_diagnostics_lists_filters() {
        let service = start(
            r#"{"name": "rw", "filters": [
                {"name": "hints", "module": "routing_hint", "parameters": {"count": "2"}}
            ]}"#,
        )
        .unwrap();
        let text = service.diagnostics();
        assert!(text.contains("Filter: hints"));
        assert!(text.contains("Module: ccrfilter"));
        assert!(text.contains("Count: 2"));
        assert!(service.filter("hints").is_some());
    }
}
