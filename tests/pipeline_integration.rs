use std::fs;
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use sqlgate_lib::{
    metrics, ConnectionContext, Downstream, FilterResult, KeywordClassifier, ManualClock, Query,
    Reply, RoutingHint, Service, ServiceConfig, Upstream,
};

#[derive(Clone, Default)]
struct Router {
    seen: Arc<Mutex<Vec<Query>>>,
}

impl Downstream for Router {
    fn route_query(&mut self, query: Query) -> FilterResult<()> {
        self.seen.lock().push(query);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Client {
    replies: Arc<Mutex<usize>>,
}

impl Upstream for Client {
    fn client_reply(&mut self, _reply: Reply) -> FilterResult<()> {
        *self.replies.lock() += 1;
        Ok(())
    }
}

fn start(json: serde_json::Value, clock: Arc<ManualClock>) -> Service {
    let config = ServiceConfig::from_json(&json.to_string()).unwrap();
    Service::new(config, Arc::new(KeywordClassifier), clock).unwrap()
}

#[test]
fn test_routing_window_through_chain() {
    let clock = Arc::new(ManualClock::at_epoch());
    let service = start(
        serde_json::json!({
            "name": "read-write-split",
            "filters": [
                {"name": "hints", "module": "ccrfilter",
                 "parameters": {"count": "2", "time": "5"}}
            ]
        }),
        clock.clone(),
    );

    let router = Router::default();
    let mut chain = service.new_chain(&ConnectionContext::default()).unwrap();
    chain.set_downstream(Box::new(router.clone())).unwrap();

    chain.route_query(Query::from_sql("INSERT INTO t VALUES (1)")).unwrap();
    for offset_ms in [100, 100, 100, 5700] {
        clock.advance_millis(offset_ms);
        chain.route_query(Query::from_sql("SELECT * FROM t")).unwrap();
    }
    chain.close().unwrap();

    let hinted: Vec<bool> = router
        .seen
        .lock()
        .iter()
        .map(|q| q.has_hint(&RoutingHint::RouteToPrimary))
        .collect();
    assert_eq!(hinted, vec![false, true, true, true, false]);

    let diagnostics = service.diagnostics();
    assert!(diagnostics.contains("No. of hints added based on count: 2"));
    assert!(diagnostics.contains("No. of hints added based on time: 1"));
}

#[test]
fn test_top_n_report_is_written_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let filebase = dir.path().join("slow");
    let clock = Arc::new(ManualClock::at_epoch());
    let service = start(
        serde_json::json!({
            "name": "reporting",
            "filters": [
                {"name": "top", "module": "topfilter",
                 "parameters": {"count": "3", "filebase": filebase.to_string_lossy()}}
            ]
        }),
        clock.clone(),
    );

    let client = Client::default();
    let mut chain = service
        .new_chain(&ConnectionContext::new(Some("10.0.0.1"), Some("bob")))
        .unwrap();
    chain.set_downstream(Box::new(Router::default())).unwrap();
    chain.set_upstream(Box::new(client.clone())).unwrap();

    for secs in [5, 3, 8, 1, 9] {
        chain
            .route_query(Query::from_sql(format!("SELECT SLEEP({})", secs)))
            .unwrap();
        clock.advance(Duration::seconds(secs));
        chain.client_reply(Reply::new("ok")).unwrap();
    }
    chain.close().unwrap();

    assert_eq!(*client.replies.lock(), 5);
    let report = fs::read_to_string(dir.path().join("slow.0")).unwrap();
    let expected = "\
Top 3 longest running queries in session.
==========================================

Rank | Time (sec) | Query
-----+------------+------------------------------------------------------
   1 |      9.000 | SELECT SLEEP(9)
   2 |      8.000 | SELECT SLEEP(8)
   3 |      5.000 | SELECT SLEEP(5)
-----+------------+------------------------------------------------------

Session started Thu Jan  1 00:00:00 1970
Client          bob@10.0.0.1

Total of 5 statements timed.
Total statement execution time   26.000 seconds
Average statement execution time 5.200 seconds
Total connection time            26.000 seconds
";
    assert_eq!(report, expected);
}

#[test]
fn test_full_chain_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("service.json");
    let json = serde_json::json!({
        "name": "full",
        "filters": [
            {"name": "count", "module": "testfilter"},
            {"name": "hints", "module": "routing_hint",
             "options": ["case"],
             "parameters": {"count": "1", "exclude": "^SET"}},
            {"name": "log", "module": "query_log",
             "parameters": {"filebase": dir.path().join("qla").to_string_lossy()}},
            {"name": "top", "module": "top_n",
             "parameters": {"filebase": dir.path().join("top").to_string_lossy(),
                            "match": "select"}}
        ]
    });
    fs::write(&config_path, json.to_string()).unwrap();

    let clock = Arc::new(ManualClock::at_epoch());
    let service = Service::load(&config_path, Arc::new(KeywordClassifier), clock.clone()).unwrap();
    assert_eq!(service.filters().len(), 4);

    let before = metrics::snapshot();
    let router = Router::default();
    let client = Client::default();
    {
        let mut chain = service.new_chain(&ConnectionContext::new(Some("::1"), Some("app"))).unwrap();
        assert_eq!(chain.stage_names(), vec!["count", "hints", "log", "top"]);
        chain.set_downstream(Box::new(router.clone())).unwrap();
        chain.set_upstream(Box::new(client.clone())).unwrap();

        for sql in ["SET names utf8", "SELECT 1", "UPDATE t SET a = 2", "SELECT a FROM t"] {
            chain.route_query(Query::from_sql(sql)).unwrap();
            clock.advance_millis(10);
            chain.client_reply(Reply::new("ok")).unwrap();
        }
        chain
            .route_query(Query::command(0x0e, bytes::Bytes::new()))
            .unwrap();
        // Dropped without close; the chain still finalises every filter
    }

    let seen = router.seen.lock();
    assert_eq!(seen.len(), 5);
    assert!(!seen[1].has_hint(&RoutingHint::RouteToPrimary));
    assert!(seen[3].has_hint(&RoutingHint::RouteToPrimary));
    assert_eq!(*client.replies.lock(), 4);

    let log = fs::read_to_string(dir.path().join("qla.0")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[2].ends_with(",app@::1,UPDATE t SET a = 2"));

    // "match" without the "case" option on this filter is case-insensitive
    let report = fs::read_to_string(dir.path().join("top.0")).unwrap();
    assert!(report.contains("Total of 2 statements timed."));

    let after = metrics::snapshot();
    assert!(after.sessions_closed >= before.sessions_closed + 1);
    assert!(after.queries_routed >= before.queries_routed + 5);
}
