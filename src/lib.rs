// sqlgate - query interception pipeline for a database proxy
// Core library

pub mod admin;
pub mod classifier;
pub mod interceptor;
pub mod metrics;
pub mod observability;
pub mod service;

pub use sqlgate_core::{
    Classification, Clock, ConnectionContext, FilterError, FilterResult, ManualClock,
    OperationKind, PacketKind, Query, QueryClassifier, Reply, RoutingHint, SessionId, SystemClock,
};

pub use admin::{AdminConsole, SessionRegistry};
pub use classifier::{KeywordClassifier, NullClassifier, SqlParserClassifier};
pub use interceptor::{
    create_instance, Downstream, Filter, FilterChain, FilterDefinition, FilterEnv, FilterModule,
    FilterSession, Upstream,
};
pub use service::{Service, ServiceConfig, SessionErrorPolicy};
