//! Query Interceptor
//!
//! Filters that sit between a client connection and the router:
//! - **Routing hints**: keep reads on the primary after a write
//! - **Top-N**: rank the slowest statements of a session
//! - **Query log**: append matched statements to a per-session file
//! - **Query counter**: count statements per session
//!
//! Every filter implements the contract in [`pipeline`]; a connection's
//! filters are driven by a [`FilterChain`].

pub mod counter;
pub mod matcher;
pub mod params;
pub mod pipeline;
pub mod query_log;
pub mod ranking;
pub mod routing_hint;
pub mod top_n;
pub mod types;

pub use counter::QueryCounterFilter;
pub use matcher::PatternMatcher;
pub use params::{ClientFilter, ParameterReader, PatternOptions};
pub use pipeline::{
    create_instance, Downstream, Filter, FilterChain, FilterEnv, FilterSession, Upstream,
};
pub use query_log::QueryLogFilter;
pub use ranking::{Offer, RankedStatement, TopRanking};
pub use routing_hint::RoutingHintFilter;
pub use top_n::TopNFilter;
pub use types::*;
