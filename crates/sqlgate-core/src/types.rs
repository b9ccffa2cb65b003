// SPDX-License-Identifier: Apache-2.0

//! Core pipeline types
//!
//! Queries, replies, routing hints and connection metadata that flow
//! through a filter chain.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of client packet carried by a [`Query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    /// A textual SQL statement
    Sql,
    /// Any other protocol command, identified by its command byte
    Command(u8),
}

/// Annotation that influences a later routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingHint {
    /// Send the query to the primary server
    RouteToPrimary,
    /// Send the query to a named server
    RouteToNamedServer(String),
}

/// A client request travelling toward the backend
///
/// The payload may arrive as several fragments; stages that need the text
/// call [`Query::make_contiguous`] or [`Query::sql`], which treat it as one
/// logical unit.
#[derive(Debug, Clone)]
pub struct Query {
    kind: PacketKind,
    fragments: Vec<Bytes>,
    hints: Vec<RoutingHint>,
}

impl Query {
    /// Builds a SQL query from statement text
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let sql: String = sql.into();
        Self {
            kind: PacketKind::Sql,
            fragments: vec![Bytes::from(sql)],
            hints: Vec::new(),
        }
    }

    /// Builds a query from a possibly fragmented payload
    pub fn from_fragments(kind: PacketKind, fragments: Vec<Bytes>) -> Self {
        Self {
            kind,
            fragments,
            hints: Vec::new(),
        }
    }

    /// Builds a non-SQL protocol command
    pub fn command(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Command(code),
            fragments: vec![payload.into()],
            hints: Vec::new(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Returns true if the packet carries SQL text
    pub fn is_sql(&self) -> bool {
        self.kind == PacketKind::Sql
    }

    /// Returns true if the payload is split over more than one fragment
    pub fn is_fragmented(&self) -> bool {
        self.fragments.len() > 1
    }

    /// Total payload length across all fragments
    pub fn len(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges all fragments into a single buffer
    pub fn make_contiguous(&mut self) -> &[u8] {
        if self.fragments.len() > 1 {
            let mut merged = BytesMut::with_capacity(self.len());
            for fragment in self.fragments.drain(..) {
                merged.extend_from_slice(&fragment);
            }
            self.fragments.push(merged.freeze());
        }
        self.fragments.first().map(|b| &b[..]).unwrap_or(&[])
    }

    /// Extracts the statement text of a SQL packet
    ///
    /// Returns `None` for non-SQL packets. Invalid UTF-8 is replaced rather
    /// than rejected.
    pub fn sql(&mut self) -> Option<String> {
        if !self.is_sql() {
            return None;
        }
        let bytes = self.make_contiguous();
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Appends a hint; hints accumulate first-to-last
    pub fn add_hint(&mut self, hint: RoutingHint) {
        self.hints.push(hint);
    }

    pub fn hints(&self) -> &[RoutingHint] {
        &self.hints
    }

    pub fn has_hint(&self, hint: &RoutingHint) -> bool {
        self.hints.contains(hint)
    }
}

/// A backend response travelling toward the client
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub payload: Bytes,
}

impl Reply {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// What a filter learns about the client connection when a session starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub session_id: SessionId,
    /// Client address as seen by the proxy
    #[serde(default)]
    pub remote: Option<String>,
    /// Authenticated user name
    #[serde(default)]
    pub user: Option<String>,
}

impl ConnectionContext {
    pub fn new(remote: Option<&str>, user: Option<&str>) -> Self {
        Self {
            session_id: SessionId::new(),
            remote: remote.map(|s| s.to_string()),
            user: user.map(|s| s.to_string()),
        }
    }

    /// `user@host` identity, with empty parts when unknown
    pub fn identity(&self) -> String {
        format!(
            "{}@{}",
            self.user.as_deref().unwrap_or(""),
            self.remote.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragmented_query_is_merged() {
        let mut query = Query::from_fragments(
            PacketKind::Sql,
            vec![Bytes::from_static(b"SELECT "), Bytes::from_static(b"1")],
        );
        assert!(query.is_fragmented());
        assert_eq!(query.sql().as_deref(), Some("SELECT 1"));
        assert!(!query.is_fragmented());
        assert_eq!(query.len(), 8);
    }

    #[test]
    fn test_command_has_no_sql() {
        let mut query = Query::command(0x0e, Bytes::new());
        assert!(!query.is_sql());
        assert_eq!(query.sql(), None);
    }

    #[test]
    fn test_hints_accumulate_in_order() {
        let mut query = Query::from_sql("SELECT 1");
        query.add_hint(RoutingHint::RouteToPrimary);
        query.add_hint(RoutingHint::RouteToNamedServer("db2".to_string()));
        assert_eq!(
            query.hints(),
            &[
                RoutingHint::RouteToPrimary,
                RoutingHint::RouteToNamedServer("db2".to_string())
            ]
        );
    }

    #[test]
    fn test_identity() {
        let ctx = ConnectionContext::new(Some("10.0.0.1"), Some("bob"));
        assert_eq!(ctx.identity(), "bob@10.0.0.1");
        let ctx = ConnectionContext::new(None, Some("bob"));
        assert_eq!(ctx.identity(), "bob@");
    }
}
