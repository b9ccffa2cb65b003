//! Query classification capability
//!
//! The pipeline never parses SQL itself. A [`QueryClassifier`] is handed in
//! by the embedding proxy and answers two questions about a query buffer:
//! which operations it performs, and whether it is a real, parseable
//! statement.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Query;

/// Bitmask of the operations a statement performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OperationKind(pub u32);

impl OperationKind {
    pub const UNDEFINED: Self = Self(0);
    pub const SELECT: Self = Self(1 << 0);
    pub const UPDATE: Self = Self(1 << 1);
    pub const INSERT: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    pub const TRUNCATE: Self = Self(1 << 4);
    pub const ALTER: Self = Self(1 << 5);
    pub const CREATE: Self = Self(1 << 6);
    pub const DROP: Self = Self(1 << 7);
    pub const CHANGE_DB: Self = Self(1 << 8);
    pub const LOAD: Self = Self(1 << 9);
    pub const GRANT: Self = Self(1 << 10);
    pub const REVOKE: Self = Self(1 << 11);
    pub const EXECUTE: Self = Self(1 << 12);
    pub const SET: Self = Self(1 << 13);
    pub const CALL: Self = Self(1 << 14);

    const NAMES: [(Self, &'static str); 15] = [
        (Self::SELECT, "select"),
        (Self::UPDATE, "update"),
        (Self::INSERT, "insert"),
        (Self::DELETE, "delete"),
        (Self::TRUNCATE, "truncate"),
        (Self::ALTER, "alter"),
        (Self::CREATE, "create"),
        (Self::DROP, "drop"),
        (Self::CHANGE_DB, "change_db"),
        (Self::LOAD, "load"),
        (Self::GRANT, "grant"),
        (Self::REVOKE, "revoke"),
        (Self::EXECUTE, "execute"),
        (Self::SET, "set"),
        (Self::CALL, "call"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_undefined(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True only for a non-empty mask made of SELECT alone
    ///
    /// An empty or unrecognised mask is not a read.
    pub fn is_pure_read(self) -> bool {
        self == Self::SELECT
    }

    /// True when the statement may modify data, including unknown statements
    pub fn may_write(self) -> bool {
        !self.is_pure_read()
    }
}

impl std::ops::BitOr for OperationKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for OperationKind {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            return f.write_str("undefined");
        }
        let mut first = true;
        let mut known = 0u32;
        for (kind, name) in Self::NAMES {
            if self.contains(kind) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                known |= kind.0;
            }
        }
        let unknown = self.0 & !known;
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}

/// Classifier verdict for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Classification {
    pub operation: OperationKind,
    /// Whether the buffer held a real, parseable statement
    pub is_real_query: bool,
}

impl Classification {
    pub fn undefined() -> Self {
        Self::default()
    }
}

/// External SQL classification capability
pub trait QueryClassifier: Send + Sync {
    /// Identifier used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Classifies a query; must not fail, an unknown answer is `undefined`
    fn classify(&self, query: &mut Query) -> Classification;
}
