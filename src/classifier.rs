// SPDX-License-Identifier: Apache-2.0

//! Concrete query classifiers
//!
//! The pipeline only depends on the [`QueryClassifier`] capability; these are
//! the implementations a deployment can choose from.

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::trace;

use sqlgate_core::{Classification, OperationKind, Query, QueryClassifier};

/// Full parse with the generic SQL dialect
///
/// A multi-statement buffer reports the union of every statement's kind.
/// Anything the parser rejects is undefined and not a real query.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlParserClassifier;

impl QueryClassifier for SqlParserClassifier {
    fn name(&self) -> &'static str {
        "sqlparser"
    }

    fn classify(&self, query: &mut Query) -> Classification {
        let Some(sql) = query.sql() else {
            return Classification::undefined();
        };
        let statements = match Parser::parse_sql(&GenericDialect {}, sql.trim()) {
            Ok(statements) if !statements.is_empty() => statements,
            Ok(_) => return Classification::undefined(),
            Err(e) => {
                trace!("Unparseable statement: {}", e);
                return Classification::undefined();
            }
        };

        let mut operation = OperationKind::UNDEFINED;
        for statement in &statements {
            operation |= statement_kind(statement);
        }
        Classification {
            operation,
            is_real_query: true,
        }
    }
}

fn statement_kind(statement: &Statement) -> OperationKind {
    match statement {
        Statement::Query { .. }
        | Statement::Explain { .. }
        | Statement::ExplainTable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowVariable { .. } => OperationKind::SELECT,
        Statement::Insert { .. } => OperationKind::INSERT,
        Statement::Update { .. } => OperationKind::UPDATE,
        Statement::Delete { .. } => OperationKind::DELETE,
        Statement::Truncate { .. } => OperationKind::TRUNCATE,
        Statement::AlterTable { .. } => OperationKind::ALTER,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. } => OperationKind::CREATE,
        Statement::Drop { .. } => OperationKind::DROP,
        Statement::Use { .. } => OperationKind::CHANGE_DB,
        Statement::Grant { .. } => OperationKind::GRANT,
        Statement::Revoke { .. } => OperationKind::REVOKE,
        Statement::Execute { .. } => OperationKind::EXECUTE,
        Statement::Call { .. } => OperationKind::CALL,
        other => keyword_kind(&other.to_string()),
    }
}

/// First-keyword heuristic, no parsing
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl QueryClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn classify(&self, query: &mut Query) -> Classification {
        let Some(sql) = query.sql() else {
            return Classification::undefined();
        };
        let operation = keyword_kind(&sql);
        Classification {
            operation,
            is_real_query: !operation.is_undefined(),
        }
    }
}

fn keyword_kind(sql: &str) -> OperationKind {
    let first_word = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();

    match first_word.as_str() {
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => OperationKind::SELECT,
        "INSERT" | "REPLACE" => OperationKind::INSERT,
        "UPDATE" => OperationKind::UPDATE,
        "DELETE" => OperationKind::DELETE,
        "TRUNCATE" => OperationKind::TRUNCATE,
        "ALTER" => OperationKind::ALTER,
        "CREATE" => OperationKind::CREATE,
        "DROP" => OperationKind::DROP,
        "USE" => OperationKind::CHANGE_DB,
        "LOAD" => OperationKind::LOAD,
        "GRANT" => OperationKind::GRANT,
        "REVOKE" => OperationKind::REVOKE,
        "EXEC" | "EXECUTE" => OperationKind::EXECUTE,
        "SET" => OperationKind::SET,
        "CALL" => OperationKind::CALL,
        _ => OperationKind::UNDEFINED,
    }
}

/// Classifier for deployments without one; every query is undefined
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

impl QueryClassifier for NullClassifier {
    fn name(&self) -> &'static str {
        "null"
    }

    fn classify(&self, _query: &mut Query) -> Classification {
        Classification::undefined()
    }
}
