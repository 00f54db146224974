//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis by the
//! authoring surface (which renders validation feedback field-by-field).

use serde::{Deserialize, Serialize};

/// Structured context for machine-readable errors.
///
/// Each variant provides specific fields relevant to that error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for COHORT-2005 (ForbiddenKeyword)
    ForbiddenKeyword { keyword: String },

    /// Context for COHORT-2007 (UnauthorizedTable)
    UnauthorizedTable {
        table: String,
        allowed_tables: Vec<String>,
    },

    /// Context for COHORT-3001/3002 (variable binding errors)
    Variable {
        name: String,
        declared_type: String,
        provided: Option<String>,
    },

    /// Context for COHORT-4001 (QueryTimeout)
    Timeout {
        timeout_ms: u64,
        definition_id: Option<i64>,
    },

    /// Context for COHORT-4005/4006 (request bound violations)
    Bound {
        requested: u64,
        minimum: u64,
        maximum: u64,
    },

    /// Context for connection errors (COHORT-1001..1004)
    Connection { role: String },
}
