//! Data model for audience segment definitions and their parameterization.
//!
//! A [`QueryDefinition`] is an administrator-authored, read-only query over
//! the member store, parameterized with `{{name}}` placeholders. Each
//! placeholder is declared up front by a [`VariableSpec`]; caller-provided
//! bindings are coerced into the tagged [`VarValue`] variant before any text
//! touches the query, so escaping is exhaustive over the declared type.

use chrono::{DateTime, Utc};
use cohort_error::CohortError;
use postgres_protocol::escape::escape_literal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An administrator-authored, parameterized, read-only segment query.
///
/// Owned by the authoring subsystem; the engine mutates it only through
/// bookkeeping after a successful run and never mid-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub id: i64,
    pub name: String,
    /// Raw query text containing `{{name}}` placeholders.
    pub query_text: String,
    /// Ordered variable schema.
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Per-definition execution time budget. Clamp-validated against the
    /// engine-wide maximum at execution time.
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: i64,
}

fn default_active() -> bool {
    true
}

fn default_max_execution_time_ms() -> u64 {
    cohort_common::config::DEFAULT_TIMEOUT_MS
}

impl QueryDefinition {
    /// Find the declared spec for a variable name.
    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Declared schema entry for one `{{name}}` placeholder. Immutable once
/// parsed from a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Integer,
    Boolean,
    Array,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarType::String => "string",
            VarType::Integer => "integer",
            VarType::Boolean => "boolean",
            VarType::Array => "array",
        }
    }
}

/// A coerced, type-checked variable value.
///
/// Rendering is keyed by the variant, so every path through [`VarValue::to_sql`]
/// is checked at compile time; there is no runtime type sniffing left by the
/// time a value reaches the query text.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Text(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl VarValue {
    /// Render as an injection-safe SQL fragment.
    ///
    /// Strings (and array elements) go through the driver's quoting
    /// primitive; integers render verbatim; booleans normalize to the
    /// engine's literal syntax.
    pub fn to_sql(&self) -> String {
        match self {
            VarValue::Text(s) => escape_literal(s),
            VarValue::Int(i) => i.to_string(),
            VarValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            VarValue::List(items) => items
                .iter()
                .map(|s| escape_literal(s))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Caller-provided variable bindings, as loosely typed JSON values.
pub type Bindings = HashMap<String, Value>;

/// Per-call execution options. Not persisted.
#[derive(Debug, Default, Clone)]
pub struct ExecutionOptions {
    /// Overrides the definition's execution time budget when present.
    pub timeout_ms: Option<u64>,
    /// Overrides the engine's default result limit when present.
    pub limit: Option<u64>,
    pub bindings: Bindings,
}

/// Accumulated validation failures; empty means valid.
///
/// Errors are structured [`CohortError`] values carrying their COHORT-XXXX
/// code and optional context, so the authoring surface can render feedback
/// field by field. [`ValidationReport::messages`] yields the tagged display
/// strings used in an [`ExecutionOutcome`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<CohortError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, error: CohortError) {
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
    }

    /// Tagged display strings, one per error (e.g. `[COHORT-2005] ...`).
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// The outcome of one execution request: deduplicated member identifiers
/// plus any accumulated errors. A failed execution always carries an empty
/// identifier list, never partial rows.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub member_ids: Vec<i64>,
    pub errors: Vec<String>,
}

impl ExecutionOutcome {
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            member_ids: Vec::new(),
            errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
