//! # cohort-error
//!
//! Unified error types for the Cohort segment query engine.
//!
//! All errors are designed to be machine-consumable with:
//! - Numeric error codes (COHORT-XXXX)
//! - Structured JSON context
//! - Actionable hints for the authoring surface
//!
//! Database-facing errors are classified here (timeout / syntax / other) so
//! that callers never see raw driver error text.

mod code;
mod context;
mod convert;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;
pub use convert::find_closest_match;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all Cohort operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortError {
    /// Numeric error code (e.g., "COHORT-2005")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Actionable suggestion for the segment author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Correlation ID for distributed tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl CohortError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
            trace_id: None,
        }
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add an actionable hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Add trace ID for correlation
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// A caller-safe rendering: the classification tag plus a generic message.
    ///
    /// Database-internal error text never passes through here verbatim;
    /// validation and substitution errors (which carry no internal detail)
    /// keep their full message.
    pub fn public_message(&self) -> String {
        if self.code.is_local() {
            self.to_string()
        } else {
            match self.code.category() {
                ErrorCategory::Connection => {
                    format!("[{}] Database connection unavailable", self.code)
                }
                ErrorCategory::Execution => match self.code {
                    ErrorCode::QueryTimeout => {
                        format!("[{}] Query exceeded its execution time limit", self.code)
                    }
                    ErrorCode::QuerySyntax => {
                        format!("[{}] Query was rejected by the database", self.code)
                    }
                    // Request-bound and activation failures are produced
                    // locally, before any connection is opened.
                    ErrorCode::InvalidTimeout
                    | ErrorCode::InvalidLimit
                    | ErrorCode::DefinitionInactive => self.to_string(),
                    _ => format!("[{}] Query execution failed", self.code),
                },
                _ => format!("[{}] Internal error", self.code),
            }
        }
    }

    /// Serialize to JSON for API responses
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize CohortError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }
}

impl fmt::Display for CohortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for CohortError {}

/// Result type alias for Cohort operations
pub type Result<T> = std::result::Result<T, CohortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_error_builder() {
        let err = CohortError::new(ErrorCode::UnauthorizedTable, "Table not allowed")
            .with_hint("Check the allowlist")
            .with_trace_id("12345");

        assert_eq!(err.code, ErrorCode::UnauthorizedTable);
        assert_eq!(err.message, "Table not allowed");
        assert_eq!(err.hint, Some("Check the allowlist".to_string()));
        assert_eq!(err.trace_id, Some("12345".to_string()));
        assert!(err.context.is_none());
    }

    #[test]
    fn test_display_implementation() {
        let err = CohortError::new(ErrorCode::ForbiddenKeyword, "Forbidden keyword: DROP")
            .with_hint("Segment queries must be read-only");

        assert_eq!(
            err.to_string(),
            "[COHORT-2005] Forbidden keyword: DROP (Hint: Segment queries must be read-only)"
        );

        let err_no_hint = CohortError::new(ErrorCode::InternalPanic, "Crash");
        assert_eq!(err_no_hint.to_string(), "[COHORT-5003] Crash");
    }

    #[test]
    fn test_public_message_hides_execution_detail() {
        let err = CohortError::new(
            ErrorCode::ExecutionFailed,
            "relation \"pg_shadow\" does not exist",
        );
        let public = err.public_message();
        assert!(public.contains("COHORT-4003"));
        assert!(!public.contains("pg_shadow"));
    }

    #[test]
    fn test_public_message_keeps_validation_detail() {
        let err = CohortError::new(ErrorCode::ForbiddenKeyword, "Forbidden keyword: DROP");
        assert!(err.public_message().contains("DROP"));
    }

    #[test]
    fn test_json_output() {
        let err = CohortError::new(ErrorCode::PoolExhausted, "Too many connections");
        let json = err.to_json();

        assert!(json.contains("\"code\":\"COHORT-1003\""));
        assert!(json.contains("\"message\":\"Too many connections\""));
    }
}
