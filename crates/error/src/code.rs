use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following COHORT-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection errors
/// - **2000-2999**: Query validation errors
/// - **3000-3999**: Variable substitution errors
/// - **4000-4999**: Execution errors
/// - **5000-5999**: Internal/Configuration errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// COHORT-1001: Read replica unavailable
    ReplicaUnavailable = 1001,
    /// COHORT-1002: Connection checkout timed out
    ConnectionTimeout = 1002,
    /// COHORT-1003: Connection pool exhausted
    PoolExhausted = 1003,
    /// COHORT-1004: Could not establish a database connection
    ConnectionFailed = 1004,

    // === Validation Errors (2000-2999) ===
    /// COHORT-2001: Query text is blank
    BlankQuery = 2001,
    /// COHORT-2002: Query text exceeds the maximum length
    QueryTooLong = 2002,
    /// COHORT-2003: Query violates the required SELECT-id-FROM-users shape
    StructureViolation = 2003,
    /// COHORT-2004: Unbalanced parentheses
    UnbalancedParentheses = 2004,
    /// COHORT-2005: Forbidden keyword present
    ForbiddenKeyword = 2005,
    /// COHORT-2006: Suspicious lexical pattern present
    SuspiciousPattern = 2006,
    /// COHORT-2007: Referenced table is not on the allowlist
    UnauthorizedTable = 2007,

    // === Substitution Errors (3000-3999) ===
    /// COHORT-3001: Required variable has no binding and no default
    MissingVariable = 3001,
    /// COHORT-3002: Binding does not coerce to the declared type
    VariableTypeMismatch = 3002,
    /// COHORT-3003: Variable schema exceeds the maximum variable count
    TooManyVariables = 3003,
    /// COHORT-3004: Variable name or schema entry is malformed
    MalformedVariable = 3004,
    /// COHORT-3005: Rendered variable value exceeds the maximum length
    ValueTooLong = 3005,

    // === Execution Errors (4000-4999) ===
    /// COHORT-4001: Watchdog or server-side statement timeout
    QueryTimeout = 4001,
    /// COHORT-4002: Database rejected the final text as invalid SQL
    QuerySyntax = 4002,
    /// COHORT-4003: Database reported a non-timeout, non-syntax failure
    ExecutionFailed = 4003,
    /// COHORT-4004: EXPLAIN-based cost estimation failed
    EstimateFailed = 4004,
    /// COHORT-4005: Requested timeout is outside the permitted range
    InvalidTimeout = 4005,
    /// COHORT-4006: Requested result limit is invalid
    InvalidLimit = 4006,
    /// COHORT-4007: Definition is inactive and may not be executed
    DefinitionInactive = 4007,

    // === Internal Errors (5000-5999) ===
    /// COHORT-5001: Serialization/deserialization failed
    SerializationFailed = 5001,
    /// COHORT-5002: Configuration is invalid
    ConfigInvalid = 5002,
    /// COHORT-5003: Unexpected internal state
    InternalPanic = 5003,

    /// COHORT-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "COHORT-2005")
    pub fn as_str(&self) -> String {
        format!("COHORT-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Validation,
            3000..=3999 => ErrorCategory::Substitution,
            4000..=4999 => ErrorCategory::Execution,
            5000..=5999 => ErrorCategory::Internal,
            _ => ErrorCategory::Internal,
        }
    }

    /// True when the error never touched the database (safe to surface verbatim).
    pub fn is_local(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Substitution
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let numeric = value
            .strip_prefix("COHORT-")
            .ok_or_else(|| format!("Invalid error code format: {}", value))?;
        let n: u16 = numeric
            .parse()
            .map_err(|_| format!("Invalid error code number: {}", value))?;

        let code = match n {
            1001 => ErrorCode::ReplicaUnavailable,
            1002 => ErrorCode::ConnectionTimeout,
            1003 => ErrorCode::PoolExhausted,
            1004 => ErrorCode::ConnectionFailed,
            2001 => ErrorCode::BlankQuery,
            2002 => ErrorCode::QueryTooLong,
            2003 => ErrorCode::StructureViolation,
            2004 => ErrorCode::UnbalancedParentheses,
            2005 => ErrorCode::ForbiddenKeyword,
            2006 => ErrorCode::SuspiciousPattern,
            2007 => ErrorCode::UnauthorizedTable,
            3001 => ErrorCode::MissingVariable,
            3002 => ErrorCode::VariableTypeMismatch,
            3003 => ErrorCode::TooManyVariables,
            3004 => ErrorCode::MalformedVariable,
            3005 => ErrorCode::ValueTooLong,
            4001 => ErrorCode::QueryTimeout,
            4002 => ErrorCode::QuerySyntax,
            4003 => ErrorCode::ExecutionFailed,
            4004 => ErrorCode::EstimateFailed,
            4005 => ErrorCode::InvalidTimeout,
            4006 => ErrorCode::InvalidLimit,
            4007 => ErrorCode::DefinitionInactive,
            5001 => ErrorCode::SerializationFailed,
            5002 => ErrorCode::ConfigInvalid,
            5003 => ErrorCode::InternalPanic,
            _ => ErrorCode::Unknown,
        };
        Ok(code)
    }
}

/// Broad error categories matching the code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Validation,
    Substitution,
    Execution,
    Internal,
}
