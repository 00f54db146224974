//! Static validation of raw segment query text.
//!
//! The validator is deliberately heuristic: there is no SQL grammar parser
//! here, only layered lexical and structural checks. Each layer is
//! individually bypassable by sufficiently obscure syntax, which is why the
//! executor pairs this with post-substitution re-validation and server-side
//! statement timeouts rather than trusting any single gate.
//!
//! All checks accumulate into one [`ValidationReport`] instead of
//! short-circuiting, so an author sees every problem in a single pass.

use crate::definition::ValidationReport;
use cohort_common::config::SafetySettings;
use cohort_error::{find_closest_match, CohortError, ErrorCode, ErrorContext};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Write/DDL/admin verbs that end a query's chances immediately, matched on
/// word boundaries to avoid substring false positives (OFFSET vs SET).
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "CALL",
    "MERGE",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "SET",
    "COPY",
];

static FORBIDDEN_KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    let alternation = FORBIDDEN_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b({})\b", alternation)).unwrap()
});

/// Modifying verbs re-checked independently of the keyword denylist.
static MODIFYING_KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|drop|truncate|alter|create|grant|revoke)\b").unwrap()
});

/// Lexical patterns that indicate stacked statements, comment smuggling,
/// catalog snooping, or timing side channels.
static SUSPICIOUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r";\s*\S").unwrap(), "multiple statements"),
        (Regex::new(r"--").unwrap(), "line comment"),
        (Regex::new(r"/\*").unwrap(), "block comment"),
        (
            Regex::new(r"(?i)\binformation_schema\b|\bpg_catalog\b|\bpg_shadow\b|\bpg_roles\b|\bmysql\.")
                .unwrap(),
            "system schema reference",
        ),
        (
            Regex::new(r"(?i)\bpg_sleep\b|\bsleep\s*\(|\bbenchmark\s*\(").unwrap(),
            "timing function",
        ),
        (
            Regex::new(r"(?i)\bprepare\b|\bdeallocate\b").unwrap(),
            "dynamic execution",
        ),
        (
            Regex::new(r"(?i)\bxp_\w+|\bsp_\w+").unwrap(),
            "extended procedure",
        ),
    ]
});

static PROJECTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)^\s*select\s+(?:distinct\s+)?(.*?)\s+from\b").unwrap());

static ID_COLUMN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:\w+\.)?id\b").unwrap());

static USERS_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\busers\b").unwrap());

/// Table identifiers following FROM/JOIN tokens (LEFT/RIGHT/INNER qualifiers
/// all end in JOIN, so one token suffices).
static TABLE_REF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)")
        .unwrap()
});

/// Pure structural and lexical validator for segment query text.
///
/// Holds no mutable state; validating the same text twice yields identical
/// reports.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    allowed_tables: HashSet<String>,
    allowed_sorted: Vec<String>,
    max_length: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::from_settings(&SafetySettings::default())
    }
}

impl QueryValidator {
    pub fn new(allowed_tables: impl IntoIterator<Item = String>, max_length: usize) -> Self {
        let allowed_tables: HashSet<String> = allowed_tables
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        let mut allowed_sorted: Vec<String> = allowed_tables.iter().cloned().collect();
        allowed_sorted.sort();
        Self {
            allowed_tables,
            allowed_sorted,
            max_length,
        }
    }

    pub fn from_settings(settings: &SafetySettings) -> Self {
        Self::new(settings.allowed_tables.clone(), settings.max_query_length)
    }

    pub fn allowed_tables(&self) -> &[String] {
        &self.allowed_sorted
    }

    /// Validate raw query text against every safety rule, accumulating all
    /// failures.
    pub fn validate(&self, text: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        if text.trim().is_empty() {
            report.push(CohortError::new(
                ErrorCode::BlankQuery,
                "Query cannot be blank",
            ));
            return report;
        }

        if text.len() > self.max_length {
            report.push(CohortError::new(
                ErrorCode::QueryTooLong,
                format!(
                    "Query exceeds maximum length of {} characters",
                    self.max_length
                ),
            ));
        }

        self.check_structure(text, &mut report);
        self.check_parentheses(text, &mut report);
        self.check_forbidden_keywords(text, &mut report);
        self.check_suspicious_patterns(text, &mut report);
        self.check_table_allowlist(text, &mut report);

        // Redundant read-only re-check. Overlaps the keyword denylist on
        // purpose: the two rules must fail independently.
        if MODIFYING_KEYWORD_REGEX.is_match(text) {
            report.push(CohortError::new(
                ErrorCode::StructureViolation,
                "Query must be read-only",
            ));
        }

        report
    }

    fn check_structure(&self, text: &str, report: &mut ValidationReport) {
        if !text.trim_start().to_uppercase().starts_with("SELECT") {
            report.push(CohortError::new(
                ErrorCode::StructureViolation,
                "Query must start with SELECT",
            ));
        }

        if !USERS_TABLE_REGEX.is_match(text) {
            report.push(CohortError::new(
                ErrorCode::StructureViolation,
                "Query must reference the users table",
            ));
        }

        match PROJECTION_REGEX.captures(text) {
            Some(caps) if ID_COLUMN_REGEX.is_match(&caps[1]) || caps[1].contains('*') => {}
            _ => report.push(CohortError::new(
                ErrorCode::StructureViolation,
                "Query must select the id column",
            )),
        }
    }

    fn check_parentheses(&self, text: &str, report: &mut ValidationReport) {
        let mut depth: i64 = 0;
        for c in text.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            report.push(CohortError::new(
                ErrorCode::UnbalancedParentheses,
                "Query has unbalanced parentheses",
            ));
        }
    }

    fn check_forbidden_keywords(&self, text: &str, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for caps in FORBIDDEN_KEYWORD_REGEX.captures_iter(text) {
            let keyword = caps[1].to_uppercase();
            if seen.insert(keyword.clone()) {
                report.push(
                    CohortError::new(
                        ErrorCode::ForbiddenKeyword,
                        format!("Forbidden keyword: {keyword}"),
                    )
                    .with_context(ErrorContext::ForbiddenKeyword { keyword }),
                );
            }
        }
    }

    fn check_suspicious_patterns(&self, text: &str, report: &mut ValidationReport) {
        for (pattern, label) in SUSPICIOUS_PATTERNS.iter() {
            if pattern.is_match(text) {
                report.push(CohortError::new(
                    ErrorCode::SuspiciousPattern,
                    format!("Suspicious pattern: {label}"),
                ));
            }
        }
    }

    fn check_table_allowlist(&self, text: &str, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for caps in TABLE_REF_REGEX.captures_iter(text) {
            let raw = caps[1].to_lowercase();
            // Schema-qualified names resolve to their bare table name.
            let table = raw.strip_prefix("public.").unwrap_or(&raw).to_string();
            if self.allowed_tables.contains(&table) || !seen.insert(table.clone()) {
                continue;
            }
            let mut err = CohortError::new(
                ErrorCode::UnauthorizedTable,
                format!("Unauthorized table: '{table}'"),
            );
            if let Some(suggestion) = find_closest_match(&table, &self.allowed_sorted) {
                err = err.with_hint(format!("did you mean '{suggestion}'?"));
            }
            report.push(err.with_context(ErrorContext::UnauthorizedTable {
                table,
                allowed_tables: self.allowed_sorted.clone(),
            }));
        }
    }
}
