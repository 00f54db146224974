//! Sandboxed, timeout-bounded segment query execution.
//!
//! The executor is the only component that touches a database. Every run is
//! bounded twice: an in-process watchdog on a dedicated worker task, and
//! session-scoped server-side timeouts set before the query. The watchdog is
//! the primary cancellation signal; the statement timeout guarantees the
//! server kills the statement even if the watchdog's signal is lost.

use crate::definition::{
    Bindings, ExecutionOptions, ExecutionOutcome, QueryDefinition, ValidationReport,
};
use crate::estimate::{explain_sql, max_plan_rows};
use crate::router::{ReplicaHealth, ReplicaRouter};
use crate::store::{DefinitionStore, Member, PostgresDefinitionStore};
use crate::substitute::VariableSubstitutor;
use crate::validate::QueryValidator;
use cohort_common::config::{AppConfig, QueryLimits, RetrySettings, SafetySettings};
use cohort_common::retry::retry_async;
use cohort_common::scrubber::redact_query;
use cohort_error::{CohortError, ErrorCode, ErrorContext};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::Row;
use tracing::{info, warn};

/// Column names accepted as the member identifier in result rows.
const ID_COLUMN_ALIASES: &[&str] = &["id", "user_id", "member_id"];

/// Lock waits are capped independently of the statement budget; a segment
/// query has no business waiting on writers.
const MAX_LOCK_WAIT_MS: u64 = 10_000;

static LIMIT_CLAUSE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blimit\s+\d+").unwrap());

/// The public face of the query-safety pipeline.
///
/// Collaborators are constructor-injected; there is no process-global pool
/// handle, so tests and multi-tenant deployments can run several engines
/// with different configurations side by side.
pub struct SegmentEngine {
    router: ReplicaRouter,
    store: Arc<dyn DefinitionStore>,
    validator: QueryValidator,
    safety: SafetySettings,
    limits: QueryLimits,
    retry: RetrySettings,
}

impl SegmentEngine {
    pub fn new(router: ReplicaRouter, store: Arc<dyn DefinitionStore>, config: &AppConfig) -> Self {
        Self {
            validator: QueryValidator::from_settings(&config.safety),
            safety: config.safety.clone(),
            limits: config.limits,
            retry: config.retry,
            router,
            store,
        }
    }

    /// Build an engine wired to Postgres pools per the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, CohortError> {
        let router = ReplicaRouter::from_settings(&config.database)?;
        let store = Arc::new(PostgresDefinitionStore::new(router.primary_pool()));
        Ok(Self::new(router, store, config))
    }

    /// Authoring-time feedback on raw query text. No database access.
    pub fn validate(&self, raw_text: &str) -> ValidationReport {
        self.validator.validate(raw_text)
    }

    /// Authoring-time feedback on a definition's schema plus a candidate set
    /// of bindings. No database access.
    pub fn validate_variables(
        &self,
        definition: &QueryDefinition,
        bindings: &Bindings,
    ) -> ValidationReport {
        VariableSubstitutor::new(&self.validator, &self.safety)
            .validate_bindings(definition, bindings)
    }

    /// Replica status for operational checks.
    pub async fn replica_health(&self) -> ReplicaHealth {
        self.router.health().await
    }

    /// Execute a definition and return the deduplicated member identifiers.
    ///
    /// Any validation or substitution failure returns before a connection is
    /// opened. Execution failures are classified, logged with the definition
    /// identity and redacted query text, and surfaced as a generic tagged
    /// message with an empty identifier list.
    pub async fn execute(
        &self,
        definition: &QueryDefinition,
        options: ExecutionOptions,
    ) -> ExecutionOutcome {
        if !definition.active {
            let err = CohortError::new(
                ErrorCode::DefinitionInactive,
                format!("Definition '{}' is inactive", definition.name),
            );
            return ExecutionOutcome::failed(vec![err.public_message()]);
        }

        let timeout_ms = match resolve_timeout(&options, definition, &self.limits) {
            Ok(v) => v,
            Err(e) => return ExecutionOutcome::failed(vec![e.public_message()]),
        };
        let limit = match resolve_limit(&options, &self.limits) {
            Ok(v) => v,
            Err(e) => return ExecutionOutcome::failed(vec![e.public_message()]),
        };

        let substitutor = VariableSubstitutor::new(&self.validator, &self.safety);
        let text = match substitutor.substitute(definition, &options.bindings) {
            Ok(text) => text,
            Err(report) => return ExecutionOutcome::failed(report.messages()),
        };

        let bounded = apply_limit(&text, limit);

        match self.run_query(&bounded, timeout_ms, definition.id).await {
            Ok(member_ids) => {
                info!(
                    definition_id = definition.id,
                    matches = member_ids.len(),
                    "Segment execution completed"
                );
                self.record_bookkeeping(definition.id).await;
                ExecutionOutcome {
                    member_ids,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                warn!(
                    definition_id = definition.id,
                    code = %e.code,
                    query = %redact_query(&bounded),
                    "Segment execution failed: {e}"
                );
                ExecutionOutcome::failed(vec![e.public_message()])
            }
        }
    }

    /// Preview variant for authoring workflows: same pipeline, limit clamped
    /// to a small ceiling, defaults only for variables.
    pub async fn test_execute(&self, definition: &QueryDefinition, limit: u64) -> ExecutionOutcome {
        let clamped = limit.clamp(1, cohort_common::config::TEST_EXECUTE_LIMIT);
        self.execute(
            definition,
            ExecutionOptions {
                limit: Some(clamped),
                ..Default::default()
            },
        )
        .await
    }

    /// Order-of-magnitude cost estimate without materializing the result.
    ///
    /// Runs on the primary: plans are cheap and the replica is reserved for
    /// real reads.
    pub async fn estimate_count(
        &self,
        definition: &QueryDefinition,
    ) -> Result<u64, CohortError> {
        let substitutor = VariableSubstitutor::new(&self.validator, &self.safety);
        let text = substitutor
            .substitute(definition, &Bindings::new())
            .map_err(|report| {
                CohortError::new(ErrorCode::EstimateFailed, report.messages().join("; "))
            })?;
        let bounded = apply_limit(&text, self.limits.default_limit.min(self.limits.max_limit));

        let client = self.router.primary_client().await?;
        let sql = explain_sql(&bounded);
        let timeout_ms = self.limits.estimate_timeout_ms;

        let worker = tokio::spawn(async move {
            client.batch_execute(&session_timeouts(timeout_ms)).await?;
            let row = client.query_one(&sql, &[]).await?;
            row.try_get::<_, serde_json::Value>(0)
        });

        let plan = watchdog(worker, timeout_ms, definition.id).await?;
        Ok(max_plan_rows(&plan))
    }

    /// Hydrate matched identifiers into member records.
    pub async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Member>, CohortError> {
        self.store.hydrate(ids).await
    }

    async fn run_query(
        &self,
        sql: &str,
        timeout_ms: u64,
        definition_id: i64,
    ) -> Result<Vec<i64>, CohortError> {
        let (client, role) = self.router.read_client().await?;
        info!(definition_id, %role, timeout_ms, "Executing segment query");

        let sql = sql.to_string();
        let worker = tokio::spawn(async move {
            // Server-side line of defense, set before the statement runs.
            client.batch_execute(&session_timeouts(timeout_ms)).await?;
            client.query(&sql, &[]).await
        });

        let rows = watchdog(worker, timeout_ms, definition_id).await?;
        extract_ids(&rows)
    }

    async fn record_bookkeeping(&self, definition_id: i64) {
        let store = self.store.clone();
        let result = retry_async("record_execution", self.retry, || {
            let store = store.clone();
            async move { store.record_execution(definition_id).await }
        })
        .await;

        // Best effort only; the execution already succeeded.
        if let Err(e) = result {
            warn!(definition_id, "Bookkeeping update failed: {e}");
        }
    }
}

/// Wait on a worker task under a wall-clock deadline. An overrunning worker
/// is aborted and reported as a timeout; the server-side statement timeout
/// independently kills the underlying statement.
async fn watchdog<T: Send + 'static>(
    mut worker: JoinHandle<Result<T, tokio_postgres::Error>>,
    timeout_ms: u64,
    definition_id: i64,
) -> Result<T, CohortError> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut worker).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(db_err))) => Err(CohortError::from(db_err)),
        Ok(Err(join_err)) => Err(CohortError::new(
            ErrorCode::InternalPanic,
            format!("Query worker failed: {join_err}"),
        )),
        Err(_elapsed) => {
            worker.abort();
            Err(CohortError::new(
                ErrorCode::QueryTimeout,
                format!("Query exceeded the {timeout_ms}ms watchdog deadline"),
            )
            .with_context(ErrorContext::Timeout {
                timeout_ms,
                definition_id: Some(definition_id),
            }))
        }
    }
}

/// Session-scoped timeouts applied to every checkout before the query. The
/// idle-in-transaction bound is a multiple of the statement bound so an
/// abandoned transaction cannot outlive its statement budget by much.
fn session_timeouts(statement_ms: u64) -> String {
    format!(
        "SET statement_timeout = {statement_ms}; \
         SET lock_timeout = {lock_ms}; \
         SET idle_in_transaction_session_timeout = {idle_ms}",
        lock_ms = statement_ms.min(MAX_LOCK_WAIT_MS),
        idle_ms = statement_ms.saturating_mul(2),
    )
}

/// Bound the result size irrespective of what the author wrote: an existing
/// LIMIT clause is replaced, otherwise one is appended.
fn apply_limit(text: &str, limit: u64) -> String {
    let clause = format!("LIMIT {limit}");
    if LIMIT_CLAUSE_REGEX.is_match(text) {
        LIMIT_CLAUSE_REGEX.replace(text, clause.as_str()).into_owned()
    } else {
        let trimmed = text.trim_end().trim_end_matches(';');
        format!("{trimmed} {clause}")
    }
}

fn resolve_timeout(
    options: &ExecutionOptions,
    definition: &QueryDefinition,
    limits: &QueryLimits,
) -> Result<u64, CohortError> {
    let requested = options
        .timeout_ms
        .unwrap_or(definition.max_execution_time_ms);
    if requested == 0 || requested > limits.max_timeout_ms {
        return Err(CohortError::new(
            ErrorCode::InvalidTimeout,
            format!(
                "Timeout must be between 1 and {} ms, got {requested}",
                limits.max_timeout_ms
            ),
        )
        .with_context(ErrorContext::Bound {
            requested,
            minimum: 1,
            maximum: limits.max_timeout_ms,
        }));
    }
    Ok(requested)
}

/// Limits fail closed at zero but clamp above the ceiling: an oversized
/// request still runs, just bounded.
fn resolve_limit(options: &ExecutionOptions, limits: &QueryLimits) -> Result<u64, CohortError> {
    let requested = options.limit.unwrap_or(limits.default_limit);
    if requested == 0 {
        return Err(CohortError::new(
            ErrorCode::InvalidLimit,
            format!("Limit must be between 1 and {}, got 0", limits.max_limit),
        )
        .with_context(ErrorContext::Bound {
            requested,
            minimum: 1,
            maximum: limits.max_limit,
        }));
    }
    Ok(requested.min(limits.max_limit))
}

/// Pull the identifier column out of result rows, accepting a small set of
/// aliases, and deduplicate. Order is not preserved; uniqueness is the only
/// guarantee.
fn extract_ids(rows: &[Row]) -> Result<Vec<i64>, CohortError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let idx = first
        .columns()
        .iter()
        .position(|c| ID_COLUMN_ALIASES.contains(&c.name()))
        .ok_or_else(|| {
            CohortError::new(
                ErrorCode::ExecutionFailed,
                "Result rows carry no identifier column",
            )
        })?;

    let mut ids = HashSet::new();
    for row in rows {
        let id = if *row.columns()[idx].type_() == Type::INT4 {
            i64::from(row.try_get::<_, i32>(idx).map_err(CohortError::from)?)
        } else {
            row.try_get::<_, i64>(idx).map_err(CohortError::from)?
        };
        ids.insert(id);
    }
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> QueryLimits {
        QueryLimits::default()
    }

    fn options(timeout_ms: Option<u64>, limit: Option<u64>) -> ExecutionOptions {
        ExecutionOptions {
            timeout_ms,
            limit,
            bindings: Bindings::new(),
        }
    }

    fn definition() -> QueryDefinition {
        QueryDefinition {
            id: 1,
            name: "everyone".to_string(),
            query_text: "SELECT id FROM users".to_string(),
            variables: Vec::new(),
            active: true,
            max_execution_time_ms: 30_000,
            last_executed_at: None,
            execution_count: 0,
        }
    }

    #[test]
    fn test_apply_limit_appends_when_absent() {
        assert_eq!(
            apply_limit("SELECT id FROM users", 500),
            "SELECT id FROM users LIMIT 500"
        );
    }

    #[test]
    fn test_apply_limit_strips_trailing_semicolon() {
        assert_eq!(
            apply_limit("SELECT id FROM users;", 500),
            "SELECT id FROM users LIMIT 500"
        );
    }

    #[test]
    fn test_apply_limit_replaces_author_limit() {
        assert_eq!(
            apply_limit("SELECT id FROM users LIMIT 999999", 500),
            "SELECT id FROM users LIMIT 500"
        );
    }

    #[test]
    fn test_oversized_limit_is_clamped_not_rejected() {
        let resolved = resolve_limit(&options(None, Some(1_000_000)), &limits()).unwrap();
        assert_eq!(resolved, 100_000);
    }

    #[test]
    fn test_zero_limit_fails_closed() {
        let err = resolve_limit(&options(None, Some(0)), &limits()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidLimit);
    }

    #[test]
    fn test_default_limit_used_when_unspecified() {
        let resolved = resolve_limit(&options(None, None), &limits()).unwrap();
        assert_eq!(resolved, 10_000);
    }

    #[test]
    fn test_timeout_defaults_to_definition_budget() {
        let resolved = resolve_timeout(&options(None, None), &definition(), &limits()).unwrap();
        assert_eq!(resolved, 30_000);
    }

    #[test]
    fn test_timeout_override_honored_within_bounds() {
        let resolved =
            resolve_timeout(&options(Some(5_000), None), &definition(), &limits()).unwrap();
        assert_eq!(resolved, 5_000);
    }

    #[test]
    fn test_out_of_range_timeout_fails_closed() {
        for bad in [0, 300_001] {
            let err =
                resolve_timeout(&options(Some(bad), None), &definition(), &limits()).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidTimeout, "accepted {bad}");
        }
    }

    #[test]
    fn test_session_timeouts_cover_all_three_bounds() {
        let sql = session_timeouts(30_000);
        assert!(sql.contains("SET statement_timeout = 30000"));
        assert!(sql.contains("SET lock_timeout = 10000"));
        assert!(sql.contains("SET idle_in_transaction_session_timeout = 60000"));
    }

    #[test]
    fn test_lock_timeout_tracks_short_statement_budget() {
        let sql = session_timeouts(2_000);
        assert!(sql.contains("SET lock_timeout = 2000"));
    }

    #[tokio::test]
    async fn test_rejected_text_yields_tagged_outcome_errors() {
        // Pool construction is lazy, and a rejected query never opens a
        // connection, so no database is needed here.
        let engine = SegmentEngine::from_config(&AppConfig::default()).unwrap();
        let mut def = definition();
        def.query_text = "DELETE FROM users".to_string();

        let outcome = engine.execute(&def, options(None, None)).await;
        assert!(!outcome.is_ok());
        assert!(outcome.errors.iter().all(|e| e.starts_with("[COHORT-")));
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("COHORT-2005") && e.contains("DELETE")));
    }
}
