//! Definition bookkeeping and member hydration.
//!
//! The engine owns neither segment definitions nor member records; it only
//! writes back advisory bookkeeping after a successful run and, on request,
//! hydrates matched identifiers into member records. Both concerns sit
//! behind [`DefinitionStore`] so tests can run without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohort_error::{CohortError, Result};
use deadpool_postgres::Pool;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// A hydrated population member, as returned by `hydrate`.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    pub registered_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Record a successful execution: bump the counter and the last-executed
    /// timestamp. Advisory only; a lost update under a rare race is fine.
    async fn record_execution(&self, definition_id: i64) -> Result<()>;

    /// Look up member records for a set of identifiers. Pure lookup; order
    /// of the result is unspecified.
    async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Member>>;
}

/// Postgres-backed store over the primary pool.
pub struct PostgresDefinitionStore {
    pool: Pool,
}

impl PostgresDefinitionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefinitionStore for PostgresDefinitionStore {
    async fn record_execution(&self, definition_id: i64) -> Result<()> {
        let client = self.pool.get().await.map_err(CohortError::from)?;
        client
            .execute(
                "UPDATE segment_queries \
                 SET last_executed_at = NOW(), execution_count = execution_count + 1 \
                 WHERE id = $1",
                &[&definition_id],
            )
            .await
            .map_err(CohortError::from)?;
        Ok(())
    }

    async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Member>> {
        let client = self.pool.get().await.map_err(CohortError::from)?;
        let rows = client
            .query(
                "SELECT id, username, registered_at FROM users WHERE id = ANY($1)",
                &[&ids],
            )
            .await
            .map_err(CohortError::from)?;

        Ok(rows
            .iter()
            .map(|row| Member {
                id: row.get(0),
                username: row.get(1),
                registered_at: row.get(2),
            })
            .collect())
    }
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    executions: Mutex<HashMap<i64, i64>>,
    members: Mutex<HashMap<i64, Member>>,
}

impl InMemoryDefinitionStore {
    pub fn with_members(members: Vec<Member>) -> Self {
        Self {
            executions: Mutex::new(HashMap::new()),
            members: Mutex::new(members.into_iter().map(|m| (m.id, m)).collect()),
        }
    }

    pub fn execution_count(&self, definition_id: i64) -> i64 {
        self.executions
            .lock()
            .expect("executions lock")
            .get(&definition_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn record_execution(&self, definition_id: i64) -> Result<()> {
        *self
            .executions
            .lock()
            .expect("executions lock")
            .entry(definition_id)
            .or_insert(0) += 1;
        Ok(())
    }

    async fn hydrate(&self, ids: &[i64]) -> Result<Vec<Member>> {
        let members = self.members.lock().expect("members lock");
        Ok(ids.iter().filter_map(|id| members.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_counts_executions() {
        let store = InMemoryDefinitionStore::default();
        store.record_execution(9).await.unwrap();
        store.record_execution(9).await.unwrap();
        assert_eq!(store.execution_count(9), 2);
        assert_eq!(store.execution_count(1), 0);
    }

    #[tokio::test]
    async fn test_in_memory_hydrate_skips_unknown_ids() {
        let store = InMemoryDefinitionStore::with_members(vec![Member {
            id: 1,
            username: "ada".to_string(),
            registered_at: None,
        }]);
        let members = store.hydrate(&[1, 2]).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].username, "ada");
    }
}
