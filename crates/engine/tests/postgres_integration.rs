//! End-to-end pipeline tests against a live Postgres.
//!
//! Set COHORT_TEST_DATABASE_URL to run these; without it each test skips so
//! the suite stays green on machines with no local database. The schema is
//! created and dropped per test under a throwaway table name.

use anyhow::Result;
use cohort_engine::{
    Bindings, ExecutionOptions, QueryDefinition, SegmentEngine, VariableSpec,
};
use cohort_common::config::{AppConfig, DatabaseSettings};
use secrecy::SecretString;
use serde_json::json;

fn test_database_url() -> Option<String> {
    std::env::var("COHORT_TEST_DATABASE_URL").ok()
}

fn test_config(url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.database = DatabaseSettings {
        url: SecretString::from(url.to_string()),
        ..Default::default()
    };
    config
}

fn definition(id: i64, query_text: &str, variables: Vec<VariableSpec>) -> QueryDefinition {
    QueryDefinition {
        id,
        name: format!("it_definition_{id}"),
        query_text: query_text.to_string(),
        variables,
        active: true,
        max_execution_time_ms: 30_000,
        last_executed_at: None,
        execution_count: 0,
    }
}

async fn seed(url: &str, ddl: &str) -> Result<()> {
    // Raw pool access is fine in tests; the pipeline under test never
    // issues DDL itself.
    let client = cohort_engine::ReplicaRouter::from_settings(&test_config(url).database)?
        .primary_client()
        .await?;
    client.batch_execute(ddl).await?;
    Ok(())
}

#[tokio::test]
async fn test_pipeline_selects_member_ids() -> Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("COHORT_TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    let engine = SegmentEngine::from_config(&test_config(&url))?;
    seed(
        &url,
        "DROP TABLE IF EXISTS users;
         CREATE TABLE users (id BIGINT PRIMARY KEY, username TEXT, registered_at TIMESTAMPTZ DEFAULT NOW());
         INSERT INTO users (id, username) VALUES (1, 'ada'), (2, 'grace'), (3, 'edsger');
         DROP TABLE IF EXISTS segment_queries;
         CREATE TABLE segment_queries (id BIGINT PRIMARY KEY, last_executed_at TIMESTAMPTZ, execution_count BIGINT DEFAULT 0);
         INSERT INTO segment_queries (id) VALUES (10);",
    )
    .await?;

    let def = definition(10, "SELECT id FROM users WHERE id > {{min_id}}", vec![
        VariableSpec {
            name: "min_id".to_string(),
            var_type: cohort_engine::VarType::Integer,
            required: true,
            default: None,
        },
    ]);

    let mut bindings = Bindings::new();
    bindings.insert("min_id".to_string(), json!(1));
    let outcome = engine
        .execute(
            &def,
            ExecutionOptions {
                bindings,
                ..Default::default()
            },
        )
        .await;

    assert!(outcome.is_ok(), "errors: {:?}", outcome.errors);
    let mut ids = outcome.member_ids;
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);

    let members = engine.hydrate(&ids).await?;
    assert_eq!(members.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_forbidden_text_never_reaches_the_database() -> Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("COHORT_TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    let engine = SegmentEngine::from_config(&test_config(&url))?;
    let def = definition(11, "DELETE FROM users", vec![]);

    let outcome = engine.execute(&def, ExecutionOptions::default()).await;
    assert!(!outcome.is_ok());
    assert!(outcome.errors.iter().any(|e| e.contains("Forbidden keyword")));
    Ok(())
}

#[tokio::test]
async fn test_watchdog_cancels_a_slow_query() -> Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("COHORT_TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    // pg_sleep is blocked by validation, so drive the timeout with a cross
    // join that cannot finish inside the budget.
    let engine = SegmentEngine::from_config(&test_config(&url))?;
    seed(
        &url,
        "DROP TABLE IF EXISTS articles;
         CREATE TABLE articles (id BIGINT, user_id BIGINT);
         INSERT INTO articles SELECT g, g FROM generate_series(1, 200000) g;",
    )
    .await?;

    let def = definition(
        12,
        "SELECT a.id FROM articles a JOIN articles b ON a.id <> b.id JOIN articles c ON b.id <> c.id",
        vec![],
    );
    let outcome = engine
        .execute(
            &def,
            ExecutionOptions {
                timeout_ms: Some(500),
                ..Default::default()
            },
        )
        .await;

    assert!(!outcome.is_ok());
    assert!(outcome.errors.iter().any(|e| e.contains("COHORT-4001")));
    Ok(())
}

#[tokio::test]
async fn test_estimate_count_reads_the_plan() -> Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("COHORT_TEST_DATABASE_URL not set, skipping");
        return Ok(());
    };

    let engine = SegmentEngine::from_config(&test_config(&url))?;
    seed(
        &url,
        "DROP TABLE IF EXISTS users;
         CREATE TABLE users (id BIGINT PRIMARY KEY, username TEXT, registered_at TIMESTAMPTZ DEFAULT NOW());
         INSERT INTO users (id, username) SELECT g, 'u' || g FROM generate_series(1, 5000) g;
         ANALYZE users;",
    )
    .await?;

    let def = definition(13, "SELECT id FROM users", vec![]);
    let estimate = engine.estimate_count(&def).await?;
    assert!(estimate > 0);
    Ok(())
}
