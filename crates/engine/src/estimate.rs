//! Cost estimation via execution-plan introspection.
//!
//! `EXPLAIN (FORMAT JSON)` gives per-node estimated row counts without
//! materializing any result. The walk takes the maximum `Plan Rows` across
//! the whole tree, which is an order-of-magnitude size signal: an
//! aggregation node may report one output row while its scan child reports
//! millions, and the scan is what the database will actually chew through.

use serde_json::Value;

/// Wrap a safety-checked query in the engine's plan facility.
pub fn explain_sql(query: &str) -> String {
    format!("EXPLAIN (FORMAT JSON) {query}")
}

/// Maximum estimated row count across all subplans of an EXPLAIN JSON
/// document. Unknown shapes contribute zero rather than failing.
pub fn max_plan_rows(value: &Value) -> u64 {
    match value {
        Value::Array(items) => items.iter().map(max_plan_rows).max().unwrap_or(0),
        Value::Object(map) => {
            let own = map
                .get("Plan Rows")
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
                .unwrap_or(0);
            let nested = map.values().map(max_plan_rows).max().unwrap_or(0);
            own.max(nested)
        }
        _ => 0,
    }
}
