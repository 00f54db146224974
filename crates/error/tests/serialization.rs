use cohort_error::{CohortError, ErrorCode, ErrorContext};
use serde_json::Value;

#[test]
fn test_json_serialization() {
    let error = CohortError::new(
        ErrorCode::UnauthorizedTable,
        "Unauthorized table: 'payment_methods'",
    )
    .with_context(ErrorContext::UnauthorizedTable {
        table: "payment_methods".to_string(),
        allowed_tables: vec!["users".to_string(), "profiles".to_string()],
    })
    .with_hint("Only allowlisted tables may be referenced");

    let json = error.to_json();

    let v: Value = serde_json::from_str(&json).expect("valid json");

    assert_eq!(v["code"], "COHORT-2007");
    assert_eq!(v["message"], "Unauthorized table: 'payment_methods'");
    assert_eq!(v["hint"], "Only allowlisted tables may be referenced");
    assert_eq!(v["context"]["type"], "unauthorized_table");
    assert_eq!(v["context"]["table"], "payment_methods");
}

#[test]
fn test_error_code_parsing() {
    let code: ErrorCode = "COHORT-1003".to_string().try_into().unwrap();
    assert_eq!(code, ErrorCode::PoolExhausted);
}

#[test]
fn test_roundtrip_deserialization() {
    let error = CohortError::new(ErrorCode::QueryTimeout, "Watchdog fired")
        .with_context(ErrorContext::Timeout {
            timeout_ms: 30_000,
            definition_id: Some(42),
        });

    let json = error.to_json();
    let back: CohortError = serde_json::from_str(&json).unwrap();

    assert_eq!(back.code, ErrorCode::QueryTimeout);
    match back.context {
        Some(ErrorContext::Timeout {
            timeout_ms,
            definition_id,
        }) => {
            assert_eq!(timeout_ms, 30_000);
            assert_eq!(definition_id, Some(42));
        }
        _ => panic!("Expected Timeout context"),
    }
}
