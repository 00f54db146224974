use crate::{CohortError, ErrorCode};
use tokio_postgres::error::SqlState;

/// Classify a driver error into the timeout / syntax / other taxonomy.
///
/// SQLSTATE 57014 is raised by `statement_timeout`, 55P03 by `lock_timeout`
/// and 25P06/25P03 by the idle-in-transaction timeout, so all of them count
/// as timeouts. Class 42 covers syntax and access-rule violations that the
/// heuristic validator can always miss.
impl From<tokio_postgres::Error> for CohortError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = match err.code() {
            Some(state)
                if *state == SqlState::QUERY_CANCELED
                    || *state == SqlState::LOCK_NOT_AVAILABLE
                    || *state == SqlState::IDLE_IN_TRANSACTION_SESSION_TIMEOUT =>
            {
                ErrorCode::QueryTimeout
            }
            Some(state) if state.code().starts_with("42") => ErrorCode::QuerySyntax,
            Some(_) => ErrorCode::ExecutionFailed,
            None if err.is_closed() => ErrorCode::ConnectionFailed,
            None => ErrorCode::ExecutionFailed,
        };
        CohortError::new(code, err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for CohortError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        use deadpool_postgres::PoolError;
        match err {
            PoolError::Timeout(_) => CohortError::new(
                ErrorCode::PoolExhausted,
                "Timed out waiting for a pooled connection",
            ),
            PoolError::Backend(e) => {
                CohortError::new(ErrorCode::ConnectionFailed, e.to_string())
            }
            PoolError::Closed => {
                CohortError::new(ErrorCode::ConnectionFailed, "Connection pool is closed")
            }
            other => CohortError::new(ErrorCode::ConnectionFailed, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CohortError {
    fn from(err: serde_json::Error) -> Self {
        CohortError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

/// Levenshtein-based suggestion, used to hint the closest allowlisted table
/// when a query references an unauthorized one.
pub fn find_closest_match(target: &str, options: &[String]) -> Option<String> {
    let mut best_match: Option<&str> = None;
    let mut min_distance = usize::MAX;

    for option in options {
        let distance = levenshtein(target, option);
        if distance < min_distance && distance <= 3 {
            min_distance = distance;
            best_match = Some(option.as_str());
        }
    }

    best_match.map(|s| s.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let len_a = a.len();
    let len_b = b.len();
    let mut dp = vec![vec![0; len_b + 1]; len_a + 1];

    for (i, row) in dp.iter_mut().enumerate().take(len_a + 1) {
        row[0] = i;
    }
    for (j, val) in dp[0].iter_mut().enumerate().take(len_b + 1) {
        *val = j;
    }

    for i in 1..=len_a {
        for j in 1..=len_b {
            let cost = if a.chars().nth(i - 1) == b.chars().nth(j - 1) {
                0
            } else {
                1
            };
            dp[i][j] = std::cmp::min(
                std::cmp::min(dp[i - 1][j] + 1, dp[i][j - 1] + 1),
                dp[i - 1][j - 1] + cost,
            );
        }
    }

    dp[len_a][len_b]
}
