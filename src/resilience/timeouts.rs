//! Timeout enforcement.
//!
//! Uses Tokio's timeout facilities. An elapsed deadline drops the in-flight
//! attempt and surfaces as [`QueryError::Timeout`], distinct from other failures.
//!
//! Deadlines run on tokio time, not on the client's [`Clock`](crate::clock::Clock).
//! A deadline has to fire while the attempt is still pending, which a
//! `ManualClock` that only moves when told to cannot do. Tests pause tokio
//! time to control it.

use std::future::Future;
use std::time::Duration;

use crate::error::{QueryError, QueryResult};

/// Run `operation` with a deadline. A zero `limit` disables the deadline.
pub async fn with_timeout<T, Fut>(limit: Duration, operation: Fut) -> QueryResult<T>
where
    Fut: Future<Output = QueryResult<T>>,
{
    if limit.is_zero() {
        return operation.await;
    }

    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_elapsed) => Err(QueryError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let result: QueryResult<()> = with_timeout(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(QueryError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables_deadline() {
        let result = with_timeout(Duration::ZERO, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(7)
        })
        .await;
        assert_eq!(result, Ok(7));
    }
}
