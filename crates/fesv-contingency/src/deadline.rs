//! Store call deadlines.
//!
//! Dropping a timed-out future drops its open transaction, which rolls back.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::error::{ContingencyError, ContingencyResult};

pub(crate) async fn store<T, F>(limit: Duration, operation: &'static str, fut: F) -> ContingencyResult<T>
where
    F: Future<Output = ContingencyResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?limit, "Store operation timed out");
            Err(ContingencyError::StoreTimeout(limit))
        }
    }
}
