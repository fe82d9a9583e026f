//! Per-request caller context.
//!
//! Services never look up the session themselves: the HTTP layer builds a
//! [`RequestContext`] from the verified token and threads it through every call.
//! The context also carries the request deadline that bounds each store and
//! blob call made on the caller's behalf.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::auth::model::AuthenticatedUser;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated account id of the caller
    pub caller_id: String,
    /// Community (tenancy) the caller is acting in
    pub community_id: Uuid,
    deadline: Instant,
}

impl RequestContext {
    pub fn new(caller_id: impl Into<String>, community_id: Uuid, timeout: Duration) -> Self {
        Self {
            caller_id: caller_id.into(),
            community_id,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn for_user(user: &AuthenticatedUser, timeout: Duration) -> Self {
        Self::new(user.account_id.clone(), user.community_id, timeout)
    }

    /// Run a dependency call, failing with a retryable timeout once the
    /// request deadline has passed.
    pub async fn bound<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} did not complete before the request deadline",
                operation
            ))),
        }
    }
}
