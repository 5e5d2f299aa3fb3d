//! Bounded retries around an [`OrderLookup`].
//!
//! Only a closed set of gRPC codes is considered transient. Backoff sleeps
//! race against the caller's token; if the token wins, the error from the
//! last attempt is returned rather than a cancellation, so callers still see
//! why the upstream call failed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::IntCounterVec;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};
use tracing::warn;

use crate::clock::Clock;
use crate::models::order::Order;
use crate::upstream::OrderLookup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based):
    /// `min(base << (attempt - 1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub fn is_transient(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::ResourceExhausted | Code::Unavailable | Code::DeadlineExceeded
    )
}

pub struct RetryingOrderLookup {
    inner: Arc<dyn OrderLookup>,
    policy: RetryPolicy,
    retries: IntCounterVec,
    clock: Arc<dyn Clock>,
}

impl RetryingOrderLookup {
    /// Wraps `inner`; no inner client means no gateway, and callers skip
    /// enrichment.
    pub fn wrap(
        inner: Option<Arc<dyn OrderLookup>>,
        policy: RetryPolicy,
        retries: IntCounterVec,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        inner.map(|inner| Self {
            inner,
            policy,
            retries,
            clock,
        })
    }

    async fn call<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        method: &'static str,
        mut op: F,
    ) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_transient(&err) || attempt >= max_attempts || ctx.is_cancelled() {
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            self.retries.with_label_values(&[method]).inc();
            warn!(
                method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying order service call"
            );

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(err),
                _ = self.clock.sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[async_trait]
impl OrderLookup for RetryingOrderLookup {
    async fn get_by_id(&self, ctx: &CancellationToken, id: &str) -> Result<Order, Status> {
        self.call(ctx, "get_by_id", || self.inner.get_by_id(ctx, id))
            .await
    }

    async fn list_from(
        &self,
        ctx: &CancellationToken,
        from: DateTime<Utc>,
    ) -> Result<Vec<Order>, Status> {
        self.call(ctx, "list_from", || self.inner.list_from(ctx, from))
            .await
    }
}
