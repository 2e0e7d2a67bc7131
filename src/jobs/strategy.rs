//! Handler wrappers that change how executions of one handler interact.
//!
//! Each wrapper keeps the wrapped handler's description and kind, so it can
//! be registered in its place.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::jobs::context::JobContext;
use crate::jobs::error::JobError;
use crate::jobs::handler::{HandlerKind, JobHandler};
use crate::jobs::types::JobDescription;

/// Run at most one execution of `handler` at a time.
pub fn serialize<H>(handler: H) -> ConcurrencyLimited<H>
where
    H: JobHandler,
{
    limit_concurrency(handler, 1)
}

/// Run at most `max` executions of `handler` at once; the rest wait their
/// turn (still `Started`) and abort if stopped while waiting.
pub fn limit_concurrency<H>(handler: H, max: usize) -> ConcurrencyLimited<H>
where
    H: JobHandler,
{
    ConcurrencyLimited {
        permits: Arc::new(Semaphore::new(max.max(1))),
        inner: handler,
    }
}

/// Cache successful results per argument; a repeated argument returns the
/// cached value without running `handler`.
///
/// Entries are never evicted. Call [`Memoized::clear`] to reset the cache
/// when the set of distinct arguments is unbounded.
pub fn memoize<H>(handler: H) -> Memoized<H>
where
    H: JobHandler,
{
    Memoized {
        cache: DashMap::new(),
        inner: handler,
    }
}

pub struct ConcurrencyLimited<H> {
    permits: Arc<Semaphore>,
    inner: H,
}

impl<H> ConcurrencyLimited<H> {
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<H> JobHandler for ConcurrencyLimited<H>
where
    H: JobHandler,
{
    fn description(&self) -> &JobDescription {
        self.inner.description()
    }

    fn kind(&self) -> HandlerKind {
        self.inner.kind()
    }

    async fn invoke(&self, argument: JsonValue, ctx: JobContext) -> anyhow::Result<JsonValue> {
        let _permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(JobError::Aborted {
                    job: ctx.job_name().to_string(),
                }
                .into());
            }
            permit = self.permits.acquire() => permit?,
        };

        self.inner.invoke(argument, ctx).await
    }
}

pub struct Memoized<H> {
    cache: DashMap<String, JsonValue>,
    inner: H,
}

impl<H> Memoized<H> {
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl<H> JobHandler for Memoized<H>
where
    H: JobHandler,
{
    fn description(&self) -> &JobDescription {
        self.inner.description()
    }

    fn kind(&self) -> HandlerKind {
        self.inner.kind()
    }

    async fn invoke(&self, argument: JsonValue, ctx: JobContext) -> anyhow::Result<JsonValue> {
        // serde_json keeps object keys sorted, so equal values share a key
        let key = argument.to_string();

        if let Some(cached) = self.cache.get(&key) {
            debug!(job = %ctx.job_name(), "Returning memoized result");
            return Ok(cached.clone());
        }

        let value = self.inner.invoke(argument, ctx).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }
}
