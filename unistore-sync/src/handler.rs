use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use unistore_types::SyncEvent;

/// A subscriber to one or more event types.
///
/// Handlers must be idempotent: an event may be delivered more than once
/// when an earlier attempt failed, timed out, or is replayed from the
/// dead-letter list.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Stable name used in logs, delivery reports and dead letters.
    fn name(&self) -> &str;

    async fn handle(&self, event: &SyncEvent) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`SyncHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> SyncHandler for FnHandler<F>
where
    F: Fn(SyncEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &SyncEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wraps `f` as a named handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn SyncHandler>
where
    F: Fn(SyncEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { name: name.into(), f })
}
