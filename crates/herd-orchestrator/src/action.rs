//! Actions: what to do on one host

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use herd_core::traits::Host;
use tokio_util::sync::CancellationToken;

/// Behavior applied to one host under a cancellable run.
///
/// An action is stateless with respect to the group; it may read and write
/// the host's variables. When `cancel` fires the action should stop
/// promptly, since the group waits for every action to return.
#[async_trait]
pub trait Action: Send + Sync {
    async fn apply(&self, cancel: CancellationToken, host: Arc<dyn Host>) -> anyhow::Result<()>;
}

/// An [`Action`] backed by an async closure
pub struct FnAction<F> {
    f: F,
}

/// Wrap an async closure as an [`Action`]
pub fn from_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(CancellationToken, Arc<dyn Host>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnAction { f }
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(CancellationToken, Arc<dyn Host>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn apply(&self, cancel: CancellationToken, host: Arc<dyn Host>) -> anyhow::Result<()> {
        (self.f)(cancel, host).await
    }
}
