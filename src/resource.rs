//! The resource contract consumed by the orchestrator.
//!
//! A resource is the smallest startable unit with its own readiness signal:
//! a process, a container, a volume. The engine only ever calls the four
//! methods of [`Resource`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{UnitError, UnitResult};

/// A startable, stoppable unit with an independent readiness signal.
///
/// # Example
///
/// ```rust
/// use devstack::{async_trait, Context, Resource, UnitResult};
///
/// struct Noop;
///
/// #[async_trait]
/// impl Resource for Noop {
///     fn id(&self) -> &str {
///         "noop"
///     }
///
///     async fn start(&self, _ctx: &Context) -> UnitResult<()> {
///         Ok(())
///     }
///
///     async fn ready(&self, _ctx: &Context) -> UnitResult<bool> {
///         Ok(true)
///     }
///
///     async fn stop(&self, _ctx: &Context) -> UnitResult<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Resource: Send + Sync {
    /// Stable display identifier.
    fn id(&self) -> &str;

    async fn start(&self, ctx: &Context) -> UnitResult<()>;

    async fn ready(&self, ctx: &Context) -> UnitResult<bool>;

    async fn stop(&self, ctx: &Context) -> UnitResult<()>;
}

/// Shared handle to a resource.
pub type ResourceRef = Arc<dyn Resource>;

type ReadyFuture = Pin<Box<dyn Future<Output = UnitResult<bool>> + Send>>;

type ReadyFn = dyn Fn(Context) -> ReadyFuture + Send + Sync;

/// How often [`WaitResource::start`] re-checks readiness.
pub const WAIT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// A resource that blocks during start until its ready check passes.
///
/// The same check implements [`Resource::ready`]; stopping does nothing.
/// Useful to gate later resources on something not managed by the stack,
/// such as a port opened by an external tool.
pub struct WaitResource {
    id: String,
    ready: Box<ReadyFn>,
}

impl WaitResource {
    /// The check receives a clone of the calling context.
    pub fn new<F, Fut>(name: &str, ready: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitResult<bool>> + Send + 'static,
    {
        Self {
            id: format!("Wait/{name}"),
            ready: Box::new(move |ctx: Context| -> ReadyFuture { Box::pin(ready(ctx)) }),
        }
    }
}

impl std::fmt::Debug for WaitResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitResource").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Resource for WaitResource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, ctx: &Context) -> UnitResult<()> {
        let mut retry = tokio::time::interval(WAIT_RETRY_INTERVAL);
        retry.tick().await;
        loop {
            if (self.ready)(ctx.clone()).await? {
                return Ok(());
            }
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(UnitError::Cancelled(ctx.cause().unwrap_or_default()));
                }
                _ = retry.tick() => {}
            }
        }
    }

    async fn ready(&self, ctx: &Context) -> UnitResult<bool> {
        (self.ready)(ctx.clone()).await
    }

    async fn stop(&self, _ctx: &Context) -> UnitResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(passes_after: u32) -> (Arc<AtomicU32>, WaitResource) {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let resource = WaitResource::new("port", move |_ctx| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n >= passes_after) }
        });
        (calls, resource)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resource_start_blocks_until_ready() {
        let (calls, resource) = counting(3);
        assert_eq!(resource.id(), "Wait/port");

        resource.start(&Context::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(resource.ready(&Context::new()).await.unwrap());
        resource.stop(&Context::new()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resource_start_observes_cancellation() {
        let (_calls, resource) = counting(u32::MAX);
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel_with_cause("gave up");
        });

        let err = resource.start(&ctx).await.unwrap_err();
        assert!(matches!(err, UnitError::Cancelled(cause) if cause == "gave up"));
    }
}
