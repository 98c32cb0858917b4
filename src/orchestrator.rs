//! Starting and stopping resources.
//!
//! A batch of services is flattened into one resource list. Every resource
//! is started in order, then each is polled for readiness in the same order.
//! Stopping walks the flattened list backwards. Nothing runs concurrently
//! and nothing is rolled back when a step fails.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::{ResourceOp, StackError, StackResult};
use crate::progress::{ProgressSender, StackEvent};
use crate::registry::Tier;
use crate::resource::ResourceRef;
use crate::service::ServiceRef;

/// How often an unready resource is polled again.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options for [`crate::Instance::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Also stop infrastructure, after all ordinary services.
    pub include_infrastructure: bool,
    /// Services (or infrastructure) to leave running.
    pub exclude: Vec<String>,
}

impl StopOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_infrastructure(mut self) -> Self {
        self.include_infrastructure = true;
        self
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|n| n == name)
    }
}

/// Drives resource start, readiness polling and teardown.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    progress: Option<ProgressSender>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish [`StackEvent`]s to `sender` as well as logging them.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    fn emit(&self, event: StackEvent) {
        if let Some(progress) = &self.progress {
            progress.emit(event);
        }
    }

    /// Start infrastructure, wait for it, then start services and wait for
    /// them.
    pub async fn start(
        &self,
        ctx: &Context,
        infra: &[ServiceRef],
        services: &[ServiceRef],
    ) -> StackResult<()> {
        self.start_services(ctx, Tier::Infrastructure, infra).await?;
        self.start_services(ctx, Tier::Service, services).await?;
        self.emit(StackEvent::Done);
        Ok(())
    }

    /// Start one batch: every resource in order, then wait for each to be
    /// ready in the same order.
    pub async fn start_services(
        &self,
        ctx: &Context,
        tier: Tier,
        services: &[ServiceRef],
    ) -> StackResult<()> {
        if services.is_empty() {
            return Ok(());
        }
        info!(count = services.len(), %tier, "starting services");
        self.emit(StackEvent::Starting {
            tier,
            services: services.len(),
        });
        let resources = flatten(ctx, services);

        for resource in &resources {
            let id = resource.id();
            info!(resource = id, "starting");
            self.emit(StackEvent::ResourceStarting { id: id.to_string() });
            if let Err(source) = resource.start(ctx).await {
                self.emit(StackEvent::ResourceFailed {
                    id: id.to_string(),
                    op: ResourceOp::Start,
                });
                return Err(StackError::Resource {
                    op: ResourceOp::Start,
                    id: id.to_string(),
                    source,
                });
            }
        }

        info!(%tier, "waiting for ready");
        self.emit(StackEvent::WaitingForReady { tier });
        let mut ticker = tokio::time::interval(READY_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        for resource in &resources {
            self.wait_ready(ctx, resource, &mut ticker).await?;
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        ctx: &Context,
        resource: &ResourceRef,
        ticker: &mut tokio::time::Interval,
    ) -> StackResult<()> {
        let id = resource.id();
        self.emit(StackEvent::ResourceWaiting { id: id.to_string() });
        let mut attempts = 0u32;
        loop {
            match resource.ready(ctx).await {
                Ok(true) => {
                    info!(resource = id, attempts, "ready");
                    self.emit(StackEvent::ResourceReady { id: id.to_string() });
                    return Ok(());
                }
                Ok(false) => {}
                Err(source) => {
                    warn!(resource = id, error = %source, "ready check failed");
                    self.emit(StackEvent::ResourceFailed {
                        id: id.to_string(),
                        op: ResourceOp::Ready,
                    });
                    return Err(StackError::Resource {
                        op: ResourceOp::Ready,
                        id: id.to_string(),
                        source,
                    });
                }
            }
            attempts += 1;
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(ctx.err().unwrap_or_else(|| StackError::Cancelled {
                        cause: crate::context::CANCELED.to_string(),
                    }));
                }
                _ = ticker.tick() => {}
            }
        }
    }

    /// Stop the resources of `services` in reverse flattened order. The
    /// first failure aborts.
    pub async fn stop_services(&self, ctx: &Context, services: &[ServiceRef]) -> StackResult<()> {
        info!(count = services.len(), "stopping services");
        self.emit(StackEvent::Stopping {
            services: services.len(),
        });
        let mut resources = flatten(ctx, services);
        resources.reverse();
        for resource in &resources {
            let id = resource.id();
            info!(resource = id, "stopping");
            self.emit(StackEvent::ResourceStopping { id: id.to_string() });
            if let Err(source) = resource.stop(ctx).await {
                self.emit(StackEvent::ResourceFailed {
                    id: id.to_string(),
                    op: ResourceOp::Stop,
                });
                return Err(StackError::Resource {
                    op: ResourceOp::Stop,
                    id: id.to_string(),
                    source,
                });
            }
        }
        self.emit(StackEvent::Done);
        Ok(())
    }

    /// Resolve the stop list from the infra and service lists, then stop it.
    pub async fn stop(
        &self,
        ctx: &Context,
        infra: &[ServiceRef],
        services: &[ServiceRef],
        opts: &StopOptions,
    ) -> StackResult<()> {
        let mut targets: Vec<ServiceRef> = Vec::with_capacity(infra.len() + services.len());
        if opts.include_infrastructure {
            // infra started first, so reversing stops it last
            targets.extend(infra.iter().cloned());
        }
        targets.extend(services.iter().cloned());
        targets.retain(|svc| !opts.is_excluded(svc.name()));
        self.stop_services(ctx, &targets).await
    }
}

fn flatten(ctx: &Context, services: &[ServiceRef]) -> Vec<ResourceRef> {
    services.iter().flat_map(|svc| svc.resources(ctx)).collect()
}
