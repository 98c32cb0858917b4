//! Pre-start hooks.
//!
//! Hooks are registered as factories while customizing. Every start run
//! builds fresh hook instances and drives them through four stages:
//!
//! 1. `load_services` on every hook, which may still add stack entries
//! 2. `before_services` on every hook, with the final infra/service lists
//! 3. `service` for every service (in service order), on every hook
//! 4. `after_services` on every hook
//!
//! Hooks always run in registration order. The first error aborts the run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::{RegistryError, RegistryResult, StackError, StackResult, UnitResult};
use crate::gate::Gate;
use crate::registry::{StackLoader, StackRegistry};
use crate::service::{Service, ServiceRef};

/// An extension point invoked once per start run, before any resource is
/// started. Every stage is optional.
///
/// A hook instance lives for exactly one run, so it may keep state between
/// its own stages.
///
/// # Example
///
/// ```rust
/// use devstack::{async_trait, Context, PreStartHook, Service, UnitResult};
///
/// #[derive(Default)]
/// struct CountServices {
///     seen: usize,
/// }
///
/// #[async_trait]
/// impl PreStartHook for CountServices {
///     async fn service(&mut self, _ctx: &Context, _svc: &dyn Service) -> UnitResult<()> {
///         self.seen += 1;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PreStartHook: Send {
    /// Populate stack entries just in time.
    async fn load_services(
        &mut self,
        _ctx: &Context,
        _loader: &mut StackLoader<'_>,
    ) -> UnitResult<()> {
        Ok(())
    }

    async fn before_services(
        &mut self,
        _ctx: &Context,
        _infra: &[ServiceRef],
        _services: &[ServiceRef],
    ) -> UnitResult<()> {
        Ok(())
    }

    /// Called once per ordinary service. Infrastructure is not visited.
    async fn service(&mut self, _ctx: &Context, _service: &dyn Service) -> UnitResult<()> {
        Ok(())
    }

    async fn after_services(
        &mut self,
        _ctx: &Context,
        _infra: &[ServiceRef],
        _services: &[ServiceRef],
    ) -> UnitResult<()> {
        Ok(())
    }
}

type LoadFn = dyn Fn(&Context, &mut StackLoader<'_>) -> UnitResult<()> + Send + Sync;
type BatchFn = dyn Fn(&Context, &[ServiceRef], &[ServiceRef]) -> UnitResult<()> + Send + Sync;
type ServiceFn = dyn Fn(&Context, &dyn Service) -> UnitResult<()> + Send + Sync;

/// A stateless hook assembled from plain closures.
///
/// # Example
///
/// ```rust
/// use devstack::HookFuncs;
///
/// let hook = HookFuncs::new().service(|_ctx, svc| {
///     tracing::info!(service = svc.name(), "about to start");
///     Ok(())
/// });
/// ```
#[derive(Clone, Default)]
pub struct HookFuncs {
    load: Option<Arc<LoadFn>>,
    before: Option<Arc<BatchFn>>,
    service: Option<Arc<ServiceFn>>,
    after: Option<Arc<BatchFn>>,
}

impl HookFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_services(
        mut self,
        f: impl Fn(&Context, &mut StackLoader<'_>) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.load = Some(Arc::new(f));
        self
    }

    pub fn before_services(
        mut self,
        f: impl Fn(&Context, &[ServiceRef], &[ServiceRef]) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn service(
        mut self,
        f: impl Fn(&Context, &dyn Service) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.service = Some(Arc::new(f));
        self
    }

    pub fn after_services(
        mut self,
        f: impl Fn(&Context, &[ServiceRef], &[ServiceRef]) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Arc::new(f));
        self
    }

    /// True when no stage has a closure.
    pub fn is_empty(&self) -> bool {
        self.load.is_none()
            && self.before.is_none()
            && self.service.is_none()
            && self.after.is_none()
    }
}

impl std::fmt::Debug for HookFuncs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookFuncs")
            .field("load_services", &self.load.is_some())
            .field("before_services", &self.before.is_some())
            .field("service", &self.service.is_some())
            .field("after_services", &self.after.is_some())
            .finish()
    }
}

#[async_trait]
impl PreStartHook for HookFuncs {
    async fn load_services(&mut self, ctx: &Context, loader: &mut StackLoader<'_>) -> UnitResult<()> {
        match &self.load {
            Some(f) => f(ctx, loader),
            None => Ok(()),
        }
    }

    async fn before_services(
        &mut self,
        ctx: &Context,
        infra: &[ServiceRef],
        services: &[ServiceRef],
    ) -> UnitResult<()> {
        match &self.before {
            Some(f) => f(ctx, infra, services),
            None => Ok(()),
        }
    }

    async fn service(&mut self, ctx: &Context, service: &dyn Service) -> UnitResult<()> {
        match &self.service {
            Some(f) => f(ctx, service),
            None => Ok(()),
        }
    }

    async fn after_services(
        &mut self,
        ctx: &Context,
        infra: &[ServiceRef],
        services: &[ServiceRef],
    ) -> UnitResult<()> {
        match &self.after {
            Some(f) => f(ctx, infra, services),
            None => Ok(()),
        }
    }
}

type HookFactory = Box<dyn Fn() -> Box<dyn PreStartHook> + Send + Sync>;

/// Ordered registry of named pre-start hook factories.
pub struct HookRegistry {
    gate: Arc<Gate>,
    hooks: Vec<(String, HookFactory)>,
}

impl HookRegistry {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            hooks: Vec::new(),
        }
    }

    /// Register a hook factory, called once per start run.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn add_hook<H, F>(&mut self, name: impl Into<String>, factory: F) -> RegistryResult<()>
    where
        H: PreStartHook + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.gate.assert_can_customize();
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::InvalidName {
                kind: "pre-start hook",
                name,
                reason: "must not be empty",
            });
        }
        if self.contains(&name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "pre-start hook",
                name,
            });
        }
        debug!(hook = %name, "registered pre-start hook");
        self.hooks.push((
            name,
            Box::new(move || Box::new(factory()) as Box<dyn PreStartHook>),
        ));
        Ok(())
    }

    /// Register a hook type, default-constructed for each run.
    #[track_caller]
    pub fn add_hook_type<T>(&mut self, name: impl Into<String>) -> RegistryResult<()>
    where
        T: PreStartHook + Default + 'static,
    {
        self.add_hook(name, T::default)
    }

    /// Register a closure-based hook.
    #[track_caller]
    pub fn add_hook_funcs(&mut self, name: impl Into<String>, funcs: HookFuncs) -> RegistryResult<()> {
        self.add_hook(name, move || funcs.clone())
    }

    /// Register a hook with only a per-service stage.
    #[track_caller]
    pub fn add_service_hook(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&Context, &dyn Service) -> UnitResult<()> + Send + Sync + 'static,
    ) -> RegistryResult<()> {
        self.add_hook_funcs(name, HookFuncs::new().service(f))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.iter().any(|(n, _)| n == name)
    }

    /// Hook names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run all four stages and return the final infrastructure and service
    /// lists.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    pub(crate) async fn run(
        &self,
        ctx: &Context,
        stack: &mut StackRegistry,
    ) -> StackResult<(Vec<ServiceRef>, Vec<ServiceRef>)> {
        self.gate.assert_locked_down();
        let mut hooks: Vec<(&str, Box<dyn PreStartHook>)> = self
            .hooks
            .iter()
            .map(|(name, factory)| (name.as_str(), factory()))
            .collect();

        for (name, hook) in hooks.iter_mut() {
            let mut loader = stack.loader();
            hook.load_services(ctx, &mut loader)
                .await
                .map_err(|source| StackError::HookLoad {
                    hook: name.to_string(),
                    source,
                })?;
        }

        let infra = stack.all_infrastructure();
        let services = stack.all_services();

        for (name, hook) in hooks.iter_mut() {
            hook.before_services(ctx, &infra, &services)
                .await
                .map_err(|source| hook_error(name, None, source))?;
        }
        for svc in &services {
            for (name, hook) in hooks.iter_mut() {
                hook.service(ctx, svc.as_ref())
                    .await
                    .map_err(|source| hook_error(name, Some(svc.name()), source))?;
            }
        }
        for (name, hook) in hooks.iter_mut() {
            hook.after_services(ctx, &infra, &services)
                .await
                .map_err(|source| hook_error(name, None, source))?;
        }
        debug!(hooks = hooks.len(), "pre-start hooks done");
        Ok((infra, services))
    }
}

fn hook_error(hook: &str, service: Option<&str>, source: crate::error::UnitError) -> StackError {
    StackError::Hook {
        hook: hook.to_string(),
        service: service.map(str::to_string),
        source,
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}
