//! The application instance: one gate plus every registry it guards.

use std::sync::Arc;

use tracing::{debug, info};

use crate::addon::AddonRegistry;
use crate::config::ConfigRegistry;
use crate::context::Context;
use crate::error::{AddonError, ConfigError, ConfigResult, StackResult};
use crate::gate::{Gate, Phase};
use crate::hooks::HookRegistry;
use crate::mode::{Mode, ServiceModes, ServiceModesKey, SERVICE_MODES_KEY};
use crate::orchestrator::{Orchestrator, StopOptions};
use crate::progress::ProgressSender;
use crate::registry::StackRegistry;
use crate::service::validate_name;

/// Process-scoped builder for a development stack.
///
/// Created in the customizing phase: register config keys, addons, services
/// and hooks, then call [`Instance::lock_down`]. After that the registries
/// are frozen and the stack can be started and stopped.
///
/// # Example
///
/// ```rust,no_run
/// use devstack::{BasicService, Context, Instance, StopOptions, WaitResource};
/// use std::sync::Arc;
///
/// # async fn example() -> devstack::StackResult<()> {
/// let mut instance = Instance::new("demo")?;
/// let db = BasicService::builder("db")
///     .resource(Arc::new(WaitResource::new("db", |_ctx| async { Ok(true) })))
///     .build()?;
/// instance.stack_mut().add_infrastructure(Arc::new(db))?;
/// instance.lock_down()?;
///
/// let ctx = Context::new();
/// instance.start(&ctx).await?;
/// instance.stop(&ctx, &StopOptions::new().with_infrastructure()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Instance {
    app_name: String,
    gate: Arc<Gate>,
    config: ConfigRegistry,
    addons: AddonRegistry,
    stack: StackRegistry,
    hooks: HookRegistry,
    orchestrator: Orchestrator,
    modes_key: Arc<ServiceModesKey>,
    failed_addon: Option<String>,
}

impl Instance {
    /// Create an instance for `app_name`, which also names the config file.
    pub fn new(app_name: impl Into<String>) -> StackResult<Self> {
        let app_name = app_name.into();
        validate_name("app", &app_name)?;
        let gate = Arc::new(Gate::new());
        let mut config = ConfigRegistry::new(Arc::clone(&gate), app_name.clone());
        let modes_key = Arc::new(ServiceModesKey);
        config.add_key(&modes_key)?;
        debug!(app = %app_name, "created instance");
        Ok(Self {
            addons: AddonRegistry::new(Arc::clone(&gate)),
            stack: StackRegistry::new(Arc::clone(&gate)),
            hooks: HookRegistry::new(Arc::clone(&gate)),
            orchestrator: Orchestrator::new(),
            app_name,
            gate,
            config,
            modes_key,
            failed_addon: None,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn phase(&self) -> Phase {
        self.gate.phase()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn config(&self) -> &ConfigRegistry {
        &self.config
    }

    /// Config values stay mutable after lock-down; registering keys does not.
    pub fn config_mut(&mut self) -> &mut ConfigRegistry {
        &mut self.config
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn addons_mut(&mut self) -> &mut AddonRegistry {
        self.gate.assert_can_customize();
        &mut self.addons
    }

    pub fn stack(&self) -> &StackRegistry {
        &self.stack
    }

    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn stack_mut(&mut self) -> &mut StackRegistry {
        self.gate.assert_can_customize();
        &mut self.stack
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        self.gate.assert_can_customize();
        &mut self.hooks
    }

    /// Publish start/stop progress to `sender`.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn set_progress(&mut self, sender: ProgressSender) {
        self.gate.assert_can_customize();
        self.orchestrator = Orchestrator::new().with_progress(sender);
    }

    /// Run every pending addon initializer in registration order, including
    /// addons registered by earlier initializers.
    ///
    /// A failed initializer leaves its addon half set up and drops the rest
    /// of the batch, so the instance cannot be locked down afterwards.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down, or if an earlier call
    /// failed.
    #[track_caller]
    pub fn initialize_addons(&mut self) -> Result<(), AddonError> {
        self.gate.assert_can_customize();
        if let Some(name) = &self.failed_addon {
            panic!("addon {name} failed to initialize; cannot retry lock-down");
        }
        loop {
            let pending = self.addons.take_pending();
            if pending.is_empty() {
                return Ok(());
            }
            for addon in pending {
                debug!(addon = %addon.name, "initializing addon");
                let name = addon.name.clone();
                if let Err(err) = addon.initialize(self) {
                    self.failed_addon = Some(name);
                    return Err(err);
                }
            }
        }
    }

    /// Finish customization: initialize addons, lock the gate, then load the
    /// config file.
    pub fn lock_down(&mut self) -> StackResult<()> {
        self.initialize_addons()?;
        self.gate.lock()?;
        self.config.initialize()?;
        info!(
            app = %self.app_name,
            addons = self.addons.len(),
            services = self.stack.len(),
            hooks = self.hooks.len(),
            "ready"
        );
        Ok(())
    }

    /// Run pre-start hooks, then start infrastructure followed by services.
    ///
    /// Service modes from the config file apply wherever `ctx` carries no
    /// override. On error, already started resources are left running.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    pub async fn start(&mut self, ctx: &Context) -> StackResult<()> {
        self.gate.assert_locked_down();
        let ctx = ctx.inheriting_modes(self.config.get(&self.modes_key));
        let (infra, services) = self.hooks.run(&ctx, &mut self.stack).await?;
        self.orchestrator.start(&ctx, &infra, &services).await
    }

    /// Stop services, and optionally infrastructure, in reverse start order.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    pub async fn stop(&self, ctx: &Context, opts: &StopOptions) -> StackResult<()> {
        let ctx = ctx.inheriting_modes(self.configured_modes());
        let infra = self.stack.all_infrastructure();
        let services = self.stack.all_services();
        self.orchestrator.stop(&ctx, &infra, &services, opts).await
    }

    /// Service modes stored in the config file.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn configured_modes(&self) -> &ServiceModes {
        self.config.get(&self.modes_key)
    }

    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn configured_mode(&self, service: &str) -> Mode {
        self.configured_modes().get(service).unwrap_or_default()
    }

    /// Persistently set the mode of `service`. Setting [`Mode::Default`]
    /// removes the entry. Returns whether anything changed; changes mark the
    /// config dirty but are not saved.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn set_service_mode(&mut self, service: &str, mode: Mode) -> ConfigResult<bool> {
        if service.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: SERVICE_MODES_KEY.to_string(),
                reason: "service name must not be empty".to_string(),
            });
        }
        let changed = self
            .config
            .update(&self.modes_key, |modes| modes.set(service, mode));
        if changed {
            debug!(service, %mode, "service mode changed");
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("app_name", &self.app_name)
            .field("phase", &self.phase())
            .field("config", &self.config)
            .field("addons", &self.addons)
            .field("stack", &self.stack)
            .field("hooks", &self.hooks)
            .finish()
    }
}
