//! # devstack
//!
//! **devstack** is an engine for local development environments: it starts,
//! health-checks and stops a declared collection of services, each made of
//! one or more resources, in a deterministic order.
//!
//! ## Overview
//!
//! Everything revolves around a two-phase lifecycle:
//! - **Customizing**: config keys, addons, services and pre-start hooks are
//!   registered. Nothing may be read yet.
//! - **Locked down**: registrations are frozen, config is loaded, and the
//!   stack can be started and stopped.
//!
//! Registering after lock-down, or reading before it, is a programming error
//! and panics.
//!
//! ## Components
//!
//! ```text
//! Gate          - the one-way Customizing -> LockedDown transition
//! Config        - typed keys persisted to $HOME/.config/<app>.yaml
//! Addons        - optional feature modules with one-shot initializers
//! Services      - named units expanding into ordered resources
//! Stack         - ordered infrastructure and service registries
//! Hooks         - pre-start extension points run once per start
//! Orchestrator  - start, readiness polling and reverse-order stop
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devstack::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> StackResult<()> {
//! let mut instance = Instance::new("my-dev")?;
//!
//! let api = BasicService::builder("api")
//!     .resource(Arc::new(WaitResource::new("api-port", |_ctx| async { Ok(true) })))
//!     .build()?;
//! instance.stack_mut().add_service(Arc::new(api))?;
//! instance.hooks_mut().add_service_hook("announce", |_ctx, svc| {
//!     tracing::info!(service = svc.name(), "starting");
//!     Ok(())
//! })?;
//!
//! instance.lock_down()?;
//! instance.start(&Context::new()).await?;
//! # Ok(())
//! # }
//! ```

mod addon;
mod config;
mod context;
mod error;
mod gate;
mod hooks;
mod instance;
pub mod logging;
mod mode;
mod orchestrator;
mod persist;
pub mod progress;
mod registry;
mod resource;
mod service;

pub mod prelude;

pub use addon::{
    Addon, AddonDefinition, AddonHandle, AddonInfo, AddonRegistry, AddonState, Initializer,
};
pub use config::{ConfigKey, ConfigRegistry, SimpleKey};
pub use context::{Context, CANCELED};
pub use error::{
    AddonError, ConfigError, ConfigResult, ModeError, PhaseError, RegistryError, RegistryResult,
    ResourceOp, SourceError, StackError, StackResult, UnitError, UnitResult,
};
pub use gate::{Gate, Phase};
pub use hooks::{HookFuncs, HookRegistry, PreStartHook};
pub use instance::Instance;
pub use logging::init_logging;
pub use mode::{valid_mode_names, Mode, ServiceModes, ServiceModesKey, SERVICE_MODES_KEY};
pub use orchestrator::{Orchestrator, StopOptions, READY_POLL_INTERVAL};
pub use progress::{progress_channel, EventStream, ProgressSender, StackEvent};
pub use registry::{StackLoader, StackRegistry, Tier};
pub use resource::{Resource, ResourceRef, WaitResource, WAIT_RETRY_INTERVAL};
pub use service::{
    BasicService, BasicServiceBuilder, LocalSource, RemoteSource, Service, ServiceExt, ServiceRef,
};

// Re-export async-trait for implementing resources and hooks
pub use async_trait::async_trait;
