//! Prelude module for convenient imports.
//!
//! This module re-exports the types and traits most applications need to
//! declare and run a stack.
//!
//! # Example
//!
//! ```rust
//! use devstack::prelude::*;
//! ```

// Lifecycle
pub use crate::context::Context;
pub use crate::gate::Phase;
pub use crate::instance::Instance;

// Configuration
pub use crate::config::{ConfigKey, SimpleKey};
pub use crate::mode::{Mode, ServiceModes};

// Extension points
pub use crate::addon::{Addon, AddonDefinition, AddonHandle};
pub use crate::hooks::{HookFuncs, PreStartHook};
pub use crate::registry::StackLoader;

// Services and resources
pub use crate::resource::{Resource, ResourceRef, WaitResource};
pub use crate::service::{BasicService, Service, ServiceExt, ServiceRef};

// Running
pub use crate::orchestrator::StopOptions;
pub use crate::progress::{progress_channel, StackEvent};

// Errors
pub use crate::error::{StackError, StackResult, UnitError, UnitResult};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
