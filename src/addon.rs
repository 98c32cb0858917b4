//! Addons: optional feature modules with deferred, one-shot initialization.
//!
//! An addon is registered while customizing, together with an initializer.
//! [`crate::Instance::lock_down`] runs every pending initializer, in
//! registration order, before the gate is locked, so initializers can still
//! register services, hooks and config keys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tracing::debug;

use crate::error::{AddonError, RegistryError, RegistryResult, UnitResult};
use crate::gate::{Gate, Phase};
use crate::instance::Instance;
use crate::service::validate_name;

const UNREGISTERED: u8 = 0;
const REGISTERED: u8 = 1;
const INITIALIZING: u8 = 2;
const INITIALIZED: u8 = 3;

/// Lifecycle of one addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonState {
    Unregistered,
    Registered,
    /// Its initializer is running.
    Initializing,
    Initialized,
}

/// Shared one-shot lifecycle state of an addon.
///
/// Every transition is a single compare-and-swap, so each step happens
/// exactly once no matter how many clones of the handle exist.
#[derive(Debug, Clone, Default)]
pub struct AddonHandle {
    state: Arc<AtomicU8>,
}

impl AddonHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AddonState {
        match self.state.load(Ordering::Acquire) {
            UNREGISTERED => AddonState::Unregistered,
            REGISTERED => AddonState::Registered,
            INITIALIZING => AddonState::Initializing,
            _ => AddonState::Initialized,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state() != AddonState::Unregistered
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == AddonState::Initialized
    }

    /// The addon's own "done initializing" marker, called from its
    /// initializer.
    ///
    /// # Panics
    ///
    /// Panics unless the addon's initializer is running.
    #[track_caller]
    pub fn mark_initialized(&self) {
        if !self.transition(INITIALIZING, INITIALIZED) {
            panic!("addon marked initialized while {:?}", self.state());
        }
    }

    #[track_caller]
    fn mark_registered(&self) {
        if !self.transition(UNREGISTERED, REGISTERED) {
            panic!("addon registered twice");
        }
    }

    /// Claims the right to run the initializer. False if another caller
    /// already did.
    fn begin_initialize(&self) -> bool {
        self.transition(REGISTERED, INITIALIZING)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Addon-owned configuration, frozen once the addon is initialized.
///
/// # Example
///
/// ```rust
/// use devstack::Instance;
///
/// #[derive(Default)]
/// struct DbConfig {
///     port: u16,
/// }
///
/// let instance = Instance::new("demo").unwrap();
/// let addon = instance.addons().new_addon(DbConfig::default());
/// addon.configure(|c| c.port = 5432);
/// ```
pub struct Addon<T> {
    gate: Arc<Gate>,
    handle: AddonHandle,
    config: Arc<RwLock<T>>,
}

impl<T> Clone for Addon<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            handle: self.handle.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T> Addon<T> {
    pub fn handle(&self) -> &AddonHandle {
        &self.handle
    }

    /// Adjust the configuration.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down or the addon's initializer
    /// has already started.
    #[track_caller]
    pub fn configure(&self, f: impl FnOnce(&mut T)) {
        self.gate.assert_can_customize();
        if matches!(
            self.handle.state(),
            AddonState::Initializing | AddonState::Initialized
        ) {
            panic!("addon already initialized");
        }
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *config);
    }

    /// The final configuration.
    ///
    /// Readable from the addon's own initializer, and by anyone after
    /// lock-down once the addon is initialized.
    ///
    /// # Panics
    ///
    /// Panics in any other situation.
    #[track_caller]
    pub fn config(&self) -> RwLockReadGuard<'_, T> {
        match (self.handle.state(), self.gate.phase()) {
            (AddonState::Initializing, _) | (AddonState::Initialized, Phase::LockedDown) => {}
            (AddonState::Initialized, Phase::Customizing) => {
                panic!("cannot instantiate customizations until app start and lockdown")
            }
            _ => panic!("addon not initialized"),
        }
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for Addon<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addon")
            .field("state", &self.handle.state())
            .finish_non_exhaustive()
    }
}

/// Runs once, during [`crate::Instance::lock_down`], and must call
/// [`AddonHandle::mark_initialized`] before returning `Ok`.
pub type Initializer = Box<dyn FnOnce(&mut Instance) -> UnitResult<()> + Send + Sync>;

type DescriptionFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Registration record for an addon.
pub struct AddonDefinition {
    name: String,
    handle: AddonHandle,
    description: DescriptionFn,
    initializer: Option<Initializer>,
}

impl AddonDefinition {
    /// The description is produced on demand, so it may reflect the final
    /// configuration.
    pub fn new(
        name: impl Into<String>,
        handle: AddonHandle,
        description: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            description: Arc::new(description),
            initializer: None,
        }
    }

    pub fn with_initializer(
        mut self,
        init: impl FnOnce(&mut Instance) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Box::new(init));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &AddonHandle {
        &self.handle
    }
}

impl std::fmt::Debug for AddonDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonDefinition")
            .field("name", &self.name)
            .field("state", &self.handle.state())
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}

/// Name and current description of an enabled addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonInfo {
    pub name: String,
    pub description: String,
}

/// An addon waiting for its initializer to run.
pub(crate) struct PendingAddon {
    pub(crate) name: String,
    handle: AddonHandle,
    initializer: Option<Initializer>,
}

impl PendingAddon {
    /// Run the initializer, unless someone already did.
    pub(crate) fn initialize(self, instance: &mut Instance) -> Result<(), AddonError> {
        if !self.handle.begin_initialize() {
            return Ok(());
        }
        let init = self
            .initializer
            .ok_or_else(|| AddonError::MissingInitializer(self.name.clone()))?;
        init(instance).map_err(|source| AddonError::InitializationFailed {
            name: self.name.clone(),
            source,
        })?;
        if !self.handle.is_initialized() {
            return Err(AddonError::NotMarkedInitialized(self.name));
        }
        Ok(())
    }
}

/// Registry of addons, in registration order.
pub struct AddonRegistry {
    gate: Arc<Gate>,
    addons: HashMap<String, AddonDefinition>,
    order: Vec<String>,
    pending: Vec<String>,
}

impl AddonRegistry {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            addons: HashMap::new(),
            order: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Create addon-owned configuration tied to this registry's lifecycle.
    pub fn new_addon<T>(&self, config: T) -> Addon<T> {
        Addon {
            gate: Arc::clone(&self.gate),
            handle: AddonHandle::new(),
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Register an addon and queue it for initialization.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down, or if the definition's
    /// handle was already registered.
    #[track_caller]
    pub fn register(&mut self, def: AddonDefinition) -> RegistryResult<()> {
        self.gate.assert_can_customize();
        validate_name("addon", &def.name)?;
        if self.addons.contains_key(&def.name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "addon",
                name: def.name,
            });
        }
        def.handle.mark_registered();
        debug!(addon = %def.name, "registered addon");
        self.order.push(def.name.clone());
        self.pending.push(def.name.clone());
        self.addons.insert(def.name.clone(), def);
        Ok(())
    }

    /// Register `def` unless its handle is already registered. Returns
    /// whether it registered.
    #[track_caller]
    pub fn register_if_needed(&mut self, def: AddonDefinition) -> RegistryResult<bool> {
        if def.handle.is_registered() {
            return Ok(false);
        }
        self.register(def).map(|()| true)
    }

    /// Set or replace the initializer of a registered addon.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn set_initializer(
        &mut self,
        name: &str,
        init: impl FnOnce(&mut Instance) -> UnitResult<()> + Send + Sync + 'static,
    ) -> Result<(), AddonError> {
        self.gate.assert_can_customize();
        let def = self
            .addons
            .get_mut(name)
            .ok_or_else(|| AddonError::NotRegistered(name.to_string()))?;
        def.initializer = Some(Box::new(init));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.addons.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// Every registered addon with its current description, in registration
    /// order.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn enabled(&self) -> Vec<AddonInfo> {
        self.gate.assert_locked_down();
        self.order
            .iter()
            .filter_map(|name| self.addons.get(name))
            .map(|def| AddonInfo {
                name: def.name.clone(),
                description: (def.description)(),
            })
            .collect()
    }

    /// Drain the pending list, handing out each initializer.
    pub(crate) fn take_pending(&mut self) -> Vec<PendingAddon> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|name| {
                let def = self.addons.get_mut(&name)?;
                Some(PendingAddon {
                    handle: def.handle.clone(),
                    initializer: def.initializer.take(),
                    name,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonRegistry")
            .field("addons", &self.order)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<Gate>, AddonRegistry) {
        let gate = Arc::new(Gate::new());
        (Arc::clone(&gate), AddonRegistry::new(gate))
    }

    #[test]
    fn test_handle_state_machine() {
        let handle = AddonHandle::new();
        assert_eq!(handle.state(), AddonState::Unregistered);
        handle.mark_registered();
        assert!(handle.is_registered());
        assert!(handle.begin_initialize());
        assert!(!handle.begin_initialize());
        handle.mark_initialized();
        assert!(handle.is_initialized());
    }

    #[test]
    #[should_panic(expected = "addon registered twice")]
    fn test_double_registration_panics() {
        let handle = AddonHandle::new();
        handle.mark_registered();
        handle.mark_registered();
    }

    #[test]
    #[should_panic(expected = "addon marked initialized while Registered")]
    fn test_mark_initialized_outside_initializer_panics() {
        let handle = AddonHandle::new();
        handle.mark_registered();
        handle.mark_initialized();
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_names() {
        let (_gate, mut addons) = registry();
        addons
            .register(AddonDefinition::new("db", AddonHandle::new(), || "db".into()))
            .unwrap();

        let err = addons
            .register(AddonDefinition::new("db", AddonHandle::new(), || "db".into()))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                kind: "addon",
                name: "db".to_string()
            }
        );
        assert!(addons
            .register(AddonDefinition::new("", AddonHandle::new(), String::new))
            .is_err());
    }

    #[test]
    fn test_register_if_needed() {
        let (_gate, mut addons) = registry();
        let handle = AddonHandle::new();

        let first = AddonDefinition::new("cache", handle.clone(), String::new);
        assert!(addons.register_if_needed(first).unwrap());
        let again = AddonDefinition::new("cache", handle, String::new);
        assert!(!addons.register_if_needed(again).unwrap());
        assert_eq!(addons.len(), 1);
    }

    #[test]
    fn test_enabled_uses_live_descriptions() {
        let (gate, mut addons) = registry();
        let addon = addons.new_addon(String::from("v1"));
        let described = addon.clone();
        addons
            .register(AddonDefinition::new("b", AddonHandle::new(), || "second".into()))
            .unwrap();
        addons
            .register(AddonDefinition::new("a", addon.handle().clone(), move || {
                format!("version {}", *described.config.read().unwrap())
            }))
            .unwrap();
        addon.configure(|v| *v = "v2".to_string());
        gate.lock().unwrap();

        assert_eq!(
            addons.enabled(),
            vec![
                AddonInfo {
                    name: "b".to_string(),
                    description: "second".to_string()
                },
                AddonInfo {
                    name: "a".to_string(),
                    description: "version v2".to_string()
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "cannot instantiate customizations")]
    fn test_enabled_before_lock_panics() {
        let (_gate, addons) = registry();
        addons.enabled();
    }

    #[test]
    fn test_set_initializer_requires_registration() {
        let (_gate, mut addons) = registry();
        let err = addons.set_initializer("ghost", |_| Ok(())).unwrap_err();
        assert!(matches!(err, AddonError::NotRegistered(name) if name == "ghost"));
    }

    #[test]
    #[should_panic(expected = "addon not initialized")]
    fn test_config_before_initialization_panics() {
        let (_gate, addons) = registry();
        let addon = addons.new_addon(1u32);
        let _guard = addon.config();
    }
}
