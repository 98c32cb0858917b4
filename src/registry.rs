//! Registry of the services making up the stack.
//!
//! The `StackRegistry` keeps two ordered lists of service names,
//! infrastructure and ordinary services, backed by a single name to service
//! map so a name can only ever be used once. Order is registration order and
//! is never changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::gate::Gate;
use crate::service::{validate_name, ServiceRef};

/// Which of the two ordered lists an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Started before, and stopped after, ordinary services.
    Infrastructure,
    Service,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Infrastructure => "infrastructure",
            Self::Service => "stack",
        })
    }
}

/// Ordered registry of infrastructure and services.
///
/// Entries can be added while the [`Gate`] is customizing. Reading requires
/// lock-down, and the first read also latches the registry so nothing more
/// can be added even through a [`StackLoader`].
pub struct StackRegistry {
    gate: Arc<Gate>,
    services: HashMap<String, ServiceRef>,
    infra_order: Vec<String>,
    service_order: Vec<String>,
    latched: AtomicBool,
}

impl StackRegistry {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            services: HashMap::new(),
            infra_order: Vec::new(),
            service_order: Vec::new(),
            latched: AtomicBool::new(false),
        }
    }

    /// Register an ordinary service.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn add_service(&mut self, service: ServiceRef) -> RegistryResult<()> {
        self.gate.assert_can_customize();
        self.insert(Tier::Service, service)
    }

    /// Register an infrastructure service.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn add_infrastructure(&mut self, service: ServiceRef) -> RegistryResult<()> {
        self.gate.assert_can_customize();
        self.insert(Tier::Infrastructure, service)
    }

    fn insert(&mut self, tier: Tier, service: ServiceRef) -> RegistryResult<()> {
        let name = service.name().to_string();
        if self.latched.load(Ordering::Acquire) {
            return Err(RegistryError::Latched(name));
        }
        validate_name("service", &name)?;
        if self.services.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "service",
                name,
            });
        }
        debug!(service = %name, %tier, "registered service");
        match tier {
            Tier::Infrastructure => self.infra_order.push(name.clone()),
            Tier::Service => self.service_order.push(name.clone()),
        }
        self.services.insert(name, service);
        Ok(())
    }

    #[track_caller]
    fn latch(&self) {
        self.gate.assert_locked_down();
        self.latched.store(true, Ordering::Release);
    }

    /// Whether a reader has frozen the registry.
    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    /// Infrastructure in registration order.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn all_infrastructure(&self) -> Vec<ServiceRef> {
        self.latch();
        self.collect(&self.infra_order)
    }

    /// Ordinary services in registration order.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn all_services(&self) -> Vec<ServiceRef> {
        self.latch();
        self.collect(&self.service_order)
    }

    /// Look up a service or infrastructure entry by name.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn service_by_name(&self, name: &str) -> Option<ServiceRef> {
        self.latch();
        self.services.get(name).cloned()
    }

    /// Which list `name` was registered in, if any.
    pub fn tier_of(&self, name: &str) -> Option<Tier> {
        if self.infra_order.iter().any(|n| n == name) {
            Some(Tier::Infrastructure)
        } else if self.service_order.iter().any(|n| n == name) {
            Some(Tier::Service)
        } else {
            None
        }
    }

    /// Check if a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Total number of entries across both lists.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn collect(&self, order: &[String]) -> Vec<ServiceRef> {
        order
            .iter()
            .filter_map(|name| self.services.get(name))
            .cloned()
            .collect()
    }

    pub(crate) fn loader(&mut self) -> StackLoader<'_> {
        StackLoader { registry: self }
    }
}

impl std::fmt::Debug for StackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackRegistry")
            .field("infrastructure", &self.infra_order)
            .field("services", &self.service_order)
            .field("latched", &self.is_latched())
            .finish()
    }
}

/// Late registration access handed to pre-start hooks.
///
/// Hooks may add entries just in time, after lock-down, as long as no reader
/// has latched the registry yet.
pub struct StackLoader<'a> {
    registry: &'a mut StackRegistry,
}

impl StackLoader<'_> {
    pub fn add_service(&mut self, service: ServiceRef) -> RegistryResult<()> {
        self.registry.insert(Tier::Service, service)
    }

    pub fn add_infrastructure(&mut self, service: ServiceRef) -> RegistryResult<()> {
        self.registry.insert(Tier::Infrastructure, service)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::resource::ResourceRef;
    use crate::service::Service;
    use std::any::Any;

    #[derive(Debug)]
    struct TestService {
        name: String,
    }

    impl Service for TestService {
        fn name(&self) -> &str {
            &self.name
        }

        fn resources(&self, _ctx: &Context) -> Vec<ResourceRef> {
            Vec::new()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn svc(name: &str) -> ServiceRef {
        Arc::new(TestService {
            name: name.to_string(),
        })
    }

    fn names(services: &[ServiceRef]) -> Vec<&str> {
        services.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn test_registry_preserves_registration_order() {
        let gate = Arc::new(Gate::new());
        let mut registry = StackRegistry::new(Arc::clone(&gate));
        registry.add_infrastructure(svc("db")).unwrap();
        registry.add_service(svc("web")).unwrap();
        registry.add_infrastructure(svc("cache")).unwrap();
        registry.add_service(svc("api")).unwrap();
        gate.lock().unwrap();

        assert_eq!(names(&registry.all_infrastructure()), vec!["db", "cache"]);
        assert_eq!(names(&registry.all_services()), vec!["web", "api"]);
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.tier_of("cache"), Some(Tier::Infrastructure));
        assert_eq!(registry.tier_of("api"), Some(Tier::Service));
        assert!(registry.service_by_name("web").is_some());
        assert!(registry.service_by_name("nope").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicates_across_tiers() {
        let mut registry = StackRegistry::new(Arc::new(Gate::new()));
        registry.add_service(svc("api")).unwrap();

        let err = registry.add_service(svc("api")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                kind: "service",
                name: "api".to_string()
            }
        );
        assert!(registry.add_infrastructure(svc("api")).is_err());
        assert!(registry.add_service(svc("bad name")).is_err());
    }

    #[test]
    #[should_panic(expected = "cannot instantiate customizations")]
    fn test_reading_before_lock_panics() {
        let registry = StackRegistry::new(Arc::new(Gate::new()));
        registry.all_services();
    }

    #[test]
    #[should_panic(expected = "cannot add customizations after app start")]
    fn test_adding_after_lock_panics() {
        let gate = Arc::new(Gate::new());
        let mut registry = StackRegistry::new(Arc::clone(&gate));
        gate.lock().unwrap();
        let _ = registry.add_service(svc("late"));
    }

    #[test]
    fn test_loader_adds_until_latched() {
        let gate = Arc::new(Gate::new());
        let mut registry = StackRegistry::new(Arc::clone(&gate));
        gate.lock().unwrap();

        registry.loader().add_service(svc("lazy")).unwrap();
        assert!(!registry.is_latched());
        assert_eq!(names(&registry.all_services()), vec!["lazy"]);
        assert!(registry.is_latched());

        let err = registry.loader().add_service(svc("later")).unwrap_err();
        assert_eq!(err, RegistryError::Latched("later".to_string()));
    }
}
