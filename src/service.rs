//! The service contract and a basic implementation.
//!
//! A [`Service`] is a named unit of the stack that expands, per call, into an
//! ordered list of resources. Services may also describe where their source
//! code lives; the engine itself never needs that.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{RegistryError, RegistryResult, SourceError};
use crate::mode::Mode;
use crate::resource::ResourceRef;

/// Where a service's source lives on the local machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    pub root: String,
    pub sub_dir: String,
}

/// Where a service's source can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub vcs: String,
    pub repo: String,
}

/// A named unit of the orchestrated system.
pub trait Service: Send + Sync {
    /// Unique name, without whitespace.
    fn name(&self) -> &str;

    /// The resources making up this service, in start order.
    ///
    /// Called on every start and stop; implementations may compute the list
    /// from `ctx`, for example from [`Context::service_mode`].
    fn resources(&self, ctx: &Context) -> Vec<ResourceRef>;

    /// Where the source for this service is, or should be, checked out.
    fn local_source(&self, _ctx: &Context) -> Result<LocalSource, SourceError> {
        Err(SourceError::NoLocalSource(self.name().to_string()))
    }

    fn remote_source(&self, _ctx: &Context) -> Result<RemoteSource, SourceError> {
        Err(SourceError::NoRemoteSource(self.name().to_string()))
    }

    /// Whether running in `mode` builds from the local source. By default
    /// only [`Mode::Local`] does.
    fn uses_source_in_mode(&self, mode: Mode) -> bool {
        mode == Mode::Local
    }

    /// Downcast to concrete type for advanced usage.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a service.
pub type ServiceRef = Arc<dyn Service>;

/// Extension trait for service type checking.
pub trait ServiceExt: Service {
    /// Check if this service is of type T.
    fn is<T: Service + 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to type T.
    fn downcast_ref<T: Service + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl<S: Service + ?Sized> ServiceExt for S {}

/// Checks a service or application name: non-empty, no whitespace.
pub(crate) fn validate_name(kind: &'static str, name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidName {
            kind,
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.contains(char::is_whitespace) {
        return Err(RegistryError::InvalidName {
            kind,
            name: name.to_string(),
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

type ResourceFn = dyn Fn(&Context) -> Vec<ResourceRef> + Send + Sync;

/// A service assembled from static resources and resource functions.
///
/// # Example
///
/// ```rust
/// use devstack::{BasicService, Context, Service, WaitResource};
/// use std::sync::Arc;
///
/// let svc = BasicService::builder("api")
///     .resource(Arc::new(WaitResource::new("db", |_ctx| async { Ok(true) })))
///     .local_source("/src/api", "")
///     .build()
///     .unwrap();
///
/// assert_eq!(svc.name(), "api");
/// assert_eq!(svc.resources(&Context::new()).len(), 1);
/// assert_eq!(svc.local_source(&Context::new()).unwrap().sub_dir, ".");
/// ```
pub struct BasicService {
    name: String,
    resources: Vec<Box<ResourceFn>>,
    local: Option<LocalSource>,
    remote: Option<RemoteSource>,
}

impl BasicService {
    pub fn builder(name: impl Into<String>) -> BasicServiceBuilder {
        BasicServiceBuilder {
            name: name.into(),
            resources: Vec::new(),
            local: None,
            remote: None,
            invalid: None,
        }
    }
}

impl fmt::Debug for BasicService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicService")
            .field("name", &self.name)
            .field("resource_sets", &self.resources.len())
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

impl Service for BasicService {
    fn name(&self) -> &str {
        &self.name
    }

    fn resources(&self, ctx: &Context) -> Vec<ResourceRef> {
        self.resources.iter().flat_map(|f| f(ctx)).collect()
    }

    fn local_source(&self, _ctx: &Context) -> Result<LocalSource, SourceError> {
        self.local
            .clone()
            .ok_or_else(|| SourceError::NoLocalSource(self.name.clone()))
    }

    fn remote_source(&self, _ctx: &Context) -> Result<RemoteSource, SourceError> {
        self.remote
            .clone()
            .ok_or_else(|| SourceError::NoRemoteSource(self.name.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builder for [`BasicService`].
pub struct BasicServiceBuilder {
    name: String,
    resources: Vec<Box<ResourceFn>>,
    local: Option<LocalSource>,
    remote: Option<RemoteSource>,
    invalid: Option<&'static str>,
}

impl BasicServiceBuilder {
    /// Add a fixed resource.
    pub fn resource(self, resource: ResourceRef) -> Self {
        self.resources(vec![resource])
    }

    /// Add fixed resources.
    pub fn resources(mut self, resources: Vec<ResourceRef>) -> Self {
        self.resources.push(Box::new(move |_: &Context| resources.clone()));
        self
    }

    /// Add a function computing resources on every call.
    pub fn resource_fn(
        mut self,
        f: impl Fn(&Context) -> Vec<ResourceRef> + Send + Sync + 'static,
    ) -> Self {
        self.resources.push(Box::new(f));
        self
    }

    /// Local checkout location. An empty `sub_dir` means the root itself.
    pub fn local_source(mut self, root: impl Into<String>, sub_dir: impl Into<String>) -> Self {
        let root = root.into();
        let mut sub_dir = sub_dir.into();
        if root.is_empty() {
            self.invalid = Some("local source root must not be empty");
        }
        if sub_dir.is_empty() {
            sub_dir = ".".to_string();
        }
        self.local = Some(LocalSource { root, sub_dir });
        self
    }

    pub fn remote_source(mut self, vcs: impl Into<String>, repo: impl Into<String>) -> Self {
        let (vcs, repo) = (vcs.into(), repo.into());
        if vcs.is_empty() || repo.is_empty() {
            self.invalid = Some("remote source vcs and repo must not be empty");
        }
        self.remote = Some(RemoteSource { vcs, repo });
        self
    }

    pub fn build(self) -> RegistryResult<BasicService> {
        validate_name("service", &self.name)?;
        if let Some(reason) = self.invalid {
            return Err(RegistryError::InvalidName {
                kind: "service",
                name: self.name,
                reason,
            });
        }
        if self.resources.is_empty() {
            return Err(RegistryError::NoResources(self.name));
        }
        Ok(BasicService {
            name: self.name,
            resources: self.resources,
            local: self.local,
            remote: self.remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ServiceModes;
    use crate::resource::WaitResource;

    fn wait(name: &str) -> ResourceRef {
        Arc::new(WaitResource::new(name, |_ctx| async { Ok(true) }))
    }

    #[test]
    fn test_service_name_validation() {
        let err = BasicService::builder("my api")
            .resource(wait("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));

        let err = BasicService::builder("api").build().unwrap_err();
        assert_eq!(err, RegistryError::NoResources("api".to_string()));
    }

    #[test]
    fn test_resources_are_recomputed_per_call() {
        let svc = BasicService::builder("api")
            .resource(wait("db"))
            .resource_fn(|ctx| match ctx.service_mode("api") {
                (Mode::Debug, _) => vec![wait("debugger")],
                _ => Vec::new(),
            })
            .build()
            .unwrap();

        let ids = |ctx: &Context| -> Vec<String> {
            svc.resources(ctx)
                .iter()
                .map(|r| r.id().to_string())
                .collect()
        };
        assert_eq!(ids(&Context::new()), vec!["Wait/db"]);

        let mut modes = ServiceModes::new();
        modes.set("api", Mode::Debug);
        let debug = Context::new().with_service_modes(modes);
        assert_eq!(ids(&debug), vec!["Wait/db", "Wait/debugger"]);
    }

    #[test]
    fn test_sources() {
        let ctx = Context::new();
        let bare = BasicService::builder("api")
            .resource(wait("a"))
            .build()
            .unwrap();
        assert_eq!(
            bare.local_source(&ctx),
            Err(SourceError::NoLocalSource("api".to_string()))
        );
        assert!(bare.remote_source(&ctx).is_err());
        assert!(bare.uses_source_in_mode(Mode::Local));
        assert!(!bare.uses_source_in_mode(Mode::Debug));

        let sourced = BasicService::builder("api")
            .resource(wait("a"))
            .local_source("/work/api", "server")
            .remote_source("git", "https://example.com/api.git")
            .build()
            .unwrap();
        assert_eq!(
            sourced.local_source(&ctx).unwrap(),
            LocalSource {
                root: "/work/api".to_string(),
                sub_dir: "server".to_string()
            }
        );
        assert_eq!(sourced.remote_source(&ctx).unwrap().vcs, "git");

        let err = BasicService::builder("api")
            .resource(wait("a"))
            .remote_source("", "repo")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("remote source"), "{err}");
    }

    #[test]
    fn test_service_downcast() {
        let svc: ServiceRef = Arc::new(
            BasicService::builder("api")
                .resource(wait("a"))
                .build()
                .unwrap(),
        );
        assert!(svc.is::<BasicService>());
        assert!(svc.downcast_ref::<BasicService>().is_some());
    }
}
