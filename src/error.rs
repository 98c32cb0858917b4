//! Error types for the devstack engine.

use std::path::PathBuf;

use thiserror::Error;

/// Root error type for devstack operations.
#[derive(Error, Debug)]
pub enum StackError {
    /// Lifecycle phase violation
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    /// Registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Addon initialization errors
    #[error("Addon error: {0}")]
    Addon(#[from] AddonError),

    /// A pre-start hook failed while loading late services
    #[error("error loading services in pre-start hook {hook}: {source}")]
    HookLoad { hook: String, source: UnitError },

    /// A pre-start hook callback failed
    #[error("{}", hook_message(.hook, .service.as_deref(), .source))]
    Hook {
        hook: String,
        service: Option<String>,
        source: UnitError,
    },

    /// A resource operation failed
    #[error("failed to {op} {id}: {source}")]
    Resource {
        op: ResourceOp,
        id: String,
        source: UnitError,
    },

    /// The run was cancelled, carrying the recorded cause
    #[error("{cause}")]
    Cancelled { cause: String },
}

fn hook_message(hook: &str, service: Option<&str>, source: &UnitError) -> String {
    match service {
        Some(service) => {
            format!("error running pre-start hook {hook} for service {service}: {source}")
        }
        None => format!("error running pre-start hook {hook}: {source}"),
    }
}

/// The resource operation that produced a [`StackError::Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOp {
    Start,
    Ready,
    Stop,
}

impl std::fmt::Display for ResourceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Ready => "check ready",
            Self::Stop => "stop",
        })
    }
}

/// Violations of the write-before-lock, read-after-lock discipline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseError {
    #[error("cannot add customizations after app start")]
    NotCustomizing,

    #[error("cannot instantiate customizations until app start and lockdown")]
    NotLockedDown,

    #[error("customizations are already locked down")]
    AlreadyLocked,
}

/// Errors raised by caller-supplied units: resources, hooks and addon
/// initializers.
#[derive(Error, Debug, Clone)]
pub enum UnitError {
    /// Execution failed
    #[error("{0}")]
    Failed(String),

    /// Unit configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error during the operation
    #[error("IO error: {0}")]
    Io(String),

    /// The unit observed cancellation
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Errors that can occur in registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Something with this name is already registered
    #[error("{kind} {name:?} already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    /// Invalid name
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    /// The stack registry has been read and no longer accepts entries
    #[error("cannot add service {0} after services have been locked")]
    Latched(String),

    /// A service was declared without any resources
    #[error("service {0} needs some resources")]
    NoResources(String),
}

/// Errors from the typed configuration store.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config key {0:?} already registered")]
    DuplicateKey(String),

    #[error("config key name must not be empty")]
    EmptyKeyName,

    #[error("config not initialized")]
    NotInitialized,

    #[error("unknown config key {0:?}")]
    UnknownKey(String),

    #[error("error loading config key {key:?}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("error loading config: {0}")]
    Parse(String),

    #[error("error writing config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot determine config file location: no home directory")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors parsing a service mode or a compact mode mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ModeError(pub String);

/// Errors from addon initialization.
#[derive(Error, Debug)]
pub enum AddonError {
    #[error("addon {0} has no initializer")]
    MissingInitializer(String),

    #[error("failed to initialize addon {name}: {source}")]
    InitializationFailed { name: String, source: UnitError },

    #[error("addon {0} did not mark itself initialized")]
    NotMarkedInitialized(String),

    #[error("addon {0} is not registered")]
    NotRegistered(String),
}

/// Errors describing where a service's source code lives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("service {0} does not have a local source")]
    NoLocalSource(String),

    #[error("service {0} does not have a remote source")]
    NoRemoteSource(String),

    #[error("{0}")]
    Invalid(String),
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        UnitError::Io(err.to_string())
    }
}

impl From<String> for UnitError {
    fn from(msg: String) -> Self {
        UnitError::Failed(msg)
    }
}

impl From<&str> for UnitError {
    fn from(msg: &str) -> Self {
        UnitError::Failed(msg.to_string())
    }
}

/// Result type alias for unit operations.
pub type UnitResult<T> = Result<T, UnitError>;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for general devstack operations.
pub type StackResult<T> = Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_names_hook_and_service() {
        let err = StackError::Hook {
            hook: "build".to_string(),
            service: Some("api".to_string()),
            source: "compile failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "error running pre-start hook build for service api: compile failed"
        );

        let err = StackError::Hook {
            hook: "build".to_string(),
            service: None,
            source: "no toolchain".into(),
        };
        assert_eq!(
            err.to_string(),
            "error running pre-start hook build: no toolchain"
        );

        let err = StackError::HookLoad {
            hook: "build".to_string(),
            source: "manifest missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "error loading services in pre-start hook build: manifest missing"
        );
    }

    #[test]
    fn test_resource_error_names_resource() {
        let err = StackError::Resource {
            op: ResourceOp::Ready,
            id: "db/postgres".to_string(),
            source: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to check ready db/postgres: connection refused"
        );
    }

    #[test]
    fn test_unit_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: UnitError = io.into();
        assert!(matches!(err, UnitError::Io(_)));
    }
}
