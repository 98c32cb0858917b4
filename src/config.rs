//! Typed, persisted configuration.
//!
//! Keys are registered while the [`Gate`] is customizing. At lock-down
//! [`ConfigRegistry::initialize`] materializes every key's default and then
//! overlays the values found in the config file. Values are read back with
//! the exact key object used for registration.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::gate::Gate;
use crate::persist::{self, Comments};

/// A typed configuration key.
///
/// The key owns the codec for its value: how to build the default, how to
/// decode and validate a raw YAML value, how to encode it again, and whether
/// a value equals the default (defaults are omitted when saving).
///
/// # Example
///
/// ```rust
/// use devstack::ConfigKey;
/// use serde_yaml::Value;
///
/// struct Workers;
///
/// impl ConfigKey for Workers {
///     type Value = u32;
///
///     fn name(&self) -> &str {
///         "workers"
///     }
///
///     fn new_value(&self) -> u32 {
///         4
///     }
///
///     fn new_from(&self, raw: &Value) -> Result<u32, serde_yaml::Error> {
///         serde_yaml::from_value(raw.clone())
///     }
///
///     fn to_raw(&self, value: &u32) -> Result<Value, serde_yaml::Error> {
///         serde_yaml::to_value(value)
///     }
///
///     fn is_default(&self, value: &u32) -> bool {
///         *value == 4
///     }
/// }
/// ```
pub trait ConfigKey: Send + Sync + 'static {
    /// The in-memory value type.
    type Value: Send + Sync + 'static;

    /// Unique, non-empty key name. This is also the top-level YAML key.
    fn name(&self) -> &str;

    /// A fresh default value.
    fn new_value(&self) -> Self::Value;

    /// Decode and validate a raw value loaded from the config file.
    ///
    /// Validation failures can be reported with
    /// `serde::de::Error::custom`.
    fn new_from(&self, raw: &Value) -> Result<Self::Value, serde_yaml::Error>;

    /// Encode a value for saving.
    fn to_raw(&self, value: &Self::Value) -> Result<Value, serde_yaml::Error>;

    /// Whether `value` is the default, and so need not be saved.
    fn is_default(&self, value: &Self::Value) -> bool;
}

type AnyValue = Box<dyn Any + Send + Sync>;

/// Object-safe view of a [`ConfigKey`], used for storage.
pub(crate) trait ErasedKey: Send + Sync {
    fn new_any(&self) -> AnyValue;
    fn new_any_from(&self, raw: &Value) -> Result<AnyValue, serde_yaml::Error>;
    fn is_default_any(&self, value: &AnyValue) -> bool;
    fn to_raw_any(&self, value: &AnyValue) -> Result<Value, serde_yaml::Error>;
    fn key_as_any(&self) -> &dyn Any;
}

impl<K: ConfigKey> ErasedKey for K {
    fn new_any(&self) -> AnyValue {
        Box::new(self.new_value())
    }

    fn new_any_from(&self, raw: &Value) -> Result<AnyValue, serde_yaml::Error> {
        Ok(Box::new(self.new_from(raw)?))
    }

    fn is_default_any(&self, value: &AnyValue) -> bool {
        value
            .downcast_ref::<K::Value>()
            .is_some_and(|v| self.is_default(v))
    }

    fn to_raw_any(&self, value: &AnyValue) -> Result<Value, serde_yaml::Error> {
        match value.downcast_ref::<K::Value>() {
            Some(v) => self.to_raw(v),
            None => Err(serde::ser::Error::custom(format!(
                "value stored under {:?} has the wrong type",
                self.name()
            ))),
        }
    }

    fn key_as_any(&self) -> &dyn Any {
        self
    }
}

/// A ready-made key for any serde-compatible value with a fixed default.
pub struct SimpleKey<T> {
    name: String,
    default: T,
    validate: Option<Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>>,
}

impl<T> SimpleKey<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    /// Create a key named `name` whose default is `default`.
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            name: name.into(),
            default,
            validate: None,
        }
    }

    /// Reject loaded values for which `validate` returns an error message.
    pub fn with_validation(
        mut self,
        validate: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Box::new(validate));
        self
    }
}

impl<T> ConfigKey for SimpleKey<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    type Value = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn new_value(&self) -> T {
        self.default.clone()
    }

    fn new_from(&self, raw: &Value) -> Result<T, serde_yaml::Error> {
        let value: T = serde_yaml::from_value(raw.clone())?;
        if let Some(validate) = &self.validate {
            validate(&value).map_err(<serde_yaml::Error as serde::de::Error>::custom)?;
        }
        Ok(value)
    }

    fn to_raw(&self, value: &T) -> Result<Value, serde_yaml::Error> {
        serde_yaml::to_value(value)
    }

    fn is_default(&self, value: &T) -> bool {
        *value == self.default
    }
}

/// Registry of config keys and, after lock-down, the store of their values.
pub struct ConfigRegistry {
    gate: Arc<Gate>,
    app_name: String,
    path: Option<PathBuf>,
    keys: HashMap<String, Arc<dyn ErasedKey>>,
    data: Option<HashMap<String, AnyValue>>,
    comments: Comments,
    dirty: AtomicU32,
}

impl ConfigRegistry {
    pub(crate) fn new(gate: Arc<Gate>, app_name: impl Into<String>) -> Self {
        Self {
            gate,
            app_name: app_name.into(),
            path: None,
            keys: HashMap::new(),
            data: None,
            comments: Comments::default(),
            dirty: AtomicU32::new(0),
        }
    }

    /// Register a key.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn add_key<K: ConfigKey>(&mut self, key: &Arc<K>) -> ConfigResult<()> {
        self.gate.assert_can_customize();
        let name = key.name();
        if name.is_empty() {
            return Err(ConfigError::EmptyKeyName);
        }
        if self.keys.contains_key(name) {
            return Err(ConfigError::DuplicateKey(name.to_string()));
        }
        debug!(key = name, "registered config key");
        let erased: Arc<dyn ErasedKey> = key.clone();
        self.keys.insert(name.to_string(), erased);
        Ok(())
    }

    /// Override where the config file lives.
    ///
    /// # Panics
    ///
    /// Panics if customizations are locked down.
    #[track_caller]
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.gate.assert_can_customize();
        self.path = Some(path.into());
    }

    /// The config file location: the override if set, otherwise
    /// `$HOME/.config/<app-name>.yaml`.
    pub fn path(&self) -> ConfigResult<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home
            .join(".config")
            .join(format!("{}.yaml", self.app_name)))
    }

    /// Names of every registered key, sorted.
    pub fn key_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the value store from defaults, then overlay the config file.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down yet, or if the store was
    /// already initialized.
    #[track_caller]
    pub fn initialize(&mut self) -> ConfigResult<()> {
        self.gate.assert_locked_down();
        if self.data.is_some() {
            panic!("config already initialized");
        }
        let data = self
            .keys
            .iter()
            .map(|(name, key)| (name.clone(), key.new_any()))
            .collect();
        self.data = Some(data);
        self.load()
    }

    fn load(&mut self) -> ConfigResult<()> {
        let path = self.path()?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let (entries, comments) = persist::parse_document(&text)?;

        if let Some((unknown, _)) = entries.iter().find(|(k, _)| !self.keys.contains_key(k)) {
            return Err(ConfigError::UnknownKey(unknown.clone()));
        }
        // don't touch the store until every value decodes
        let mut decoded = Vec::with_capacity(entries.len());
        for (name, raw) in &entries {
            let Some(key) = self.keys.get(name) else {
                return Err(ConfigError::UnknownKey(name.clone()));
            };
            let value = key
                .new_any_from(raw)
                .map_err(|e| ConfigError::InvalidValue {
                    key: name.clone(),
                    reason: e.to_string(),
                })?;
            decoded.push((name.clone(), value));
        }

        let data = self.data.as_mut().ok_or(ConfigError::NotInitialized)?;
        data.extend(decoded);
        self.comments = comments;
        info!(path = %path.display(), keys = entries.len(), "loaded config");
        Ok(())
    }

    /// Write every non-default value back to the config file, atomically.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down.
    #[track_caller]
    pub fn save(&self) -> ConfigResult<()> {
        self.gate.assert_locked_down();
        let data = self.data.as_ref().ok_or(ConfigError::NotInitialized)?;
        let mut entries = Vec::with_capacity(data.len());
        for (name, value) in data {
            let Some(key) = self.keys.get(name) else {
                continue;
            };
            if key.is_default_any(value) {
                continue;
            }
            entries.push((name.clone(), key.to_raw_any(value)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let path = self.path()?;
        let text = persist::render_document(&entries, &self.comments)?;
        persist::write_atomic(&path, &text)?;
        info!(path = %path.display(), keys = entries.len(), "saved config");
        Ok(())
    }

    /// Current value for `key`.
    ///
    /// # Panics
    ///
    /// Panics if customizations are not locked down, if the store is not
    /// initialized, or if `key` is not the very object that was registered
    /// under its name.
    #[track_caller]
    pub fn get<K: ConfigKey>(&self, key: &Arc<K>) -> &K::Value {
        self.gate.assert_locked_down();
        self.check_identity(key);
        let Some(data) = self.data.as_ref() else {
            panic!("config not initialized");
        };
        match data.get(key.name()).and_then(|v| v.downcast_ref::<K::Value>()) {
            Some(value) => value,
            None => panic!("config value for {:?} missing", key.name()),
        }
    }

    /// Mutate the value for `key` in place. `f` reports whether it changed
    /// anything; if so the store is marked dirty.
    ///
    /// # Panics
    ///
    /// Same conditions as [`ConfigRegistry::get`].
    #[track_caller]
    pub fn update<K: ConfigKey>(
        &mut self,
        key: &Arc<K>,
        f: impl FnOnce(&mut K::Value) -> bool,
    ) -> bool {
        self.gate.assert_locked_down();
        self.check_identity(key);
        let Some(data) = self.data.as_mut() else {
            panic!("config not initialized");
        };
        let Some(value) = data
            .get_mut(key.name())
            .and_then(|v| v.downcast_mut::<K::Value>())
        else {
            panic!("config value for {:?} missing", key.name());
        };
        let changed = f(value);
        if changed {
            self.set_dirty();
        }
        changed
    }

    #[track_caller]
    fn check_identity<K: ConfigKey>(&self, key: &Arc<K>) {
        let registered = self
            .keys
            .get(key.name())
            .and_then(|k| k.key_as_any().downcast_ref::<K>());
        match registered {
            Some(k) if std::ptr::eq(k, key.as_ref()) => {}
            _ => panic!("incorrect config key for {:?}", key.name()),
        }
    }

    /// Record an unsaved change.
    pub fn set_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether any change is pending a save.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed) > 0
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("app_name", &self.app_name)
            .field("path", &self.path)
            .field("keys", &self.key_names())
            .field("initialized", &self.data.is_some())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &tempfile::TempDir) -> ConfigRegistry {
        let mut config = ConfigRegistry::new(Arc::new(Gate::new()), "devstack-test");
        config.set_path(dir.path().join("config.yaml"));
        config
    }

    fn lock(config: &ConfigRegistry) {
        config.gate.lock().unwrap();
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        let key = Arc::new(SimpleKey::new("workers", 4u32));
        config.add_key(&key).unwrap();
        lock(&config);
        config.initialize().unwrap();

        assert_eq!(*config.get(&key), 4);
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_duplicate_and_empty_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        config
            .add_key(&Arc::new(SimpleKey::new("workers", 4u32)))
            .unwrap();

        let err = config
            .add_key(&Arc::new(SimpleKey::new("workers", 8u32)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey(name) if name == "workers"));

        let err = config
            .add_key(&Arc::new(SimpleKey::new("", false)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKeyName));
    }

    #[test]
    #[should_panic(expected = "incorrect config key")]
    fn test_get_requires_registered_key_object() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        config
            .add_key(&Arc::new(SimpleKey::new("workers", 4u32)))
            .unwrap();
        lock(&config);
        config.initialize().unwrap();

        // same name, different object
        let impostor = Arc::new(SimpleKey::new("workers", 4u32));
        config.get(&impostor);
    }

    #[test]
    #[should_panic(expected = "config already initialized")]
    fn test_initialize_twice_panics() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        lock(&config);
        config.initialize().unwrap();
        let _ = config.initialize();
    }

    #[test]
    #[should_panic(expected = "cannot add customizations after app start")]
    fn test_add_key_after_lock_panics() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        lock(&config);
        let _ = config.add_key(&Arc::new(SimpleKey::new("late", 1u8)));
    }

    #[test]
    fn test_update_marks_dirty_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = registry(&dir);
        let key = Arc::new(SimpleKey::new("workers", 4u32));
        config.add_key(&key).unwrap();
        lock(&config);
        config.initialize().unwrap();

        assert!(!config.update(&key, |_| false));
        assert!(!config.is_dirty());

        assert!(config.update(&key, |v| {
            *v = 8;
            true
        }));
        assert!(config.is_dirty());
        assert_eq!(*config.get(&key), 8);
    }

    #[test]
    fn test_validation_failure_names_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "workers: 0\n").unwrap();
        let mut config = registry(&dir);
        let key = Arc::new(SimpleKey::new("workers", 4u32).with_validation(|v| {
            if *v == 0 {
                Err("workers must be greater than 0".to_string())
            } else {
                Ok(())
            }
        }));
        config.add_key(&key).unwrap();
        lock(&config);

        let err = config.initialize().unwrap_err();
        match err {
            ConfigError::InvalidValue { key, reason } => {
                assert_eq!(key, "workers");
                assert!(reason.contains("greater than 0"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*config.get(&key), 4);
    }

    #[test]
    fn test_default_path_uses_app_name() {
        let config = ConfigRegistry::new(Arc::new(Gate::new()), "sdev");
        if let Ok(path) = config.path() {
            assert!(path.ends_with(".config/sdev.yaml"), "{}", path.display());
        }
    }
}
