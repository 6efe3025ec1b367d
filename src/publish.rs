//! Channels through which a started fixture announces where it lives.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::handle::ConnectionInfo;

pub trait Publisher: Send + Sync {
    /// Publish `value` under `key`. `info` carries the full connection details
    /// for publishers that need more than the control string.
    fn publish(&self, key: &str, value: &str, info: &ConnectionInfo) -> Result<()>;

    /// Withdraw what an earlier `publish` wrote under `key`, used when the
    /// resource it pointed at was stopped before the start completed.
    fn retract(&self, _key: &str) {}
}

/// Publisher backed by a closure receiving `(key, value)`.
pub struct FnPublisher<F>(F);

pub fn from_fn<F>(f: F) -> FnPublisher<F>
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync,
{
    FnPublisher(f)
}

impl<F> Publisher for FnPublisher<F>
where
    F: Fn(&str, &str) -> Result<()> + Send + Sync,
{
    fn publish(&self, key: &str, value: &str, _info: &ConnectionInfo) -> Result<()> {
        (self.0)(key, value)
    }
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, key: &str, value: &str, info: &ConnectionInfo) -> Result<()> {
        (**self).publish(key, value, info)
    }

    fn retract(&self, key: &str) {
        (**self).retract(key)
    }
}

/// Publishes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _key: &str, _value: &str, _info: &ConnectionInfo) -> Result<()> {
        Ok(())
    }
}

lazy_static! {
    static ref GLOBAL_PROPERTIES: Arc<PropertyStore> = Arc::new(PropertyStore::new());
}

/// In-process key/value properties shared by the code running the tests.
#[derive(Debug, Default)]
pub struct PropertyStore {
    props: RwLock<HashMap<String, String>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide store.
    pub fn global() -> Arc<PropertyStore> {
        GLOBAL_PROPERTIES.clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.props
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl ToString, value: impl ToString) -> Option<String> {
        self.props
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string())
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.props
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl Publisher for PropertyStore {
    fn publish(&self, key: &str, value: &str, _info: &ConnectionInfo) -> Result<()> {
        debug!("Setting property {}={}", key, value);
        self.set(key, value);
        Ok(())
    }

    fn retract(&self, key: &str) {
        self.remove(key);
    }
}

/// Publishes into the process environment, so child processes inherit it.
///
/// Keys are upper-cased and every character outside `[A-Z0-9_]` becomes `_`,
/// so `rabbitmqctl.bin` is exported as `RABBITMQCTL_BIN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvPublisher;

impl EnvPublisher {
    pub fn env_key(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Publisher for EnvPublisher {
    fn publish(&self, key: &str, value: &str, _info: &ConnectionInfo) -> Result<()> {
        let env_key = Self::env_key(key);
        if env_key.is_empty() || value.contains('\0') {
            return Err(Error::publish(key, "not representable as an environment variable"));
        }
        debug!("Exporting {}={}", env_key, value);
        std::env::set_var(env_key, value);
        Ok(())
    }

    fn retract(&self, key: &str) {
        let env_key = Self::env_key(key);
        if !env_key.is_empty() {
            std::env::remove_var(env_key);
        }
    }
}

/// Writes the connection details as JSON for tools outside the test process.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    path: PathBuf,
}

impl FilePublisher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Publisher for FilePublisher {
    fn publish(&self, key: &str, _value: &str, info: &ConnectionInfo) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::publish(key, e))?;
        }
        fs::write(&self.path, info.to_json()?).map_err(|e| Error::publish(key, e))?;
        debug!("Wrote connection info to {}", self.path.display());
        Ok(())
    }

    fn retract(&self, _key: &str) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Fans a publication out to several publishers, stopping at the first failure.
/// A failure retracts what the earlier publishers already wrote.
#[derive(Default, Clone)]
pub struct Publishers {
    inner: Vec<Arc<dyn Publisher>>,
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: impl Publisher + 'static) -> Self {
        self.inner.push(Arc::new(publisher));
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Publisher for Publishers {
    fn publish(&self, key: &str, value: &str, info: &ConnectionInfo) -> Result<()> {
        for (i, publisher) in self.inner.iter().enumerate() {
            if let Err(e) = publisher.publish(key, value, info) {
                self.inner[..i].iter().for_each(|p| p.retract(key));
                return Err(e);
            }
        }
        Ok(())
    }

    fn retract(&self, key: &str) {
        self.inner.iter().for_each(|p| p.retract(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{PortBinding, ResourceHandle};

    fn info() -> ConnectionInfo {
        let handle = ResourceHandle::new("abc123", "localhost", vec![PortBinding::new(5672, 5672)]);
        ConnectionInfo::new(&handle, "DOCKER")
    }

    #[test]
    fn test_property_store_publish() {
        let store = PropertyStore::new();
        store.publish("rabbitmqctl.bin", "DOCKER:abc123", &info()).unwrap();
        assert_eq!(store.get("rabbitmqctl.bin").as_deref(), Some("DOCKER:abc123"));
        assert_eq!(store.remove("rabbitmqctl.bin").as_deref(), Some("DOCKER:abc123"));
        assert_eq!(store.get("rabbitmqctl.bin"), None);
    }

    #[test]
    fn test_env_key() {
        assert_eq!(EnvPublisher::env_key("rabbitmqctl.bin"), "RABBITMQCTL_BIN");
        assert_eq!(EnvPublisher::env_key("a-b c"), "A_B_C");
    }

    #[test]
    fn test_env_publisher() {
        let key = format!("shared.fixture.test.{}", std::process::id());
        EnvPublisher.publish(&key, "DOCKER:abc123", &info()).unwrap();
        assert_eq!(
            std::env::var(EnvPublisher::env_key(&key)).unwrap(),
            "DOCKER:abc123"
        );
    }

    #[test]
    fn test_env_publisher_rejects_empty_key() {
        assert!(EnvPublisher.publish("", "x", &info()).is_err());
    }

    #[test]
    fn test_file_publisher_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fixture.json");
        FilePublisher::new(&path)
            .publish("rabbitmqctl.bin", "DOCKER:abc123", &info())
            .unwrap();

        let written: ConnectionInfo =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, info());
    }

    #[test]
    fn test_closure_and_fan_out() {
        let store = Arc::new(PropertyStore::new());
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = seen.clone();

        let publishers = Publishers::new()
            .with(store.clone())
            .with(from_fn(move |k: &str, v: &str| -> Result<()> {
                seen_clone.write().unwrap().push(format!("{}={}", k, v));
                Ok(())
            }));
        assert_eq!(publishers.len(), 2);

        publishers.publish("key", "value", &info()).unwrap();
        assert_eq!(store.get("key").as_deref(), Some("value"));
        assert_eq!(*seen.read().unwrap(), vec!["key=value".to_string()]);
    }

    #[test]
    fn test_fan_out_stops_at_first_failure() {
        let store = Arc::new(PropertyStore::new());
        let publishers = Publishers::new()
            .with(from_fn(|k: &str, _v: &str| -> Result<()> {
                Err(Error::publish(k, "boom"))
            }))
            .with(store.clone());

        assert!(matches!(
            publishers.publish("key", "value", &info()),
            Err(Error::Publish { .. })
        ));
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn test_fan_out_failure_retracts_earlier_publishers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        let store = Arc::new(PropertyStore::new());
        let publishers = Publishers::new()
            .with(store.clone())
            .with(FilePublisher::new(&path))
            .with(from_fn(|k: &str, _v: &str| -> Result<()> {
                Err(Error::publish(k, "boom"))
            }));

        assert!(publishers.publish("key", "DOCKER:abc123", &info()).is_err());
        assert_eq!(store.get("key"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_env_publisher_retract() {
        let key = format!("shared.fixture.retract.{}", std::process::id());
        EnvPublisher.publish(&key, "DOCKER:abc123", &info()).unwrap();
        EnvPublisher.retract(&key);
        assert!(std::env::var(EnvPublisher::env_key(&key)).is_err());
    }
}
