use std::convert::TryFrom;
use std::env;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::handle::{ImageSpec, PortBinding};

pub const DEFAULT_IMAGE: &str = "rabbitmq:4-management";
pub const DEFAULT_PORT_BINDING: &str = "5672:5672";
pub const DEFAULT_PROPERTY_KEY: &str = "rabbitmqctl.bin";
pub const DEFAULT_CONTROL_TAG: &str = "DOCKER";
pub const DEFAULT_HOST: &str = "localhost";

pub const ENV_IMAGE: &str = "SHARED_FIXTURE_IMAGE";
pub const ENV_PORTS: &str = "SHARED_FIXTURE_PORTS";
pub const ENV_PROPERTY: &str = "SHARED_FIXTURE_PROPERTY";
pub const ENV_CONTROL_TAG: &str = "SHARED_FIXTURE_CONTROL_TAG";
pub const ENV_CONTAINER_NAME: &str = "SHARED_FIXTURE_CONTAINER_NAME";
pub const ENV_HOST: &str = "SHARED_FIXTURE_HOST";

/// What to start and how to announce it.
///
/// Host ports are fixed rather than ephemeral, so only one fixture per machine
/// can bind them; two unrelated runs on the same host will collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    pub image: String,
    pub ports: Vec<String>,
    pub property_key: String,
    pub control_tag: String,
    pub container_name: Option<String>,
    pub host: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            ports: vec![DEFAULT_PORT_BINDING.to_string()],
            property_key: DEFAULT_PROPERTY_KEY.to_string(),
            control_tag: DEFAULT_CONTROL_TAG.to_string(),
            container_name: None,
            host: DEFAULT_HOST.to_string(),
        }
    }
}

impl FixtureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading fixture config from {}", path.display());
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Defaults overridden by any `SHARED_FIXTURE_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(ENV_IMAGE) {
            self.image = v;
        }
        if let Some(v) = lookup(ENV_PORTS) {
            self.ports = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup(ENV_PROPERTY) {
            self.property_key = v;
        }
        if let Some(v) = lookup(ENV_CONTROL_TAG) {
            self.control_tag = v;
        }
        if let Some(v) = lookup(ENV_CONTAINER_NAME) {
            self.container_name = Some(v).filter(|n| !n.is_empty());
        }
        if let Some(v) = lookup(ENV_HOST) {
            self.host = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn image(mut self, s: impl ToString) -> Self {
        self.image = s.to_string();
        self
    }

    pub fn ports(mut self, s: Vec<String>) -> Self {
        self.ports = s;
        self
    }

    pub fn port(mut self, s: impl ToString) -> Self {
        self.ports.push(s.to_string());
        self
    }

    pub fn property_key(mut self, s: impl ToString) -> Self {
        self.property_key = s.to_string();
        self
    }

    pub fn control_tag(mut self, s: impl ToString) -> Self {
        self.control_tag = s.to_string();
        self
    }

    pub fn container_name(mut self, s: impl ToString) -> Self {
        self.container_name = Some(s.to_string());
        self
    }

    pub fn host(mut self, s: impl ToString) -> Self {
        self.host = s.to_string();
        self
    }

    pub fn image_spec(&self) -> Result<ImageSpec> {
        ImageSpec::try_from(self.image.as_str())
    }

    pub fn port_bindings(&self) -> Result<Vec<PortBinding>> {
        self.ports
            .iter()
            .map(|p| PortBinding::try_from(p.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.image_spec()?;
        let bindings = self.port_bindings()?;

        for (i, binding) in bindings.iter().enumerate() {
            if bindings[..i]
                .iter()
                .any(|b| b.host == binding.host && b.protocol == binding.protocol)
            {
                return Err(Error::InvalidConfig(format!(
                    "host port {} bound twice",
                    binding.host
                )));
            }
        }
        if self.property_key.trim().is_empty() {
            return Err(Error::InvalidConfig("empty property key".to_string()));
        }
        if self.control_tag.trim().is_empty() || self.control_tag.contains(':') {
            return Err(Error::InvalidConfig(format!(
                "invalid control tag: {:?}",
                self.control_tag
            )));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("empty host".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_defaults() {
        let config = FixtureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.image_spec().unwrap(),
            ImageSpec::new("rabbitmq", "4-management")
        );
        assert_eq!(
            config.port_bindings().unwrap(),
            vec![PortBinding::new(5672, 5672)]
        );
        assert_eq!(config.property_key, "rabbitmqctl.bin");
        assert_eq!(config.control_tag, "DOCKER");
    }

    #[test]
    fn test_from_json_partial() {
        let config = FixtureConfig::from_json_str(
            r#"{"image": "rabbitmq:3.13", "ports": ["5673:5672", "15673:15672"]}"#,
        )
        .unwrap();
        assert_eq!(config.image, "rabbitmq:3.13");
        assert_eq!(config.port_bindings().unwrap().len(), 2);
        assert_eq!(config.property_key, DEFAULT_PROPERTY_KEY);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(FixtureConfig::from_json_str(r#"{"ports": ["nope"]}"#).is_err());
        assert!(FixtureConfig::from_json_str(r#"{"image": ""}"#).is_err());
        assert!(FixtureConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, r#"{"control_tag": "PODMAN"}"#).unwrap();
        assert_eq!(
            FixtureConfig::from_json_file(&path).unwrap().control_tag,
            "PODMAN"
        );
        assert!(FixtureConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars = hashmap! {
            ENV_IMAGE => "rabbitmq:3.13-management",
            ENV_PORTS => "5673:5672, 15673:15672",
            ENV_CONTAINER_NAME => "shared-rabbit",
        };
        let config = FixtureConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.image, "rabbitmq:3.13-management");
        assert_eq!(config.ports, vec!["5673:5672", "15673:15672"]);
        assert_eq!(config.container_name.as_deref(), Some("shared-rabbit"));
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn test_overrides_are_validated() {
        let vars = hashmap! { ENV_PORTS => "5672" };
        assert!(FixtureConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .is_err());
    }

    #[test]
    fn test_validate() {
        assert!(FixtureConfig::new()
            .port("5672:5673")
            .validate()
            .is_err());
        assert!(FixtureConfig::new()
            .port("5672:5672/udp")
            .validate()
            .is_ok());
        assert!(FixtureConfig::new().control_tag("A:B").validate().is_err());
        assert!(FixtureConfig::new().property_key(" ").validate().is_err());
        assert!(FixtureConfig::new().host("").validate().is_err());
    }
}
