use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

lazy_static! {
    static ref PORT_BINDING: Regex =
        Regex::new(r"^(?P<host>\d{1,5}):(?P<container>\d{1,5})(?:/(?P<proto>tcp|udp))?$")
            .expect("port binding pattern is valid");
}

/// Transport protocol of a published port
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    #[display("tcp")]
    Tcp,
    #[display("udp")]
    Udp,
}

/// A fixed `host:container` port mapping, in the same notation as `docker run -p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(host: u16, container: u16) -> Self {
        Self {
            host,
            container,
            protocol: Protocol::Tcp,
        }
    }

    pub fn udp(mut self) -> Self {
        self.protocol = Protocol::Udp;
        self
    }
}

impl TryFrom<&str> for PortBinding {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = PORT_BINDING
            .captures(s)
            .ok_or_else(|| Error::InvalidPortBinding(s.to_string()))?;

        let port = |name: &str| -> Result<u16> {
            caps[name]
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| Error::InvalidPortBinding(s.to_string()))
        };

        let protocol = match caps.name("proto").map(|m| m.as_str()) {
            Some("udp") => Protocol::Udp,
            _ => Protocol::Tcp,
        };

        Ok(Self {
            host: port("host")?,
            container: port("container")?,
            protocol,
        })
    }
}

impl FromStr for PortBinding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Tcp => write!(f, "{}:{}", self.host, self.container),
            Protocol::Udp => write!(f, "{}:{}/udp", self.host, self.container),
        }
    }
}

/// Container image reference, `name[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub tag: String,
}

impl ImageSpec {
    pub fn new(name: impl ToString, tag: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }
}

impl TryFrom<&str> for ImageSpec {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(Error::InvalidImage(s.to_string()));
        }

        // a ':' before the last '/' belongs to a registry host, not a tag
        let last_segment = s.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match s[last_segment..].rfind(':') {
            Some(i) => s.split_at(last_segment + i),
            None => (s, ":latest"),
        };
        let tag = &tag[1..];

        if name.is_empty() || name.ends_with('/') || tag.is_empty() {
            return Err(Error::InvalidImage(s.to_string()));
        }

        Ok(Self::new(name, tag))
    }
}

impl FromStr for ImageSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Reference to the running shared resource.
#[derive(Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[display("{id}@{host}")]
pub struct ResourceHandle {
    /// Identifier understood by the control tooling, e.g. a container id.
    pub id: String,
    pub host: String,
    pub ports: Vec<PortBinding>,
}

impl ResourceHandle {
    pub fn new(id: impl ToString, host: impl ToString, ports: Vec<PortBinding>) -> Self {
        Self {
            id: id.to_string(),
            host: host.to_string(),
            ports,
        }
    }

    /// Host port bound to the given container port, if published.
    pub fn host_port(&self, container: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container == container)
            .map(|p| p.host)
    }

    /// `host:port` address for the given container port.
    pub fn endpoint(&self, container: u16) -> Option<String> {
        self.host_port(container)
            .map(|port| format!("{}:{}", self.host, port))
    }

    /// Tagged control string, `<TAG>:<id>`.
    pub fn control_string(&self, tag: &str) -> String {
        format!("{}:{}", tag, self.id)
    }
}

/// Connection details handed to collaborating code and external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub control: String,
    pub id: String,
    pub host: String,
    pub ports: Vec<PortBinding>,
}

impl ConnectionInfo {
    pub fn new(handle: &ResourceHandle, tag: &str) -> Self {
        Self {
            control: handle.control_string(tag),
            id: handle.id.clone(),
            host: handle.host.clone(),
            ports: handle.ports.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
