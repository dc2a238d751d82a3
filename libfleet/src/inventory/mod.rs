//! Host inventory: what to connect to, how, and through which jump host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use derive_getters::Getters;
use serde::{Deserialize, Deserializer, Serialize};

pub type Port = u16;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";
pub const DEFAULT_COMMANDS: &str = "whoami";

pub fn default_ssh_port() -> Port {
    22
}

/// Jump host name -> credentials. Shared read-only between every running
/// host job.
pub type JumpHostMap = HashMap<String, JumpHost>;
pub type SharedJumpHosts = Arc<JumpHostMap>;

/// One inventory row. Every field is optional; [`HostDescriptor::resolve`]
/// fills in the defaults.
#[derive(Getters, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    #[serde(default)]
    host: Option<String>,
    #[serde(default, deserialize_with = "self::deserialize_optional_port")]
    port: Option<Port>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    commands: Option<String>,
    #[serde(default)]
    jumphost: Option<String>,
    #[serde(default)]
    known_hosts_policy: Option<HostKeyPolicy>,
}

impl HostDescriptor {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials<S: Into<String>>(mut self, username: S, password: S) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_commands<S: Into<String>>(mut self, commands: S) -> Self {
        self.commands = Some(commands.into());
        self
    }

    pub fn with_jumphost<S: Into<String>>(mut self, jumphost: S) -> Self {
        self.jumphost = Some(jumphost.into());
        self
    }

    pub fn with_known_hosts_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.known_hosts_policy = Some(policy);
        self
    }

    /// The host name used when reporting, defaults included.
    pub fn display_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn display_port(&self) -> Port {
        self.port.unwrap_or_else(default_ssh_port)
    }

    /// Apply defaults for every absent field.
    pub fn resolve(&self) -> ResolvedHost {
        ResolvedHost {
            endpoint: Endpoint {
                host: self.display_host().to_string(),
                port: self.display_port(),
                username: self
                    .username
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USERNAME.into()),
                password: self
                    .password
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PASSWORD.into()),
            },
            commands: self
                .commands
                .clone()
                .unwrap_or_else(|| DEFAULT_COMMANDS.into()),
            jumphost: self.jumphost.clone(),
            policy: self.known_hosts_policy.clone().unwrap_or_default(),
        }
    }
}

/// A descriptor with its defaults applied.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    endpoint: Endpoint,
    commands: String,
    jumphost: Option<String>,
    policy: HostKeyPolicy,
}

/// Where to connect and who to authenticate as.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: Port,
    username: String,
    #[getter(skip)]
    password: String,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: Port, username: S, password: S) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpHost {
    host: String,
    #[serde(
        default = "self::default_ssh_port",
        deserialize_with = "self::deserialize_port"
    )]
    port: Port,
    username: String,
    password: String,
}

impl JumpHost {
    pub fn new<S: Into<String>>(host: S, port: Port, username: S, password: S) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// How a presented server key is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents.
    #[default]
    AcceptAny,
    /// Check against a known_hosts file, learning keys for hosts it has not
    /// seen before. A changed key is still rejected.
    TrustOnFirstUse { path: PathBuf },
    /// Check against a known_hosts file; unknown hosts are rejected.
    KnownHosts { path: PathBuf },
    /// The server key's fingerprint must match exactly.
    Fingerprint { value: String },
}

/// Inventory exports tend to carry ports as numbers or as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(Port),
    Text(String),
}

fn parse_port<E: serde::de::Error>(repr: PortRepr) -> Result<Port, E> {
    match repr {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid port: {text}"))),
    }
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Port, D::Error> {
    parse_port(PortRepr::deserialize(deserializer)?)
}

fn deserialize_optional_port<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Port>, D::Error> {
    match Option::<PortRepr>::deserialize(deserializer)? {
        Some(repr) => parse_port(repr).map(Some),
        None => Ok(None),
    }
}
