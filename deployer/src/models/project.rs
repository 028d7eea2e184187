//! Server and project models

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// One remote SSH endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerTarget {
    /// Host name or IP address
    pub host: String,

    /// SSH port; accepted as a number or a numeric string
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Login password
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub password: SecretString,
}

impl ServerTarget {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: secret(password.to_string()),
        }
    }

    /// `host:port` for socket connections
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Clone for ServerTarget {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: secret(self.password.expose_secret().to_string()),
        }
    }
}

fn secret(value: String) -> SecretString {
    SecretString::new(value.into_boxed_str())
}

fn default_port() -> u16 {
    22
}

fn serialize_secret<S>(value: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(secret)
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port: {:?}", text))),
    }
}

/// One local → remote upload entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    #[serde(default)]
    pub local: String,

    /// Remote destination; a trailing `/` means "into this directory"
    #[serde(default)]
    pub remote: String,
}

impl FileMapping {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// Entries with an empty side are skipped rather than failing
    pub fn is_valid(&self) -> bool {
        !self.local.trim().is_empty() && !self.remote.trim().is_empty()
    }
}

/// Named remote lifecycle scripts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    #[serde(default)]
    pub deploy: String,

    #[serde(default)]
    pub restart: String,

    #[serde(default)]
    pub status: String,
}

impl Scripts {
    pub fn get(&self, kind: ScriptKind) -> &str {
        match kind {
            ScriptKind::Deploy => &self.deploy,
            ScriptKind::Restart => &self.restart,
            ScriptKind::Status => &self.status,
        }
    }
}

/// Which lifecycle script to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Deploy,
    Restart,
    Status,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptKind::Deploy => "deploy",
            ScriptKind::Restart => "restart",
            ScriptKind::Status => "status",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ScriptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deploy" => Ok(ScriptKind::Deploy),
            "restart" => Ok(ScriptKind::Restart),
            "status" => Ok(ScriptKind::Status),
            _ => Err(format!("Invalid script name: {}", s)),
        }
    }
}

/// A deployable project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Key into the server table
    #[serde(default)]
    pub server: String,

    /// Local shell commands run before upload, in order
    #[serde(default)]
    pub pre_commands: Vec<String>,

    /// Files to upload, in order
    #[serde(default)]
    pub files: Vec<FileMapping>,

    #[serde(default)]
    pub scripts: Scripts,
}
