//! Minimal Compose file model: just enough to enumerate services and
//! their host-port bindings. Unknown keys are ignored.

use crate::error::VibemanError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "EnvVars::is_empty")]
    pub environment: EnvVars,
}

impl ComposeFile {
    pub fn parse(content: &str) -> Result<Self, VibemanError> {
        serde_yaml::from_str(content)
            .map_err(|e| VibemanError::compose_invalid("compose.parse", e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, VibemanError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VibemanError::compose_invalid(
                "compose.parse",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        Self::parse(&content)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.get(name)
    }
}

/// One `ports` entry. Compose accepts `"H:C"`, `"H:C/proto"` and a bare
/// container port; all three are preserved through re-serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: Option<u16>,
    pub container: u16,
    pub protocol: Option<String>,
}

impl<'de> Deserialize<'de> for PortMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u16),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(container) => Ok(PortMapping {
                host: None,
                container,
                protocol: None,
            }),
            Raw::Str(s) => parse_port_entry(&s).map_err(D::Error::custom),
        }
    }
}

impl Serialize for PortMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.host, &self.protocol) {
            (None, None) => serializer.serialize_u16(self.container),
            (Some(host), None) => serializer.serialize_str(&format!("{host}:{}", self.container)),
            (Some(host), Some(proto)) => {
                serializer.serialize_str(&format!("{host}:{}/{proto}", self.container))
            }
            (None, Some(proto)) => serializer.serialize_str(&format!("{}/{proto}", self.container)),
        }
    }
}

fn parse_port_entry(entry: &str) -> Result<PortMapping, String> {
    let (ports, protocol) = match entry.split_once('/') {
        Some((ports, proto)) => (ports, Some(proto.to_string())),
        None => (entry, None),
    };
    match ports.split_once(':') {
        Some((host, container)) => {
            let host = host
                .parse::<u16>()
                .map_err(|_| format!("invalid host port in '{entry}'"))?;
            let container = container
                .parse::<u16>()
                .map_err(|_| format!("invalid container port in '{entry}'"))?;
            Ok(PortMapping {
                host: Some(host),
                container,
                protocol,
            })
        }
        None => {
            let container = ports
                .parse::<u16>()
                .map_err(|_| format!("invalid port entry '{entry}'"))?;
            Ok(PortMapping {
                host: None,
                container,
                protocol,
            })
        }
    }
}

/// `environment` in either map form or `KEY=VALUE` list form. Scalar
/// values (numbers, booleans) are coerced to their string spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars(pub BTreeMap<String, String>);

impl EnvVars {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for EnvVars {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(BTreeMap<String, serde_yaml::Value>),
            List(Vec<String>),
        }
        let mut vars = BTreeMap::new();
        match Raw::deserialize(deserializer)? {
            Raw::Map(map) => {
                for (key, value) in map {
                    vars.insert(key, scalar_to_string(&value));
                }
            }
            Raw::List(entries) => {
                for entry in entries {
                    match entry.split_once('=') {
                        Some((key, value)) => {
                            vars.insert(key.to_string(), value.to_string());
                        }
                        None => {
                            vars.insert(entry, String::new());
                        }
                    }
                }
            }
        }
        Ok(EnvVars(vars))
    }
}

impl Serialize for EnvVars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}
