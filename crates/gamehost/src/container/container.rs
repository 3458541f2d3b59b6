//! Container types and configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use super::error::{ContainerError, ContainerResult};

/// Deserialize a names field that can be either a list of strings (podman)
/// or a single comma-separated string (docker `ps --format json`).
fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, SeqAccess, Visitor};
    use std::fmt;

    struct StringOrSeq;

    impl<'de> Visitor<'de> for StringOrSeq {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut names = Vec::new();
            while let Some(name) = seq.next_element::<String>()? {
                names.push(name);
            }
            Ok(names)
        }
    }

    deserializer.deserialize_any(StringOrSeq)
}

/// Port mapping for a game server container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port in the container.
    pub container_port: u16,
    /// Protocol (tcp or udp).
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
            protocol: default_protocol(),
        }
    }

    /// UDP mapping, the common case for game traffic.
    pub fn udp(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
            protocol: "udp".to_string(),
        }
    }
}

/// Configuration for creating a new server container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name (optional).
    pub name: Option<String>,
    /// Docker/OCI image to use.
    pub image: String,
    /// Command to run.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Port mappings.
    pub ports: Vec<PortMapping>,
    /// Volume mounts (host_path -> container_path).
    pub volumes: Vec<(String, String)>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all fields before handing them to the runtime CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_container_name(name)?;
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        for (host_path, container_path) in &self.volumes {
            validate_volume_path(host_path, "host")?;
            validate_volume_path(container_path, "container")?;
        }

        Ok(())
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn volume(
        mut self,
        host_path: impl Into<String>,
        container_path: impl Into<String>,
    ) -> Self {
        self.volumes.push((host_path.into(), container_path.into()));
        self
    }
}

/// Container state as reported by `ps`/`inspect`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Container information from `ps --format json`.
///
/// Field shapes differ between docker (flat objects, one per line, `Names` as
/// a comma-separated string) and podman (a JSON array, `Names` as a list);
/// the aliases and the custom names deserializer absorb both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    /// Container ID.
    #[serde(alias = "Id", alias = "ID")]
    pub id: String,

    /// Container names.
    #[serde(default, deserialize_with = "deserialize_names")]
    pub names: Vec<String>,

    /// Image used.
    #[serde(default)]
    pub image: String,

    /// Image ID (podman only; empty under docker `ps`).
    #[serde(default, alias = "ImageID")]
    pub image_id: String,

    /// Container state.
    #[serde(default)]
    pub state: ContainerState,

    /// Status string (e.g., "Up 5 minutes").
    #[serde(default)]
    pub status: String,
}

// ============================================================================
// Input Validation
// ============================================================================

/// Validate a Docker/OCI image name.
///
/// Valid characters: alphanumeric, `.`, `-`, `_`, `/`, `:`, `@`.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container name: alphanumeric with hyphens and underscores,
/// starting with an alphanumeric character or underscore.
pub(crate) fn validate_container_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    let first_char = name.chars().next().unwrap();
    if !first_char.is_ascii_alphanumeric() && first_char != '_' {
        return Err(ContainerError::InvalidInput(
            "container name must start with an alphanumeric character or underscore".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX conventions).
pub(crate) fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let first_char = key.chars().next().unwrap();
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

/// Validate a volume path (host or container side).
pub(crate) fn validate_volume_path(path: &str, side: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(format!(
            "{} volume path cannot be empty",
            side
        )));
    }

    if path.contains('\0') {
        return Err(ContainerError::InvalidInput(format!(
            "{} volume path cannot contain null bytes",
            side
        )));
    }

    let dangerous_chars = [
        '$', '`', '!', '&', '|', ';', '<', '>', '(', ')', '{', '}', '[', ']', '*', '?', '\\', '"',
        '\'', '\n', '\r',
    ];
    for c in dangerous_chars.iter() {
        if path.contains(*c) {
            return Err(ContainerError::InvalidInput(format!(
                "{} volume path contains dangerous character '{}'",
                side, c
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_image_name() {
        assert!(validate_image_name("cm2network/steamcmd:latest").is_ok());
        assert!(validate_image_name("itzg/minecraft-server").is_ok());
        assert!(validate_image_name("registry.io/image@sha256:abc123").is_ok());

        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image with spaces").is_err());
        assert!(validate_image_name("image;rm -rf /").is_err());
        assert!(validate_image_name("../../../etc/passwd").is_err());
    }

    #[test]
    fn test_validate_container_name() {
        assert!(validate_container_name("valheim-1").is_ok());
        assert!(validate_container_name("_private").is_ok());

        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("-starts-with-dash").is_err());
        assert!(validate_container_name("$(whoami)").is_err());
    }

    #[test]
    fn test_validate_env_var_key() {
        assert!(validate_env_var_key("SERVER_PORT").is_ok());
        assert!(validate_env_var_key("_PRIVATE").is_ok());

        assert!(validate_env_var_key("").is_err());
        assert!(validate_env_var_key("123VAR").is_err());
        assert!(validate_env_var_key("MY-VAR").is_err());
    }

    #[test]
    fn test_validate_volume_path() {
        assert!(validate_volume_path("/srv/gamehost/scripts", "host").is_ok());
        assert!(validate_volume_path("/path;rm -rf /", "host").is_err());
        assert!(validate_volume_path("/path\0null", "host").is_err());
    }

    #[test]
    fn test_container_config_validate() {
        let config = ContainerConfig::new("cm2network/steamcmd")
            .name("cs-server")
            .env("SERVER_PORT", "27015")
            .volume("/srv/scripts", "/home/scripts");
        assert!(config.validate().is_ok());

        let config = ContainerConfig::new("bad image");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_container_parses_docker_ps_line() {
        let line = r#"{"ID":"abc123","Names":"valheim-1","Image":"lloesche/valheim-server","State":"running","Status":"Up 2 hours"}"#;
        let container: Container = serde_json::from_str(line).unwrap();
        assert_eq!(container.id, "abc123");
        assert_eq!(container.names, vec!["valheim-1".to_string()]);
        assert_eq!(container.state, ContainerState::Running);
    }

    #[test]
    fn test_container_parses_podman_ps_entry() {
        let entry = r#"{"Id":"def456","Names":["cs-server"],"Image":"cm2network/steamcmd","ImageID":"sha256:f00","State":"exited","Status":"Exited (0) 5 minutes ago"}"#;
        let container: Container = serde_json::from_str(entry).unwrap();
        assert_eq!(container.id, "def456");
        assert_eq!(container.image_id, "sha256:f00");
        assert_eq!(container.state, ContainerState::Exited);
    }
}
