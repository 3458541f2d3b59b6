//! Daemon configuration.
//!
//! The daemon loads `~/.config/gamehost/config.toml`:
//!
//! ```toml
//! [daemon]
//! runtime = "docker"
//! scripts_dir = "~/.local/share/gamehost/scripts"
//!
//! [[servers]]
//! id = "3f1a9c"
//! env = { SERVER_PORT = "27015" }
//! ```
//!
//! Server import files (`import <file>`) describe one container:
//!
//! ```toml
//! image = "lloesche/valheim-server"
//! name = "valheim-1"
//! env = { SERVER_NAME = "midgard" }
//!
//! [[ports]]
//! host_port = 2456
//! container_port = 2456
//! protocol = "udp"
//!
//! [scripts]
//! StartScript = "#!/bin/bash\nexec /usr/local/bin/run-server\n"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerConfig, PortMapping, RuntimeType};
use crate::server::instance::CONTAINER_SCRIPTS_DIR;

pub const APP_NAME: &str = "gamehost";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonSection,
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Container runtime to use; auto-detected when absent.
    pub runtime: Option<RuntimeType>,
    /// Root directory for per-server script files on the host.
    pub scripts_dir: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            runtime: None,
            scripts_dir: "~/.local/share/gamehost/scripts".to_string(),
        }
    }
}

/// A pre-existing container the daemon should attach to at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    /// Container id.
    pub id: String,
    /// Environment injected into every exec session of this server.
    pub env: HashMap<String, String>,
    /// Per-server scripts directory; defaults to `<scripts_dir>/<id>`.
    pub scripts_dir: Option<String>,
}

impl ServerEntry {
    /// Environment as KEY=VALUE pairs, sorted for determinism.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Expanded scripts root directory.
    pub fn scripts_dir(&self) -> PathBuf {
        expand_path(&self.daemon.scripts_dir)
    }
}

/// Default config file location: `~/.config/gamehost/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Declarative description of one server container, loaded from a TOML file
/// by the `import` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Docker/OCI image.
    pub image: String,
    /// Container name.
    #[serde(default)]
    pub name: Option<String>,
    /// Environment for the container and its exec sessions.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Extra volume mounts (host path, container path).
    #[serde(default)]
    pub volumes: Vec<(String, String)>,
    /// Per-server scripts directory; defaults under the daemon scripts root.
    #[serde(default)]
    pub scripts_dir: Option<String>,
    /// Script bodies to materialize at import, keyed by script name.
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

impl ServerConfig {
    /// Parse a server description from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse server config {}", path.display()))
    }

    /// Environment as KEY=VALUE pairs, sorted for determinism.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Host scripts directory for this server.
    pub fn scripts_dir_path(&self, default_root: &Path) -> PathBuf {
        match &self.scripts_dir {
            Some(dir) => expand_path(dir),
            None => {
                let leaf = self
                    .name
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                default_root.join(leaf)
            }
        }
    }

    /// Build the runtime-level container configuration, mounting the scripts
    /// directory at its in-container location.
    pub fn to_container_config(&self, scripts_dir: &Path) -> ContainerConfig {
        let mut config = ContainerConfig::new(&self.image);
        if let Some(ref name) = self.name {
            config = config.name(name);
        }
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        for port in &self.ports {
            config = config.port(port.clone());
        }
        for (host, container) in &self.volumes {
            config = config.volume(host, container);
        }
        config.volume(scripts_dir.display().to_string(), CONTAINER_SCRIPTS_DIR)
    }
}
