//! Container runtime management module.
//!
//! Provides an async interface to manage game server containers via the
//! Docker or Podman CLI. The runtime is auto-detected or can be configured
//! explicitly. Interactive exec sessions are spawned with piped streams so
//! the session core can multiplex their input and output.

mod container;
mod error;
pub mod exec;

pub use container::{Container, ContainerConfig, ContainerState, PortMapping};
pub use error::{ContainerError, ContainerResult};
pub use exec::ExecSession;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime (default on most game server hosts).
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether this runtime requires SELinux volume labels (:Z suffix).
    fn needs_selinux_labels(&self) -> bool {
        match self {
            RuntimeType::Docker => false,
            RuntimeType::Podman => true,
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Validate a container ID or name before splicing it into a CLI invocation.
fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}

/// The slice of the runtime client this crate relies on, behind a trait so
/// tests can substitute an in-memory fake.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create a server container (created stopped; `start_container` is the
    /// explicit lifecycle step). Returns the new container id.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;

    async fn start_container(&self, container_id: &str) -> ContainerResult<()>;

    async fn stop_container(&self, container_id: &str) -> ContainerResult<()>;

    /// Fresh `ps --filter` lookup by container id. Returns `None` when the
    /// container does not exist.
    async fn get_container(&self, container_id: &str) -> ContainerResult<Option<Container>>;

    /// Spawn a process inside the container with stdin/stdout/stderr piped
    /// back to the caller.
    async fn exec_attached(
        &self,
        container_id: &str,
        env: &[(String, String)],
        command: &[String],
    ) -> ContainerResult<ExecSession>;
}

/// CLI-driven container runtime client.
///
/// Supports both Docker and Podman with automatic detection.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Tries Docker first, then falls back to Podman.
    pub fn new() -> Self {
        if Self::is_binary_available("docker") {
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        } else if Self::is_binary_available("podman") {
            Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            }
        } else {
            // Fall back to docker, will fail at runtime.
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run a runtime CLI subcommand to completion and return its stdout.
    async fn run_cli(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        self.run_cli("version", &args).await
    }

    async fn create_container_impl(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;

        let mut args: Vec<String> = vec!["create".to_string()];

        if let Some(ref name) = config.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        for port in &config.ports {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                port.host_port, port.container_port, port.protocol
            ));
        }

        // Volume mounts - handle SELinux labels for Podman.
        for (host, container) in &config.volumes {
            args.push("-v".to_string());
            if self.runtime_type.needs_selinux_labels() {
                args.push(format!("{}:{}:Z", host, container));
            } else {
                args.push(format!("{}:{}", host, container));
            }
        }

        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(config.image.clone());
        args.extend(config.command.iter().cloned());

        let stdout = self.run_cli("create", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start_container_impl(&self, container_id: &str) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;
        let args = vec!["start".to_string(), container_id.to_string()];
        self.run_cli("start", &args).await.map(|_| ())
    }

    async fn stop_container_impl(&self, container_id: &str) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;
        let args = vec!["stop".to_string(), container_id.to_string()];
        self.run_cli("stop", &args).await.map(|_| ())
    }

    async fn get_container_impl(&self, container_id: &str) -> ContainerResult<Option<Container>> {
        validate_container_id_or_name(container_id)?;

        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("id={}", container_id),
            "--format".to_string(),
            "json".to_string(),
        ];
        let stdout = self.run_cli("ps", &args).await?;
        Ok(parse_ps_output(&stdout)?.into_iter().next())
    }

    async fn exec_attached_impl(
        &self,
        container_id: &str,
        env: &[(String, String)],
        command: &[String],
    ) -> ContainerResult<ExecSession> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["exec".to_string(), "-i".to_string()];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(container_id.to_string());
        args.extend(command.iter().cloned());

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::CommandFailed {
                command: "exec".to_string(),
                message: e.to_string(),
            })?;

        ExecSession::from_child(container_id, child)
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.create_container_impl(config).await
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.start_container_impl(container_id).await
    }

    async fn stop_container(&self, container_id: &str) -> ContainerResult<()> {
        self.stop_container_impl(container_id).await
    }

    async fn get_container(&self, container_id: &str) -> ContainerResult<Option<Container>> {
        self.get_container_impl(container_id).await
    }

    async fn exec_attached(
        &self,
        container_id: &str,
        env: &[(String, String)],
        command: &[String],
    ) -> ContainerResult<ExecSession> {
        self.exec_attached_impl(container_id, env, command).await
    }
}

/// Parse `ps --format json` output.
///
/// Podman prints a single JSON array; docker prints one JSON object per line.
fn parse_ps_output(stdout: &str) -> ContainerResult<Vec<Container>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| ContainerError::ParseError(e.to_string()));
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| ContainerError::ParseError(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_type_selinux() {
        assert!(!RuntimeType::Docker.needs_selinux_labels());
        assert!(RuntimeType::Podman.needs_selinux_labels());
    }

    #[test]
    fn test_validate_container_id_or_name() {
        assert!(validate_container_id_or_name("abc123").is_ok());
        assert!(validate_container_id_or_name("cs-server_1").is_ok());
        assert!(validate_container_id_or_name("").is_err());
        assert!(validate_container_id_or_name("bad;id").is_err());
    }

    #[test]
    fn test_parse_ps_output_empty() {
        assert!(parse_ps_output("").unwrap().is_empty());
        assert!(parse_ps_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_ps_output_docker_lines() {
        let out = concat!(
            r#"{"ID":"aaa","Names":"one","Image":"img","State":"running","Status":"Up"}"#,
            "\n",
            r#"{"ID":"bbb","Names":"two","Image":"img","State":"exited","Status":"Exited"}"#,
            "\n",
        );
        let containers = parse_ps_output(out).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].id, "aaa");
        assert_eq!(containers[1].names, vec!["two".to_string()]);
    }

    #[test]
    fn test_parse_ps_output_podman_array() {
        let out = r#"[{"Id":"ccc","Names":["three"],"Image":"img","State":"created","Status":"Created"}]"#;
        let containers = parse_ps_output(out).unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].state, ContainerState::Created);
    }
}
