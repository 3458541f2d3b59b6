//! Fleet of managed server containers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::RwLock;

use crate::config::{ServerConfig, ServerEntry};
use crate::container::ContainerRuntimeApi;
use super::error::ServerResult;
use super::instance::{ServerInstance, write_script_file, validate_script_name};

/// Owns every attached [`ServerInstance`], keyed by container id.
pub struct ServerManager {
    runtime: Arc<dyn ContainerRuntimeApi>,
    servers: RwLock<HashMap<String, Arc<ServerInstance>>>,
    scripts_root: PathBuf,
}

impl ServerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, scripts_root: PathBuf) -> Self {
        Self {
            runtime,
            servers: RwLock::new(HashMap::new()),
            scripts_root,
        }
    }

    /// Attach to an existing container and track it.
    pub async fn attach(
        &self,
        id: &str,
        env: Vec<(String, String)>,
        scripts_dir: Option<PathBuf>,
    ) -> ServerResult<Arc<ServerInstance>> {
        let scripts_dir = scripts_dir.unwrap_or_else(|| self.scripts_root.join(id));
        let instance =
            ServerInstance::attach(Arc::clone(&self.runtime), id, env, scripts_dir).await?;
        self.servers
            .write()
            .await
            .insert(id.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Attach every server listed in the daemon configuration. Failures are
    /// logged and skipped; one unreachable container must not take down the
    /// rest of the fleet.
    pub async fn attach_configured(&self, entries: &[ServerEntry]) {
        for entry in entries {
            let scripts_dir = entry.scripts_dir.as_deref().map(crate::config::expand_path);
            match self.attach(&entry.id, entry.env_pairs(), scripts_dir).await {
                Ok(_) => info!("attached configured server {}", entry.id),
                Err(e) => warn!("skipping configured server {}: {}", entry.id, e),
            }
        }
    }

    /// Create a container from a server description, materialize its script
    /// files, and attach to it.
    pub async fn import(&self, config: &ServerConfig) -> ServerResult<Arc<ServerInstance>> {
        let scripts_dir = config.scripts_dir_path(&self.scripts_root);

        for (name, body) in &config.scripts {
            validate_script_name(name)?;
            let path = scripts_dir.join(format!("{}.sh", name));
            write_script_file(&path, body).await?;
        }

        let container_config = config.to_container_config(&scripts_dir);
        let id = self.runtime.create_container(&container_config).await?;
        info!("imported server {} from image {}", id, config.image);

        self.attach(&id, config.env_pairs(), Some(scripts_dir)).await
    }

    /// Look up a server by container id, then by container name.
    pub async fn get(&self, key: &str) -> Option<Arc<ServerInstance>> {
        let servers = self.servers.read().await;
        if let Some(instance) = servers.get(key) {
            return Some(Arc::clone(instance));
        }
        servers
            .values()
            .find(|instance| {
                instance
                    .names()
                    .iter()
                    .any(|name| name == key || name.trim_start_matches('/') == key)
            })
            .cloned()
    }

    /// All tracked servers, in stable id order.
    pub async fn list(&self) -> Vec<Arc<ServerInstance>> {
        let servers = self.servers.read().await;
        let mut all: Vec<_> = servers.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Stop tracking a server and tear down its session core. The container
    /// itself is left as-is.
    pub async fn remove(&self, key: &str) -> bool {
        let id = match self.get(key).await {
            Some(instance) => instance.id().to_string(),
            None => return false,
        };
        if let Some(instance) = self.servers.write().await.remove(&id) {
            instance.shutdown().await;
            true
        } else {
            false
        }
    }

    /// Dispose every instance. Containers keep running; only the daemon's
    /// session state is released.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.servers.write().await.drain().collect();
        for (_, instance) in drained {
            instance.shutdown().await;
        }
    }
}
