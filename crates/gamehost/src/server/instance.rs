//! One managed game server container.
//!
//! A [`ServerInstance`] binds the container runtime to the interactive
//! session core: it owns the stream multiplexer, the output cache, the
//! execId-to-script map, and the single event pump task that consumes the
//! multiplexer's channel. All shared maps are reached only through this
//! owner's synchronized accessors.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::container::{ContainerError, ContainerRuntimeApi};
use super::cache::{OutputCache, ScriptLogs};
use super::error::{ServerError, ServerResult};
use super::mux::{OutputEvent, StreamMux};

/// Reserved script launched by `start`.
pub const START_SCRIPT: &str = "StartScript";
/// Reserved script launched by `install`.
pub const INSTALL_SCRIPT: &str = "InstallationScript";
/// Reserved script launched by `update`.
pub const UPDATE_SCRIPT: &str = "UpdateScript";

const RESERVED_SCRIPTS: [&str; 3] = [START_SCRIPT, INSTALL_SCRIPT, UPDATE_SCRIPT];

/// Where the host scripts directory is mounted inside the container.
pub const CONTAINER_SCRIPTS_DIR: &str = "/home/scripts";

/// Whether a script name is one of the reserved lifecycle scripts.
pub fn is_reserved_script(name: &str) -> bool {
    RESERVED_SCRIPTS.contains(&name)
}

/// Validate an operator-supplied script name before it becomes a file path
/// component or a session key.
pub(crate) fn validate_script_name(name: &str) -> ServerResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServerError::Runtime(ContainerError::InvalidInput(format!(
            "script name '{}' is invalid; only alphanumeric, '-', '_' are allowed",
            name
        ))))
    }
}

/// Point-in-time container state, always freshly looked up.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub state: String,
    pub status: String,
}

/// Book-keeping for one open exec session.
struct SessionEntry {
    script: String,
    container_id: String,
    running: Arc<AtomicBool>,
}

/// A single container and its interactive session core.
pub struct ServerInstance {
    id: String,
    image: String,
    image_id: String,
    names: Vec<String>,
    env: Vec<(String, String)>,
    scripts_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntimeApi>,
    mux: Arc<StreamMux>,
    cache: Arc<RwLock<OutputCache>>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    /// Guards name reservation so two concurrent launches of the same script
    /// name cannot both pass the collision check.
    active_names: Arc<Mutex<HashSet<String>>>,
    pump: JoinHandle<()>,
}

impl ServerInstance {
    /// Attach to an existing container, looking up its metadata fresh.
    pub async fn attach(
        runtime: Arc<dyn ContainerRuntimeApi>,
        id: impl Into<String>,
        env: Vec<(String, String)>,
        scripts_dir: PathBuf,
    ) -> ServerResult<Arc<Self>> {
        let id = id.into();
        let container = runtime
            .get_container(&id)
            .await?
            .ok_or_else(|| ContainerError::ContainerNotFound(id.clone()))?;

        let (event_tx, event_rx) = StreamMux::channel();
        let mux = Arc::new(StreamMux::new(event_tx));
        let cache = Arc::new(RwLock::new(OutputCache::new()));
        let sessions: Arc<RwLock<HashMap<String, SessionEntry>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let active_names = Arc::new(Mutex::new(HashSet::new()));

        let pump = tokio::spawn(event_pump(
            event_rx,
            Arc::clone(&mux),
            Arc::clone(&cache),
            Arc::clone(&sessions),
            Arc::clone(&active_names),
        ));

        info!("attached to container {} ({})", id, container.image);
        Ok(Arc::new(Self {
            id,
            image: container.image,
            image_id: container.image_id,
            names: container.names,
            env,
            scripts_dir,
            runtime,
            mux,
            cache,
            sessions,
            active_names,
            pump,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Start the container, then launch the reserved start script.
    pub async fn start(&self) -> ServerResult<String> {
        self.runtime.start_container(&self.id).await?;
        self.launch(START_SCRIPT).await
    }

    /// Start the container, then launch the reserved installation script.
    pub async fn install(&self) -> ServerResult<String> {
        self.runtime.start_container(&self.id).await?;
        self.launch(INSTALL_SCRIPT).await
    }

    /// Start the container, then launch the reserved update script.
    pub async fn update(&self) -> ServerResult<String> {
        self.runtime.start_container(&self.id).await?;
        self.launch(UPDATE_SCRIPT).await
    }

    /// Stop the container.
    ///
    /// Teardown order matters: input streams first, then the cache, then the
    /// runtime stop call. A session must never be writable while its runtime
    /// side is being torn down.
    pub async fn stop(&self) -> ServerResult<()> {
        self.mux.remove_all().await;
        self.cache.write().await.clear();
        self.sessions.write().await.clear();
        self.active_names.lock().await.clear();
        self.runtime.stop_container(&self.id).await?;
        info!("stopped container {}", self.id);
        Ok(())
    }

    /// Fresh state/status lookup. Never cached; container state changes
    /// outside this process.
    pub async fn status(&self) -> ServerResult<ServerStatus> {
        let container = self
            .runtime
            .get_container(&self.id)
            .await?
            .ok_or_else(|| ContainerError::ContainerNotFound(self.id.clone()))?;
        Ok(ServerStatus {
            state: container.state.to_string(),
            status: container.status,
        })
    }

    /// Launch an arbitrary script as a new session.
    ///
    /// With no name supplied a collision-resistant one is generated. An
    /// optional body is materialized under the server's scripts directory
    /// before launch.
    pub async fn exec_script(
        &self,
        name: Option<&str>,
        body: Option<&str>,
    ) -> ServerResult<String> {
        let name = match name {
            Some(name) => {
                validate_script_name(name)?;
                if is_reserved_script(name) {
                    return Err(ServerError::ReservedName(name.to_string()));
                }
                name.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        if let Some(body) = body {
            self.write_script(&name, body).await?;
        }

        self.launch(&name).await
    }

    /// Forward operator input to an open session.
    ///
    /// The exec id must belong to this container and its process must still
    /// be running; a stale or foreign id fails with `InvalidSession` and
    /// performs no write.
    pub async fn interact(&self, exec_id: &str, text: &str) -> ServerResult<()> {
        {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(exec_id)
                .ok_or_else(|| ServerError::InvalidSession(exec_id.to_string()))?;
            if entry.container_id != self.id || !entry.running.load(Ordering::SeqCst) {
                return Err(ServerError::InvalidSession(exec_id.to_string()));
            }
        }
        self.mux.write(exec_id, text.as_bytes()).await
    }

    /// Snapshot of all captured output, keyed by script name.
    pub async fn logs(&self) -> HashMap<String, ScriptLogs> {
        self.cache.read().await.snapshot()
    }

    /// Script name of an open session, if any.
    pub async fn session_script(&self, exec_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(exec_id)
            .map(|entry| entry.script.clone())
    }

    /// Number of currently open sessions.
    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of sessions with a writable input stream.
    pub async fn writable_sessions(&self) -> usize {
        self.mux.tracked().await
    }

    /// Tear down the session core without stopping the container. Terminal:
    /// the instance must not be used afterwards.
    pub async fn shutdown(&self) {
        self.mux.remove_all().await;
        self.pump.abort();
        debug!("instance {} shut down", self.id);
    }

    /// Launch `<scripts_dir>/<script>.sh` inside the container as a new
    /// attached session and register it with the multiplexer.
    async fn launch(&self, script: &str) -> ServerResult<String> {
        // Reserve the name first; released on failure or on session close.
        {
            let mut names = self.active_names.lock().await;
            if !names.insert(script.to_string()) {
                return Err(ServerError::NameCollision(script.to_string()));
            }
        }

        let command = vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!("{}/{}.sh", CONTAINER_SCRIPTS_DIR, script),
        ];
        let exec = match self
            .runtime
            .exec_attached(&self.id, &self.env, &command)
            .await
        {
            Ok(exec) => exec,
            Err(e) => {
                self.active_names.lock().await.remove(script);
                return Err(e.into());
            }
        };

        let exec_id = exec.id().to_string();
        let entry = SessionEntry {
            script: script.to_string(),
            container_id: exec.container_id().to_string(),
            running: exec.running_flag(),
        };

        // A fresh run of a script evicts buffers left over from a previous,
        // already-closed run of the same name.
        self.cache.write().await.remove(script);

        // The name map must know the exec id before any of its output can be
        // processed, so the entry goes in ahead of the mux registration.
        self.sessions.write().await.insert(exec_id.clone(), entry);
        self.mux.register(exec).await;

        info!("launched script '{}' as session {}", script, exec_id);
        Ok(exec_id)
    }

    async fn write_script(&self, name: &str, body: &str) -> ServerResult<()> {
        let path = self.scripts_dir.join(format!("{}.sh", name));
        write_script_file(&path, body).await
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Materialize a script file with the executable bit set.
pub(crate) async fn write_script_file(path: &std::path::Path, body: &str) -> ServerResult<()> {
    let scripted = |source| ServerError::ScriptWrite {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(scripted)?;
    }
    tokio::fs::write(path, body).await.map_err(scripted)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(scripted)?;
    }

    Ok(())
}

/// Sole consumer of a container's output event channel.
///
/// Resolves exec ids to script names, feeds the cache, and finalizes
/// sessions on close. Events for exec ids with no session entry are dropped
/// rather than misattributed.
async fn event_pump(
    mut events: mpsc::Receiver<OutputEvent>,
    mux: Arc<StreamMux>,
    cache: Arc<RwLock<OutputCache>>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    active_names: Arc<Mutex<HashSet<String>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            OutputEvent::Message {
                exec_id,
                target,
                chunk,
            } => {
                let script = sessions
                    .read()
                    .await
                    .get(&exec_id)
                    .map(|entry| entry.script.clone());
                match script {
                    Some(script) => {
                        if !cache.write().await.append(&exec_id, &script, target, &chunk) {
                            debug!("ignoring output for sealed exec {}", exec_id);
                        }
                    }
                    None => debug!("dropping output for unmapped exec {}", exec_id),
                }
            }
            OutputEvent::Closed { exec_id } => {
                cache.write().await.seal(&exec_id);
                mux.remove(&exec_id).await;
                if let Some(entry) = sessions.write().await.remove(&exec_id) {
                    active_names.lock().await.remove(&entry.script);
                    info!("session '{}' ({}) closed", entry.script, exec_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::server::testing::MockRuntime;

    async fn attached(runtime: &Arc<MockRuntime>) -> Arc<ServerInstance> {
        runtime.add_container("c1", "serverA");
        ServerInstance::attach(
            Arc::clone(runtime) as Arc<dyn ContainerRuntimeApi>,
            "c1",
            Vec::new(),
            PathBuf::from("/tmp/gamehost-test-scripts"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_attach_requires_existing_container() {
        let runtime = MockRuntime::new();
        let result = ServerInstance::attach(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntimeApi>,
            "missing",
            Vec::new(),
            PathBuf::from("/tmp/gamehost-test-scripts"),
        )
        .await;
        assert!(matches!(
            result,
            Err(ServerError::Runtime(ContainerError::ContainerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_launches_reserved_script() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let exec_id = instance.start().await.unwrap();
        assert_eq!(
            instance.session_script(&exec_id).await.as_deref(),
            Some(START_SCRIPT)
        );

        let exec = runtime.take_exec();
        assert_eq!(exec.exec_id, exec_id);
        assert_eq!(
            exec.command,
            vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                format!("{}/{}.sh", CONTAINER_SCRIPTS_DIR, START_SCRIPT),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_propagates_runtime_failure() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;
        runtime.fail_start.store(true, Ordering::SeqCst);

        let result = instance.start().await;
        assert!(matches!(
            result,
            Err(ServerError::Runtime(ContainerError::CommandFailed { .. }))
        ));
        assert_eq!(instance.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_output_flows_into_logs_and_seals_on_close() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        instance.start().await.unwrap();
        let mut exec = runtime.take_exec();
        exec.stdout.write_all(b"Server ready").await.unwrap();
        exec.stdout.shutdown().await.unwrap();
        drop(exec.stdout);
        drop(exec.stderr);

        // Session finalization: entry removed once close is processed.
        let inst = Arc::clone(&instance);
        for _ in 0..200 {
            if inst.open_sessions().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(instance.open_sessions().await, 0);

        let logs = instance.logs().await;
        assert_eq!(logs[START_SCRIPT].stdout, "Server ready");
        assert_eq!(logs[START_SCRIPT].stderr, "");
    }

    #[tokio::test]
    async fn test_two_sessions_keep_output_separated() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        instance.start().await.unwrap();
        instance.exec_script(Some("backup"), None).await.unwrap();
        let mut first = runtime.take_exec();
        let mut second = runtime.take_exec();

        first.stdout.write_all(b"from start").await.unwrap();
        second.stdout.write_all(b"from backup").await.unwrap();
        second.stderr.write_all(b"backup warning").await.unwrap();

        let inst = Arc::clone(&instance);
        for _ in 0..200 {
            let logs = inst.logs().await;
            let ready = logs.get(START_SCRIPT).is_some_and(|l| !l.stdout.is_empty())
                && logs
                    .get("backup")
                    .is_some_and(|l| !l.stdout.is_empty() && !l.stderr.is_empty());
            if ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let logs = instance.logs().await;
        assert_eq!(logs[START_SCRIPT].stdout, "from start");
        assert_eq!(logs[START_SCRIPT].stderr, "");
        assert_eq!(logs["backup"].stdout, "from backup");
        assert_eq!(logs["backup"].stderr, "backup warning");
    }

    #[tokio::test]
    async fn test_name_collision_refused_while_session_open() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        instance.exec_script(Some("backup"), None).await.unwrap();
        let result = instance.exec_script(Some("backup"), None).await;
        assert!(matches!(result, Err(ServerError::NameCollision(_))));

        // Exactly one exec reached the runtime.
        assert_eq!(runtime.execs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_name_frees_after_session_close_and_buffers_reset() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        instance.exec_script(Some("backup"), None).await.unwrap();
        let mut exec = runtime.take_exec();
        exec.stdout.write_all(b"first run").await.unwrap();
        drop(exec.stdout);
        drop(exec.stderr);

        let inst = Arc::clone(&instance);
        for _ in 0..200 {
            if inst.open_sessions().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // The name is free again, and the relaunch starts with clean buffers.
        instance.exec_script(Some("backup"), None).await.unwrap();
        let logs = instance.logs().await;
        assert!(
            logs.get("backup")
                .is_none_or(|l| !l.stdout.contains("first run"))
        );
    }

    #[tokio::test]
    async fn test_reserved_names_rejected_for_user_scripts() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        for name in [START_SCRIPT, INSTALL_SCRIPT, UPDATE_SCRIPT] {
            let result = instance.exec_script(Some(name), None).await;
            assert!(matches!(result, Err(ServerError::ReservedName(_))));
        }
    }

    #[tokio::test]
    async fn test_generated_names_are_unique() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let first = instance.exec_script(None, None).await.unwrap();
        let second = instance.exec_script(None, None).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(instance.open_sessions().await, 2);
    }

    #[tokio::test]
    async fn test_interact_unknown_exec_is_invalid_session() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let result = instance.interact("never-registered", "say hi\n").await;
        assert!(matches!(result, Err(ServerError::InvalidSession(_))));
        assert_eq!(instance.open_sessions().await, 0);
        assert!(instance.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_interact_exited_process_is_invalid_session() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let exec_id = instance.start().await.unwrap();
        let exec = runtime.take_exec();
        exec.running.store(false, Ordering::SeqCst);

        let result = instance.interact(&exec_id, "say hi\n").await;
        assert!(matches!(result, Err(ServerError::InvalidSession(_))));
    }

    #[tokio::test]
    async fn test_interact_writes_to_running_session() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let exec_id = instance.start().await.unwrap();
        let mut exec = runtime.take_exec();

        instance.interact(&exec_id, "save world\n").await.unwrap();

        let mut buf = [0u8; 32];
        let n = exec.input.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"save world\n");
    }

    #[tokio::test]
    async fn test_stop_tears_down_streams_then_cache_then_container() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        instance.start().await.unwrap();
        let _exec = runtime.take_exec();
        assert_eq!(instance.writable_sessions().await, 1);

        instance.stop().await.unwrap();

        assert_eq!(instance.writable_sessions().await, 0);
        assert!(instance.logs().await.is_empty());
        let calls = runtime.calls();
        assert_eq!(calls.last().unwrap(), "stop c1");
    }

    #[tokio::test]
    async fn test_status_is_always_a_fresh_lookup() {
        let runtime = MockRuntime::new();
        let instance = attached(&runtime).await;

        let calls_before = runtime.calls().len();
        instance.status().await.unwrap();
        instance.status().await.unwrap();
        let calls_after = runtime.calls().len();
        assert_eq!(calls_after - calls_before, 2);
    }

    #[test]
    fn test_validate_script_name() {
        assert!(validate_script_name("backup-daily_1").is_ok());
        assert!(validate_script_name("").is_err());
        assert!(validate_script_name("../evil").is_err());
        assert!(validate_script_name("rm -rf").is_err());
    }

    #[test]
    fn test_reserved_script_names() {
        assert!(is_reserved_script(START_SCRIPT));
        assert!(is_reserved_script(INSTALL_SCRIPT));
        assert!(is_reserved_script(UPDATE_SCRIPT));
        assert!(!is_reserved_script("backup"));
    }
}
