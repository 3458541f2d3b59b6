//! In-memory container runtime fake for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::container::exec::ExecSession;
use crate::container::{
    Container, ContainerConfig, ContainerError, ContainerResult, ContainerRuntimeApi,
    ContainerState,
};

/// Test-side handles of a spawned fake exec session.
pub(crate) struct ExecPeer {
    pub exec_id: String,
    pub command: Vec<String>,
    pub input: DuplexStream,
    pub stdout: DuplexStream,
    pub stderr: DuplexStream,
    pub running: Arc<AtomicBool>,
}

/// Records every runtime call and serves containers from an in-memory table.
#[derive(Default)]
pub(crate) struct MockRuntime {
    pub calls: Mutex<Vec<String>>,
    pub containers: Mutex<HashMap<String, Container>>,
    pub execs: Mutex<Vec<ExecPeer>>,
    pub fail_start: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a running container under `id` with a single name.
    pub fn add_container(&self, id: &str, name: &str) {
        let container = Container {
            id: id.to_string(),
            names: vec![name.to_string()],
            image: "example/game-server:latest".to_string(),
            image_id: "sha256:deadbeef".to_string(),
            state: ContainerState::Running,
            status: "Up 5 minutes".to_string(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(id.to_string(), container);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Pop the oldest spawned exec's test-side handles.
    pub fn take_exec(&self) -> ExecPeer {
        self.execs.lock().unwrap().remove(0)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntimeApi for MockRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.record(format!("create {}", config.image));
        let id = format!("mock-{}", self.containers.lock().unwrap().len() + 1);
        let name = config.name.clone().unwrap_or_else(|| id.clone());
        self.add_container(&id, &name);
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.record(format!("start {}", container_id));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ContainerError::CommandFailed {
                command: "start".to_string(),
                message: "runtime unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> ContainerResult<()> {
        self.record(format!("stop {}", container_id));
        Ok(())
    }

    async fn get_container(&self, container_id: &str) -> ContainerResult<Option<Container>> {
        self.record(format!("get {}", container_id));
        Ok(self.containers.lock().unwrap().get(container_id).cloned())
    }

    async fn exec_attached(
        &self,
        container_id: &str,
        _env: &[(String, String)],
        command: &[String],
    ) -> ContainerResult<ExecSession> {
        self.record(format!("exec {}", container_id));

        let (input, input_peer) = tokio::io::duplex(4096);
        let (stdout, stdout_peer) = tokio::io::duplex(4096);
        let (stderr, stderr_peer) = tokio::io::duplex(4096);
        let running = Arc::new(AtomicBool::new(true));

        let exec = ExecSession::from_parts(
            container_id,
            Box::new(input),
            Box::new(stdout),
            Box::new(stderr),
            Arc::clone(&running),
        );

        self.execs.lock().unwrap().push(ExecPeer {
            exec_id: exec.id().to_string(),
            command: command.to_vec(),
            input: input_peer,
            stdout: stdout_peer,
            stderr: stderr_peer,
            running,
        });

        Ok(exec)
    }
}
