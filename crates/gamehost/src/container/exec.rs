//! Attached exec sessions.
//!
//! An [`ExecSession`] is one process launched inside a container with all
//! three standard streams piped back to the daemon. The runtime assigns each
//! session an opaque id at spawn time; everything downstream (multiplexer,
//! output cache, operator commands) refers to the session by that id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use uuid::Uuid;

use super::error::{ContainerError, ContainerResult};

/// Write half of an exec session's stdin.
pub type InputStream = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Read half of an exec session's stdout or stderr.
pub type OutputStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// A process running inside a container with attached byte streams.
pub struct ExecSession {
    id: String,
    container_id: String,
    input: InputStream,
    stdout: OutputStream,
    stderr: OutputStream,
    running: Arc<AtomicBool>,
}

impl ExecSession {
    /// Build a session from raw stream halves.
    ///
    /// Tests use this with in-memory duplex pipes; production code goes
    /// through [`ExecSession::from_child`].
    pub fn from_parts(
        container_id: impl Into<String>,
        input: InputStream,
        stdout: OutputStream,
        stderr: OutputStream,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            container_id: container_id.into(),
            input,
            stdout,
            stderr,
            running,
        }
    }

    /// Wrap a spawned `exec -i` child process.
    ///
    /// A detached waiter task reaps the child and flips the running flag when
    /// the process exits; the flag is the liveness source consulted before
    /// interactive writes.
    pub(crate) fn from_child(container_id: &str, mut child: Child) -> ContainerResult<Self> {
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let session = Self::from_parts(
            container_id,
            Box::new(stdin),
            Box::new(stdout),
            Box::new(stderr),
            running,
        );

        let exec_id = session.id.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            flag.store(false, Ordering::SeqCst);
            debug!("exec session {} exited: {:?}", exec_id, status);
        });

        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared liveness flag, flipped when the underlying process exits.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Split the session into its id and stream halves for registration.
    pub(crate) fn into_parts(self) -> (String, InputStream, OutputStream, OutputStream) {
        (self.id, self.input, self.stdout, self.stderr)
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("id", &self.id)
            .field("container_id", &self.container_id)
            .field("running", &self.is_running())
            .finish()
    }
}

fn missing_pipe(name: &str) -> ContainerError {
    ContainerError::CommandFailed {
        command: "exec".to_string(),
        message: format!("{} pipe was not attached", name),
    }
}
