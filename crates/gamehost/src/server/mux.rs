//! Exec stream multiplexer.
//!
//! One [`StreamMux`] serves a single container. It owns the writable input
//! halves of every open exec session and routes outbound bytes by exec id;
//! each registered session gets one pump task that drains stdout and stderr
//! into the shared event channel. Per-session ordering is preserved: every
//! message fragment of a session is emitted before its final close event.
//! No ordering is guaranteed across different sessions.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;

use crate::container::exec::{ExecSession, InputStream, OutputStream};
use super::error::{ServerError, ServerResult};

/// Size of the shared output event channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Bound on a single interactive write. A wedged pipe must not block the
/// caller indefinitely.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_SIZE: usize = 8192;

/// Which output stream a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTarget {
    Stdout,
    Stderr,
}

/// An event produced by a session's output pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A fragment of session output.
    Message {
        exec_id: String,
        target: StreamTarget,
        chunk: String,
    },
    /// Both output streams of the session reached EOF. Emitted exactly once
    /// per session, after all of its message fragments.
    Closed { exec_id: String },
}

/// Routes operator bytes to exec session inputs and session output to the
/// shared event channel.
pub struct StreamMux {
    inputs: RwLock<HashMap<String, InputStream>>,
    events: mpsc::Sender<OutputEvent>,
}

impl StreamMux {
    pub fn new(events: mpsc::Sender<OutputEvent>) -> Self {
        Self {
            inputs: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create the shared output event channel for one container.
    pub fn channel() -> (mpsc::Sender<OutputEvent>, mpsc::Receiver<OutputEvent>) {
        mpsc::channel(EVENT_BUFFER_SIZE)
    }

    /// Begin tracking a session: store its writable input and spawn the pump
    /// that forwards its output as events.
    pub async fn register(&self, exec: ExecSession) {
        let (exec_id, input, stdout, stderr) = exec.into_parts();
        self.inputs.write().await.insert(exec_id.clone(), input);

        let events = self.events.clone();
        tokio::spawn(pump_output(exec_id, stdout, stderr, events));
    }

    /// Write bytes to a session's input.
    ///
    /// The registration table is the source of truth for writability and is
    /// held locked across the write attempt, so a write can never race a
    /// concurrent removal of the same session.
    pub async fn write(&self, exec_id: &str, bytes: &[u8]) -> ServerResult<()> {
        let mut inputs = self.inputs.write().await;
        let Some(input) = inputs.get_mut(exec_id) else {
            return Err(ServerError::InvalidSession(exec_id.to_string()));
        };

        let write = async {
            input.write_all(bytes).await?;
            input.flush().await
        };
        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::StreamWrite(e)),
            Err(_) => Err(ServerError::WriteTimeout(exec_id.to_string())),
        }
    }

    /// Stop tracking a session's input, closing its write side. The output
    /// pump keeps draining until the streams end on their own.
    pub async fn remove(&self, exec_id: &str) {
        if self.inputs.write().await.remove(exec_id).is_some() {
            debug!("closed input stream for exec {}", exec_id);
        }
    }

    /// Remove every tracked input; used when the container stops.
    pub async fn remove_all(&self) {
        let mut inputs = self.inputs.write().await;
        if !inputs.is_empty() {
            debug!("closing {} input stream(s)", inputs.len());
        }
        inputs.clear();
    }

    /// Number of sessions with a writable input.
    pub async fn tracked(&self) -> usize {
        self.inputs.read().await.len()
    }
}

/// Drain both output streams of a session, then emit the close event.
async fn pump_output(
    exec_id: String,
    stdout: OutputStream,
    stderr: OutputStream,
    events: mpsc::Sender<OutputEvent>,
) {
    tokio::join!(
        drain_stream(&exec_id, StreamTarget::Stdout, stdout, events.clone()),
        drain_stream(&exec_id, StreamTarget::Stderr, stderr, events.clone()),
    );

    if events
        .send(OutputEvent::Closed {
            exec_id: exec_id.clone(),
        })
        .await
        .is_err()
    {
        debug!("event channel closed before exec {} finished", exec_id);
    }
}

async fn drain_stream(
    exec_id: &str,
    target: StreamTarget,
    mut stream: OutputStream,
    events: mpsc::Sender<OutputEvent>,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                let event = OutputEvent::Message {
                    exec_id: exec_id.to_string(),
                    target,
                    chunk,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("read error on exec {} {:?}: {}", exec_id, target, e);
                break;
            }
        }
    }
}
