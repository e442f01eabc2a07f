//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::capture::{FilmFilter, Frame, FrameInfo, TestPatternSource};
use crate::events::FlowEvent;
use crate::state::{Booth, RunOutcome};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
    /// Source of session events for subscribed clients
    event_tx: broadcast::Sender<FlowEvent>,
}

/// Shared server state
struct ServerState {
    booth: Arc<Booth>,
    camera: Arc<TestPatternSource>,
    filter: FilmFilter,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        booth: Arc<Booth>,
        camera: Arc<TestPatternSource>,
        filter: FilmFilter,
        event_tx: broadcast::Sender<FlowEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            state: Arc::new(ServerState {
                booth,
                camera,
                filter,
                start_time: Instant::now(),
            }),
            shutdown_tx,
            event_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let event_tx = self.event_tx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, event_tx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on their own task so that a half-read message is
    /// never dropped while an event notification is being written.
    async fn handle_client(
        stream: UnixStream,
        state: Arc<ServerState>,
        event_tx: broadcast::Sender<FlowEvent>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(16);

        let reader_task = tokio::spawn(async move {
            loop {
                let body = match read_message(&mut reader).await {
                    Ok(Some(body)) => body,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(?e, "client read error");
                        break;
                    }
                };

                let parsed = serde_json::from_slice::<Request>(&body).map_err(|e| e.to_string());
                if request_tx.send(parsed).await.is_err() {
                    break;
                }
            }
        });

        let mut events: Option<broadcast::Receiver<FlowEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, &state).await;
                            if subscribe && events.is_none() {
                                events = Some(event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(message) => {
                            warn!(%message, "malformed request");
                            Response::Error {
                                code: "bad_request".to_string(),
                                message,
                            }
                        }
                    };

                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                event = next_event(&mut events), if events.is_some() => {
                    let notification = match event {
                        Ok(event) => Notification::SessionEvent { event },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "notification receiver lagged");
                            Notification::Lagged { skipped }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                            continue;
                        }
                    };

                    if let Err(e) = send_message(&mut writer, &notification).await {
                        break Err(e);
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, state: &ServerState) -> (Response, bool) {
        let booth = &state.booth;

        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let status = DaemonStatus {
                    capturing: booth.is_capturing().await,
                    sessions: booth.statuses().await,
                    stored_keys: booth.stored_keys(),
                    camera_available: state.camera.is_available(),
                    frames_served: state.camera.frames_served(),
                    uptime_secs: state.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                };
                (Response::Status(status), false)
            }

            Request::StartSession { flow } => {
                if booth.start(flow).await {
                    info!(%flow, "session started via IPC");
                    (Response::Started { flow }, false)
                } else {
                    (Response::StartIgnored { flow }, false)
                }
            }

            Request::RunSession { flow } => match booth.run(flow).await {
                Ok(RunOutcome::Completed(frames)) => (
                    Response::Frames {
                        flow,
                        frames: frame_infos(&frames),
                    },
                    false,
                ),
                Ok(RunOutcome::Ignored) => (Response::StartIgnored { flow }, false),
                Ok(RunOutcome::Cancelled) => (Response::Reset { flow }, false),
                Err(e) => (
                    Response::Error {
                        code: "capture".to_string(),
                        message: e.to_string(),
                    },
                    false,
                ),
            },

            Request::ResetSession { flow } => {
                booth.reset(flow).await;
                (Response::Reset { flow }, false)
            }

            Request::GetFrames { flow } => {
                let frames = frame_infos(&booth.stored_frames(flow));
                (Response::Frames { flow, frames }, false)
            }

            Request::Develop { flow } => match booth.develop(flow, &state.filter) {
                Ok(developed) => (
                    Response::Frames {
                        flow,
                        frames: frame_infos(&developed),
                    },
                    false,
                ),
                Err(e) => (
                    Response::Error {
                        code: "storage".to_string(),
                        message: e.to_string(),
                    },
                    false,
                ),
            },

            Request::ClearStorage => {
                booth.clear_storage();
                (Response::Cleared, false)
            }

            Request::SetCameraAvailable { available } => {
                state.camera.set_available(available);
                (Response::Camera { available }, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Read one length-prefixed message body; `None` on clean disconnect
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];

    // Read message length (4-byte little-endian)
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

fn frame_infos(frames: &[Frame]) -> Vec<FrameInfo> {
    frames.iter().enumerate().map(|(i, f)| f.info(i)).collect()
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<FlowEvent>>,
) -> Result<FlowEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
