//! Unix domain socket server for IPC
//!
//! Serves status queries and inbound event publication, and pushes bus
//! events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::{next_event, BusEvent, EventBus};
use crate::state::SnapshotReader;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// Everything a client handler needs
#[derive(Clone)]
struct ClientContext {
    bus: EventBus,
    reader: SnapshotReader,
    start_time: Instant,
}

pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    ctx: ClientContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(socket_path: &Path, bus: EventBus, reader: SnapshotReader) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            ctx: ClientContext {
                bus,
                reader,
                start_time: Instant::now(),
            },
            shutdown_tx,
        })
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = self.ctx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, ctx) => {
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

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

async fn handle_client(stream: UnixStream, ctx: ClientContext) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);

    let writer = async move {
        while let Some(frame) = out_rx.recv().await {
            write_frame(&mut write_half, &frame).await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    let reader = async {
        let mut subscribed = false;
        loop {
            let Some(body) = read_frame(&mut read_half).await? else {
                debug!("client disconnected");
                return Ok::<_, anyhow::Error>(());
            };

            let response = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => {
                    debug!(?request, "received request");
                    let is_subscribe = matches!(request, Request::Subscribe);
                    let response = process_request(request, &ctx);
                    if is_subscribe && !subscribed {
                        subscribed = true;
                        forward_events(ctx.bus.subscribe(), out_tx.clone());
                    }
                    response
                }
                Err(e) => Response::error("bad_request", e.to_string()),
            };

            out_tx
                .send(encode(&response)?)
                .await
                .context("client writer closed")?;
        }
    };

    tokio::select! {
        result = writer => result,
        result = reader => result,
    }
}

fn process_request(request: Request, ctx: &ClientContext) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(DaemonStatus::new(
            ctx.start_time.elapsed().as_secs(),
            ctx.reader.snapshot(),
        )),

        Request::Subscribe => Response::Subscribed,

        Request::Publish { event } => {
            let owner = event.owner();
            if !owner.is_external() {
                warn!(topic = event.topic(), %owner, "client tried to publish daemon-owned event");
                return Response::error(
                    "forbidden",
                    format!("{} is published by {} only", event.topic(), owner),
                );
            }
            if ctx.bus.publish(owner, event) {
                Response::Accepted
            } else {
                Response::error("rejected", "event rejected by bus")
            }
        }
    }
}

/// Push every bus event to the client until its writer goes away
fn forward_events(mut rx: broadcast::Receiver<BusEvent>, out_tx: mpsc::Sender<Vec<u8>>) {
    debug!("client subscribed to notifications");
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx).await {
            let frame = match encode(&Notification::Event(event)) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(?e, "failed to encode notification");
                    continue;
                }
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    });
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).context("failed to encode message")
}

/// Read one length-prefixed frame; `None` on clean EOF
async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, body: &[u8]) -> Result<()> {
    let len = (body.len() as u32).to_le_bytes();
    stream.write_all(&len).await?;
    stream.write_all(body).await?;
    Ok(())
}
