//! TCP client for the local management daemon.
//!
//! Two connections are opened: a control connection that carries
//! registration and daemon-initiated requests, and a worker connection bound
//! to one notification stream. Both speak line-delimited JSON, one message
//! per line. Every frame is traced under the `protocol` target.

use std::io;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::{ControlChannel, ControlEvent, Notification, NotificationSink};
use crate::error::{ProtocolError, SendError};

/// `errno` the daemon uses for an external interruption.
const EXTERNAL_ERRNO: &str = "external";

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum SocketRole {
    Control,
    Worker,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Request<'a> {
    Connect {
        daemon: &'a str,
        role: SocketRole,
    },
    RegisterStream {
        stream: &'a str,
    },
    RegisterDone,
    Notify {
        stream: &'a str,
        event_time: String,
        notification: &'a Notification,
    },
    Release,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ControlMessage {
    Keepalive,
    GetLogTimes,
    Replay {
        start: Option<String>,
        stop: Option<String>,
    },
    Error {
        errno: String,
        #[serde(default)]
        message: String,
    },
}

fn encode(request: &Request<'_>) -> serde_json::Result<String> {
    let mut frame = serde_json::to_string(request)?;
    frame.push('\n');
    Ok(frame)
}

async fn write_frame<W>(writer: &mut W, frame: &str, conn: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::trace!(target: "protocol", "{conn} > {}", frame.trim_end());
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

async fn write_request<W>(writer: &mut W, request: &Request<'_>, conn: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(request)?;
    write_frame(writer, &frame, conn).await
}

/// Open both connections, bind the worker to `stream_name`, and signal
/// registration complete.
pub async fn establish(
    addr: &str,
    daemon_name: &str,
    stream_name: &str,
) -> Result<(ControlSocket, StreamSession), ProtocolError> {
    let mut control = ControlSocket::connect(addr, daemon_name).await?;
    let worker = WorkerSocket::connect(addr, daemon_name).await?;
    let session = worker.register_notification_stream(stream_name).await?;
    control.register_done().await?;
    tracing::info!("Registered with daemon at {addr} as {daemon_name}, stream {stream_name}");
    Ok((control, session))
}

/// Control connection to the daemon.
pub struct ControlSocket {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl ControlSocket {
    pub async fn connect(addr: &str, daemon_name: &str) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut writer) = stream.into_split();
        write_request(
            &mut writer,
            &Request::Connect {
                daemon: daemon_name,
                role: SocketRole::Control,
            },
            "control",
        )
        .await?;
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        })
    }

    /// Tell the daemon that every stream has been registered.
    pub async fn register_done(&mut self) -> Result<(), ProtocolError> {
        write_request(&mut self.writer, &Request::RegisterDone, "control").await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<ControlMessage, ProtocolError> {
        loop {
            let line = self.lines.next_line().await?.ok_or(ProtocolError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }
            tracing::trace!(target: "protocol", "control < {line}");
            return serde_json::from_str(&line).map_err(|e| ProtocolError::Malformed(e.to_string()));
        }
    }
}

impl ControlChannel for ControlSocket {
    async fn dispatch_ready(&mut self) -> Result<ControlEvent, ProtocolError> {
        match self.read_message().await? {
            ControlMessage::Keepalive => Ok(ControlEvent::Keepalive),
            ControlMessage::GetLogTimes => {
                tracing::debug!("daemon requested log times; no replay log is kept");
                Ok(ControlEvent::LogTimesRequested)
            }
            ControlMessage::Replay { start, stop } => {
                tracing::info!(?start, ?stop, "daemon requested replay; replay is not supported");
                Ok(ControlEvent::ReplayRequested { start, stop })
            }
            ControlMessage::Error { errno, message } if errno == EXTERNAL_ERRNO => {
                Err(ProtocolError::External(message))
            }
            ControlMessage::Error { errno, message } => Err(ProtocolError::Daemon { errno, message }),
        }
    }

    async fn release(mut self) -> Result<(), ProtocolError> {
        write_request(&mut self.writer, &Request::Release, "control").await?;
        self.writer.shutdown().await?;
        tracing::debug!("control connection released");
        Ok(())
    }
}

/// Worker connection before it is bound to a stream.
pub struct WorkerSocket {
    stream: TcpStream,
}

impl WorkerSocket {
    pub async fn connect(addr: &str, daemon_name: &str) -> Result<Self, ProtocolError> {
        let mut stream = TcpStream::connect(addr).await?;
        write_request(
            &mut stream,
            &Request::Connect {
                daemon: daemon_name,
                role: SocketRole::Worker,
            },
            "worker",
        )
        .await?;
        Ok(Self { stream })
    }

    pub async fn register_notification_stream(
        mut self,
        stream_name: &str,
    ) -> Result<StreamSession, ProtocolError> {
        write_request(
            &mut self.stream,
            &Request::RegisterStream {
                stream: stream_name,
            },
            "worker",
        )
        .await?;
        Ok(StreamSession {
            stream_name: stream_name.to_string(),
            socket: self.stream,
            closed: false,
        })
    }
}

/// A worker connection bound to one notification stream.
pub struct StreamSession {
    stream_name: String,
    socket: TcpStream,
    closed: bool,
}

impl NotificationSink for StreamSession {
    async fn send(&mut self, notification: &Notification) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        let frame = encode(&Request::Notify {
            stream: &self.stream_name,
            event_time: Utc::now().to_rfc3339(),
            notification,
        })?;
        if let Err(e) = write_frame(&mut self.socket, &frame, "worker").await {
            if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            ) {
                self.closed = true;
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(mut self) -> Result<(), SendError> {
        if !self.closed {
            write_request(&mut self.socket, &Request::Release, "worker").await?;
        }
        self.socket.shutdown().await?;
        tracing::debug!("stream session {} released", self.stream_name);
        Ok(())
    }
}
