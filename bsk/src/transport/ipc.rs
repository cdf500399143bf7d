//! Parent↔child process carriers.
//!
//! The process channel is rendered as newline-delimited JSON envelopes over
//! the child's stdio pipes. Both sides run the identical heartbeat protocol:
//! either side answers a `ping` with a `pong` carrying the password echo, so
//! either side can re-anchor its liveness clock. The carrier is generic over
//! the channel halves; the parent binds a spawned child's stdin/stdout and
//! the child binds its own stdio.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::heartbeat::Heartbeat;
use crate::query::QueryResponder;
use crate::transport::{Inbound, Link, OutboundSink};
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bsk_messages::{AckPayload, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct IpcTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    kind: TransportKind,
    link: Arc<Link>,
    writer: Arc<Mutex<W>>,
    heartbeat: Heartbeat,
    reader: JoinHandle<()>,
}

impl<W> IpcTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// The child side of the channel. Construction asserts the channel
    /// halves exist; a process started without an IPC channel cannot
    /// stream.
    pub fn child<R>(
        config: TransportConfig,
        reader: Option<R>,
        writer: Option<W>,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::spawn(config, TransportKind::IpcChild, reader, writer, responder)
    }

    /// The parent side, bound to a spawned child's pipes.
    pub fn parent<R>(
        config: TransportConfig,
        reader: Option<R>,
        writer: Option<W>,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::spawn(config, TransportKind::IpcParent, reader, writer, responder)
    }

    fn spawn<R>(
        config: TransportConfig,
        kind: TransportKind,
        reader: Option<R>,
        writer: Option<W>,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        config
            .validate()
            .map_err(|error| TransportError::Init(error.to_string()))?;
        let reader = reader
            .ok_or_else(|| TransportError::Init("IPC channel has no readable half".to_string()))?;
        let writer = writer
            .ok_or_else(|| TransportError::Init("IPC channel has no writable half".to_string()))?;

        let link = Arc::new(Link::new(config.clone()));
        let writer = Arc::new(Mutex::new(writer));
        let sink = Arc::new(LineSink {
            writer: writer.clone(),
        });

        let reader = tokio::spawn(read_loop(reader, link.clone(), sink.clone(), responder));
        let heartbeat = Heartbeat::spawn(config.heartbeat.clone(), {
            let sink = sink.clone();
            move || {
                let sink = sink.clone();
                async move { sink.write(Envelope::ping()).await }
            }
        });

        Ok(Arc::new(IpcTransport {
            kind,
            link,
            writer,
            heartbeat,
            reader,
        }))
    }
}

impl IpcTransport<ChildStdin> {
    /// Binds the parent side to a child spawned with piped stdio.
    pub fn parent_from_child(
        config: TransportConfig,
        child: &mut Child,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError> {
        let stdout: Option<ChildStdout> = child.stdout.take();
        let stdin = child.stdin.take();
        Self::parent(config, stdout, stdin, responder)
    }
}

impl IpcTransport<tokio::io::Stdout> {
    /// Binds the child side to this process's own stdio.
    pub fn child_from_stdio(
        config: TransportConfig,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError> {
        Self::child(
            config,
            Some(tokio::io::stdin()),
            Some(tokio::io::stdout()),
            responder,
        )
    }
}

#[async_trait]
impl<W> Transport for IpcTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.link.config().name
    }

    fn is_online(&self) -> bool {
        self.link.is_online()
    }

    async fn wait_for_online(&self, deadline: Duration) -> Result<(), TransportError> {
        self.link.wait_for_online(deadline, &self.heartbeat).await
    }

    async fn send(&self, mut envelope: Envelope) -> Result<(), TransportError> {
        let (raw, correlation_id) = self.link.encode_for_send(&mut envelope)?;
        if let Err(error) = write_line(&self.writer, &raw).await {
            self.link.abort_batch(&correlation_id);
            return Err(error);
        }
        Ok(())
    }

    async fn send_raw(&self, raw: &str) -> Result<(), TransportError> {
        self.link.check_destroyed()?;
        self.link.check_size(raw)?;
        write_line(&self.writer, raw).await
    }

    async fn wait_for_ack(&self, deadline: Duration) -> Result<AckPayload, TransportError> {
        self.link.wait_for_ack(deadline).await
    }

    async fn destroy(&self) {
        self.heartbeat.destroy();
        self.reader.abort();
        self.link.destroy();
    }
}

struct LineSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    writer: Arc<Mutex<W>>,
}

#[async_trait]
impl<W> OutboundSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&self, envelope: Envelope) -> Result<(), TransportError> {
        let raw = envelope.to_json()?;
        write_line(&self.writer, &raw).await
    }
}

async fn write_line<W>(writer: &Arc<Mutex<W>>, raw: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut guard = writer.lock().await;
    guard
        .write_all(raw.as_bytes())
        .await
        .map_err(|_| TransportError::Disconnected)?;
    guard
        .write_all(b"\n")
        .await
        .map_err(|_| TransportError::Disconnected)?;
    guard.flush().await.map_err(|_| TransportError::Disconnected)
}

async fn read_loop<R, W>(
    reader: R,
    link: Arc<Link>,
    sink: Arc<LineSink<W>>,
    responder: Option<Arc<QueryResponder>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(envelope) = Envelope::from_json(line) else {
                    debug!("dropping malformed IPC line");
                    continue;
                };
                match link.handle_inbound(envelope) {
                    Inbound::Reply(reply) => {
                        if let Err(error) = sink.write(reply).await {
                            debug!(error = %error, "failed to write IPC reply");
                        }
                    }
                    Inbound::Query(request) => match &responder {
                        Some(responder) => {
                            let responder = responder.clone();
                            let sink: Arc<dyn OutboundSink> = sink.clone();
                            tokio::spawn(async move {
                                responder.respond(request, sink).await;
                            });
                        }
                        None => debug!("dropping query request, no responder wired"),
                    },
                    Inbound::Handled | Inbound::Ignored => {}
                }
            }
            Ok(None) => break,
            Err(error) => {
                debug!(error = %error, "IPC channel read failed");
                break;
            }
        }
    }
    link.set_attached(false);
}
