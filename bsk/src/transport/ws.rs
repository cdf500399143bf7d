//! WebSocket carrier: full-duplex, every envelope on one logical `message`
//! channel.
//!
//! On connect the carrier is tentatively attached; it only reports online
//! after a valid pong. When the socket closes, online falls immediately.

use crate::config::{TransportConfig, WsConfig};
use crate::error::TransportError;
use crate::heartbeat::Heartbeat;
use crate::query::QueryResponder;
use crate::transport::{Inbound, Link, OutboundSink};
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bsk_messages::{AckPayload, Envelope};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

pub struct WsTransport {
    link: Arc<Link>,
    writer: Arc<Mutex<WsWriter>>,
    heartbeat: Heartbeat,
    reader: JoinHandle<()>,
}

impl WsTransport {
    pub async fn connect(
        config: TransportConfig,
        ws: WsConfig,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError> {
        config
            .validate()
            .map_err(|error| TransportError::Init(error.to_string()))?;
        let mut request = ws
            .target()
            .into_client_request()
            .map_err(|error| TransportError::Init(error.to_string()))?;
        if !ws.protocols.is_empty() {
            let protocols = HeaderValue::from_str(&ws.protocols.join(", "))
                .map_err(|error| TransportError::Init(error.to_string()))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocols);
        }
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|error| TransportError::Init(error.to_string()))?;
        let (writer, reader) = stream.split();

        let link = Arc::new(Link::new(config.clone()));
        let writer = Arc::new(Mutex::new(writer));
        let sink = Arc::new(FrameSink {
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

        Ok(Arc::new(WsTransport {
            link,
            writer,
            heartbeat,
            reader,
        }))
    }

    async fn write_frame(&self, raw: String) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .send(Message::Text(raw))
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ws
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
        if let Err(error) = self.write_frame(raw).await {
            self.link.abort_batch(&correlation_id);
            return Err(error);
        }
        Ok(())
    }

    async fn send_raw(&self, raw: &str) -> Result<(), TransportError> {
        self.link.check_destroyed()?;
        self.link.check_size(raw)?;
        self.write_frame(raw.to_string()).await
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

struct FrameSink {
    writer: Arc<Mutex<WsWriter>>,
}

#[async_trait]
impl OutboundSink for FrameSink {
    async fn write(&self, envelope: Envelope) -> Result<(), TransportError> {
        let raw = envelope.to_json()?;
        self.writer
            .lock()
            .await
            .send(Message::Text(raw))
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    link: Arc<Link>,
    sink: Arc<FrameSink>,
    responder: Option<Arc<QueryResponder>>,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            // Protocol-level ping/pong frames are not wire envelopes.
            Ok(_) => continue,
            Err(error) => {
                debug!(error = %error, "websocket read failed");
                break;
            }
        };
        let Ok(envelope) = Envelope::from_json(&text) else {
            debug!("dropping malformed websocket frame");
            continue;
        };
        match link.handle_inbound(envelope) {
            Inbound::Reply(reply) => {
                if let Err(error) = sink.write(reply).await {
                    debug!(error = %error, "failed to write websocket reply");
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
    // Socket closed: online falls immediately.
    link.set_attached(false);
}
