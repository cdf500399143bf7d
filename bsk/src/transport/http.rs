//! Webhook carrier: half-duplex HTTP POSTs.
//!
//! Batches are POSTed to the consumer's webhook URL; the response body MAY
//! carry a `pong` (for pings) or an `outboxStreamAck` (for batches), which
//! feeds the same inbound dispatch as the duplex carriers. The heartbeat
//! POSTs a minimal `ping` to the ping URL every tick. Responses arriving
//! after the per-request deadline are dropped with the request future.

use crate::config::{HttpConfig, TransportConfig};
use crate::error::TransportError;
use crate::heartbeat::Heartbeat;
use crate::query::QueryResponder;
use crate::transport::{Inbound, Link, OutboundSink};
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bsk_messages::{AckPayload, Envelope};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TOKEN_HEADER: &str = "x-transport-token";

pub struct HttpTransport {
    link: Arc<Link>,
    poster: Arc<Poster>,
    heartbeat: Heartbeat,
    responder: Option<Arc<QueryResponder>>,
}

impl HttpTransport {
    pub fn new(
        config: TransportConfig,
        http: HttpConfig,
        responder: Option<Arc<QueryResponder>>,
    ) -> Result<Arc<Self>, TransportError> {
        config
            .validate()
            .map_err(|error| TransportError::Init(error.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .map_err(|error| TransportError::Init(error.to_string()))?;
        let poster = Arc::new(Poster { client, http });
        let link = Arc::new(Link::new(config.clone()));

        let heartbeat = Heartbeat::spawn(config.heartbeat.clone(), {
            let poster = poster.clone();
            let link = link.clone();
            let responder = responder.clone();
            move || {
                let poster = poster.clone();
                let link = link.clone();
                let responder = responder.clone();
                async move {
                    let raw = Envelope::ping().to_json()?;
                    let body = poster.post(poster.http.ping_url(), raw).await?;
                    if let Some(body) = body {
                        handle_body(&link, &poster, &responder, &body);
                    }
                    Ok::<(), TransportError>(())
                }
            }
        });

        Ok(Arc::new(HttpTransport {
            link,
            poster,
            heartbeat,
            responder,
        }))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
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
        match self.poster.post(&self.poster.http.url, raw).await {
            Ok(Some(body)) => {
                // An ack answered inline lands in the buffer for the
                // upcoming wait_for_ack.
                handle_body(&self.link, &self.poster, &self.responder, &body);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) => {
                self.link.abort_batch(&correlation_id);
                Err(error)
            }
        }
    }

    async fn send_raw(&self, raw: &str) -> Result<(), TransportError> {
        self.link.check_destroyed()?;
        self.link.check_size(raw)?;
        let body = self
            .poster
            .post(&self.poster.http.url, raw.to_string())
            .await?;
        if let Some(body) = body {
            handle_body(&self.link, &self.poster, &self.responder, &body);
        }
        Ok(())
    }

    async fn wait_for_ack(&self, deadline: Duration) -> Result<AckPayload, TransportError> {
        self.link.wait_for_ack(deadline).await
    }

    async fn destroy(&self) {
        self.heartbeat.destroy();
        self.link.destroy();
    }
}

struct Poster {
    client: reqwest::Client,
    http: HttpConfig,
}

impl Poster {
    /// POSTs a wire envelope and returns the response body when one is
    /// present. Request errors (including the per-request deadline) map to
    /// `Disconnected`.
    async fn post(&self, url: &str, raw: String) -> Result<Option<String>, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(raw);
        if let Some(token) = &self.http.token {
            request = request.header(TOKEN_HEADER, token);
        }
        let response = request
            .send()
            .await
            .map_err(|_| TransportError::Disconnected)?;
        let body = response.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(body))
    }
}

struct HttpSink {
    poster: Arc<Poster>,
}

#[async_trait]
impl OutboundSink for HttpSink {
    async fn write(&self, envelope: Envelope) -> Result<(), TransportError> {
        let raw = envelope.to_json()?;
        let url = self.poster.http.url.clone();
        self.poster.post(&url, raw).await.map(|_| ())
    }
}

/// Dispatches an envelope found in a response body. Replies it produces are
/// POSTed back to the webhook URL off the calling path.
fn handle_body(
    link: &Arc<Link>,
    poster: &Arc<Poster>,
    responder: &Option<Arc<QueryResponder>>,
    body: &str,
) {
    let Ok(envelope) = Envelope::from_json(body) else {
        debug!("dropping malformed response-body envelope");
        return;
    };
    match link.handle_inbound(envelope) {
        Inbound::Reply(reply) => {
            let poster = poster.clone();
            tokio::spawn(async move {
                let url = poster.http.url.clone();
                match reply.to_json() {
                    Ok(raw) => {
                        if let Err(error) = poster.post(&url, raw).await {
                            debug!(error = %error, "failed to POST reply envelope");
                        }
                    }
                    Err(error) => debug!(error = %error, "failed to encode reply envelope"),
                }
            });
        }
        Inbound::Query(request) => match responder {
            Some(responder) => {
                let responder = responder.clone();
                let sink: Arc<dyn OutboundSink> = Arc::new(HttpSink {
                    poster: poster.clone(),
                });
                tokio::spawn(async move {
                    responder.respond(request, sink).await;
                });
            }
            None => debug!("dropping query request, no responder wired"),
        },
        Inbound::Handled | Inbound::Ignored => {}
    }
}
