//! Carrier implementations and the per-transport state they share.
//!
//! Every carrier owns a [`Link`]: the attachment flag, the pong-based
//! liveness clock, and the single pending-ack slot with its correlation-id
//! matching. The carriers themselves only move bytes; everything the
//! transport contract promises about acks and liveness lives here.

pub mod http;
pub mod ipc;
pub mod ws;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::heartbeat::Heartbeat;
use async_trait::async_trait;
use bsk_messages::{AckPayload, Action, Envelope};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

const ONLINE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Carrier-specific write path used for pong replies and query responses.
#[async_trait]
pub(crate) trait OutboundSink: Send + Sync {
    async fn write(&self, envelope: Envelope) -> Result<(), TransportError>;
}

struct PendingAck {
    correlation_id: String,
    resolver: oneshot::Sender<Result<AckPayload, TransportError>>,
}

#[derive(Default)]
struct LinkState {
    attached: bool,
    destroyed: bool,
    last_pong_at: Option<Instant>,
    current_batch: Option<String>,
    pending_ack: Option<PendingAck>,
    ack_buffer: Option<(String, AckPayload)>,
}

/// What a carrier should do with an inbound envelope after the shared
/// handling ran.
pub(crate) enum Inbound {
    /// Write the reply (a pong for a ping or a consumer registration).
    Reply(Envelope),
    /// Hand the request to the query responder off the receive loop.
    Query(Envelope),
    /// Fully consumed (pong, ack).
    Handled,
    /// Not addressed to this side; dropped.
    Ignored,
}

pub(crate) struct Link {
    config: TransportConfig,
    state: Mutex<LinkState>,
}

impl Link {
    pub fn new(config: TransportConfig) -> Self {
        Link {
            config,
            state: Mutex::new(LinkState {
                attached: true,
                ..LinkState::default()
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Attached and the last valid pong is within the staleness window.
    pub fn is_online(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.destroyed || !state.attached {
            return false;
        }
        match state.last_pong_at {
            Some(at) => at.elapsed() < self.config.ping_stale(),
            None => false,
        }
    }

    /// Carrier attach/detach (socket close, channel EOF).
    pub fn set_attached(&self, attached: bool) {
        self.state.lock().unwrap().attached = attached;
    }

    fn note_pong(&self, envelope: &Envelope) {
        let Some(payload) = envelope.pong_payload() else {
            debug!("dropping malformed pong payload");
            return;
        };
        let accepted = match (&self.config.password, payload.password) {
            (None, _) => true,
            (Some(expected), Some(got)) => *expected == got,
            (Some(_), None) => false,
        };
        if !accepted {
            debug!(transport = %self.config.name, "dropping pong with wrong password");
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.attached = true;
        state.last_pong_at = Some(Instant::now());
    }

    /// Receipt logic for an acknowledgment: resolve the matching waiter,
    /// else buffer it for the batch currently in flight, else discard.
    fn accept_ack(&self, correlation_id: String, payload: AckPayload) {
        let mut state = self.state.lock().unwrap();
        if state
            .pending_ack
            .as_ref()
            .is_some_and(|pending| pending.correlation_id == correlation_id)
        {
            let pending = state.pending_ack.take().expect("matched above");
            state.current_batch = None;
            let _ = pending.resolver.send(Ok(payload));
            return;
        }
        if state.current_batch.as_deref() == Some(correlation_id.as_str()) {
            state.ack_buffer = Some((correlation_id, payload));
            return;
        }
        debug!(
            transport = %self.config.name,
            correlation_id,
            "discarding ack with unknown correlation id"
        );
    }

    /// Shared dispatch for a decoded inbound envelope.
    pub fn handle_inbound(&self, envelope: Envelope) -> Inbound {
        match envelope.action {
            Action::Ping | Action::RegisterStreamConsumer => Inbound::Reply(Envelope::pong(
                envelope.correlation_id,
                self.config.password.clone(),
            )),
            Action::Pong => {
                self.note_pong(&envelope);
                Inbound::Handled
            }
            Action::OutboxStreamAck => {
                match (envelope.ack_payload(), envelope.correlation_id) {
                    (Some(payload), Some(correlation_id)) => {
                        self.accept_ack(correlation_id, payload)
                    }
                    _ => debug!("dropping malformed ack envelope"),
                }
                Inbound::Handled
            }
            Action::QueryRequest => Inbound::Query(envelope),
            other => {
                debug!(action = %other, "ignoring inbound envelope");
                Inbound::Ignored
            }
        }
    }

    pub fn check_size(&self, raw: &str) -> Result<(), TransportError> {
        let size = raw.len();
        let limit = self.config.max_message_bytes;
        if size > limit {
            return Err(TransportError::MessageTooLarge { size, limit });
        }
        Ok(())
    }

    pub fn check_destroyed(&self) -> Result<(), TransportError> {
        if self.state.lock().unwrap().destroyed {
            return Err(TransportError::Destroyed);
        }
        Ok(())
    }

    /// Prepares an object-form message for the wire: assigns the correlation
    /// id, serializes, enforces the size cap, and records a batch's id as
    /// the one currently in flight.
    pub fn encode_for_send(
        &self,
        envelope: &mut Envelope,
    ) -> Result<(String, String), TransportError> {
        self.check_destroyed()?;
        let correlation_id = envelope.ensure_correlation_id().to_string();
        let raw = envelope.to_json()?;
        self.check_size(&raw)?;
        if envelope.action == Action::OutboxStreamBatch {
            let mut state = self.state.lock().unwrap();
            state.current_batch = Some(correlation_id.clone());
            state.ack_buffer = None;
        }
        Ok((raw, correlation_id))
    }

    /// Forgets a batch whose write failed so a stale id cannot satisfy
    /// `wait_for_ack`.
    pub fn abort_batch(&self, correlation_id: &str) {
        let mut state = self.state.lock().unwrap();
        if state.current_batch.as_deref() == Some(correlation_id) {
            state.current_batch = None;
        }
    }

    /// Resolves the acknowledgment for the batch currently in flight.
    pub async fn wait_for_ack(&self, deadline: Duration) -> Result<AckPayload, TransportError> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            if state.destroyed {
                return Err(TransportError::Destroyed);
            }
            if state.pending_ack.is_some() {
                return Err(TransportError::AnotherAckPending);
            }
            let Some(batch_id) = state.current_batch.clone() else {
                return Err(TransportError::NoBatch);
            };
            if let Some((buffered_id, payload)) = state.ack_buffer.take() {
                if buffered_id == batch_id {
                    state.current_batch = None;
                    return Ok(payload);
                }
            }
            let (resolver, receiver) = oneshot::channel();
            state.pending_ack = Some(PendingAck {
                correlation_id: batch_id,
                resolver,
            });
            receiver
        };

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Err(TransportError::Destroyed),
            Err(_) => {
                let mut state = self.state.lock().unwrap();
                state.pending_ack = None;
                state.current_batch = None;
                Err(TransportError::AckTimeout(deadline))
            }
        }
    }

    /// Polls for liveness, nudging the heartbeat to fire immediately.
    pub async fn wait_for_online(
        &self,
        deadline: Duration,
        heartbeat: &Heartbeat,
    ) -> Result<(), TransportError> {
        self.check_destroyed()?;
        if self.is_online() {
            return Ok(());
        }
        heartbeat.reset();
        let online = async {
            loop {
                if self.is_online() {
                    return;
                }
                tokio::time::sleep(ONLINE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(deadline, online)
            .await
            .map_err(|_| TransportError::NotOnline(deadline))
    }

    /// Terminal teardown: detaches, rejects a pending ack with `Destroyed`,
    /// clears the in-flight batch. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.destroyed = true;
        state.attached = false;
        state.current_batch = None;
        state.ack_buffer = None;
        if let Some(pending) = state.pending_ack.take() {
            let _ = pending.resolver.send(Err(TransportError::Destroyed));
        }
    }
}
