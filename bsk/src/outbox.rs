//! Outbox stream manager: binds one streaming transport and forwards event
//! batches to it, single-writer.

use crate::context::RequestContext;
use crate::error::{BuilderError, OutboxError};
use crate::{Transport, TransportKind};
use bsk_messages::{AckPayload, Envelope, StreamEvent};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const DEFAULT_ONLINE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Scans the provisioned transports for the configured streaming kind.
pub fn select_streaming_transport(
    provisioned: &[Arc<dyn Transport>],
    streaming: TransportKind,
) -> Result<Arc<dyn Transport>, BuilderError> {
    provisioned
        .iter()
        .find(|transport| transport.kind() == streaming)
        .cloned()
        .ok_or(BuilderError::StreamingTransportNotProvisioned(streaming))
}

/// Forwards batches to the bound producer transport. The manager is
/// single-writer per process: concurrent `send_batch` calls are serialised,
/// and it never owns the transport's lifecycle.
pub struct OutboxStreamManager {
    producer: Mutex<Option<Arc<dyn Transport>>>,
    write_lock: tokio::sync::Mutex<()>,
    online_timeout: Duration,
    ack_timeout: Duration,
}

impl Default for OutboxStreamManager {
    fn default() -> Self {
        OutboxStreamManager::new()
    }
}

impl OutboxStreamManager {
    pub fn new() -> Self {
        OutboxStreamManager::with_timeouts(DEFAULT_ONLINE_TIMEOUT, DEFAULT_ACK_TIMEOUT)
    }

    pub fn with_timeouts(online_timeout: Duration, ack_timeout: Duration) -> Self {
        OutboxStreamManager {
            producer: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
            online_timeout,
            ack_timeout,
        }
    }

    /// Binds the producer transport. Single-assignment: rebinding while one
    /// is held is a programming error; `None` detaches.
    pub fn set_producer(
        &self,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<(), OutboxError> {
        let mut producer = self.producer.lock().unwrap();
        if producer.is_some() && transport.is_some() {
            return Err(OutboxError::ProducerAlreadySet);
        }
        *producer = transport;
        Ok(())
    }

    pub fn producer(&self) -> Option<Arc<dyn Transport>> {
        self.producer.lock().unwrap().clone()
    }

    /// Waits for the producer to be online, sends the batch, and resolves
    /// its acknowledgment. No internal retry and no queueing: a failure
    /// surfaces immediately and the caller decides.
    #[tracing::instrument(skip(self, events), fields(events = events.len()))]
    pub async fn send_batch(&self, events: Vec<StreamEvent>) -> Result<AckPayload, OutboxError> {
        let _writer = self.write_lock.lock().await;
        let producer = self.producer().ok_or(OutboxError::NoProducer)?;
        let online_timeout = self.online_timeout;
        let ack_timeout = self.ack_timeout;

        let mut request_ids: Vec<String> = Vec::new();
        for event in &events {
            if !request_ids.contains(&event.request_id) {
                request_ids.push(event.request_id.clone());
            }
        }

        RequestContext::for_batch(request_ids)
            .scope(async move {
                producer.wait_for_online(online_timeout).await?;
                producer.send(Envelope::batch(events)).await?;
                let ack = producer.wait_for_ack(ack_timeout).await?;

                if !ack.all_ok {
                    let request_ids = RequestContext::current()
                        .map(|context| context.batch_request_ids)
                        .unwrap_or_default();
                    warn!(
                        ok_indices = ?ack.ok_indices,
                        request_ids = ?request_ids,
                        "batch partially acknowledged"
                    );
                }
                Ok(ack)
            })
            .await
    }
}
