//! End-to-end streaming over the parent↔child IPC carriers, driven through
//! an in-memory duplex channel standing in for the process pipes.

use bsk::config::{HeartbeatConfig, TransportConfig};
use bsk::query::{QueryRegistry, QueryResponder};
use bsk::transport::ipc::IpcTransport;
use bsk::{OutboxStreamManager, Transport, TransportError, TransportKind};
use bsk_messages::{AckPayload, Action, Envelope, QueryResponsePayload, StreamEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::io::{Lines, ReadHalf, WriteHalf};

type TestTransport = Arc<IpcTransport<WriteHalf<DuplexStream>>>;

/// The stream consumer on the other side of the channel.
struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn next_envelope(&mut self) -> Option<Envelope> {
        while let Some(line) = self.lines.next_line().await.ok().flatten() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(envelope) = Envelope::from_json(&line) {
                return Some(envelope);
            }
        }
        None
    }

    async fn expect_action(&mut self, action: Action) -> Envelope {
        loop {
            let envelope = self.next_envelope().await.expect("channel closed");
            if envelope.action == action {
                return envelope;
            }
        }
    }

    async fn write(&mut self, envelope: &Envelope) {
        let mut raw = envelope.to_json().unwrap();
        raw.push('\n');
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }
}

fn fast_config(ping_stale_ms: u64) -> TransportConfig {
    let mut config = TransportConfig::new("consumer", TransportKind::IpcChild);
    config.ping_stale_ms = ping_stale_ms;
    config.heartbeat = HeartbeatConfig {
        interval_min_ms: 100,
        multiplier: 2.0,
        interval_max_ms: 400,
    };
    config
}

fn pair(
    config: TransportConfig,
    responder: Option<Arc<QueryResponder>>,
) -> (TestTransport, Peer) {
    let (ours, theirs) = duplex(64 * 1024);
    let (our_read, our_write) = split(ours);
    let (their_read, their_write) = split(theirs);
    let transport =
        IpcTransport::child(config, Some(our_read), Some(our_write), responder).unwrap();
    let peer = Peer {
        lines: BufReader::new(their_read).lines(),
        writer: their_write,
    };
    (transport, peer)
}

fn event(version: u32) -> StreamEvent {
    StreamEvent {
        model_name: "block".to_string(),
        event_type: "BlockAdded".to_string(),
        event_version: version,
        request_id: "req-1".to_string(),
        block_height: Some(100 + version as u64),
        payload: "{}".to_string(),
        timestamp: 1_700_000_000_000,
    }
}

#[tokio::test]
async fn child_requires_both_channel_halves() {
    let (ours, _theirs) = duplex(1024);
    let (read, write) = split(ours);

    let missing_reader = IpcTransport::child(
        fast_config(15_000),
        Option::<ReadHalf<DuplexStream>>::None,
        Some(write),
        None,
    );
    assert!(matches!(missing_reader, Err(TransportError::Init(_))));

    let missing_writer = IpcTransport::<WriteHalf<DuplexStream>>::child(
        fast_config(15_000),
        Some(read),
        None,
        None,
    );
    assert!(matches!(missing_writer, Err(TransportError::Init(_))));
}

#[tokio::test(start_paused = true)]
async fn pong_reply_brings_the_transport_online() {
    let (transport, mut peer) = pair(fast_config(15_000), None);
    assert!(!transport.is_online());

    let ping = peer.expect_action(Action::Ping).await;
    assert!(ping.correlation_id.is_some());
    peer.write(&Envelope::pong(ping.correlation_id.clone(), None))
        .await;

    transport
        .wait_for_online(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(transport.is_online());
    transport.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn stale_pong_takes_the_transport_offline_until_the_next_pong() {
    let (transport, mut peer) = pair(fast_config(100), None);

    let ping = peer.expect_action(Action::Ping).await;
    peer.write(&Envelope::pong(ping.correlation_id.clone(), None))
        .await;
    transport
        .wait_for_online(Duration::from_secs(2))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!transport.is_online());

    peer.write(&Envelope::pong(Some("re-anchor".to_string()), None))
        .await;
    transport
        .wait_for_online(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(transport.is_online());
    transport.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn foreign_ack_is_discarded_and_the_matching_ack_resolves() {
    let (transport, mut peer) = pair(fast_config(15_000), None);

    transport
        .send(Envelope::batch(vec![event(0), event(1), event(2)]))
        .await
        .unwrap();
    let batch = peer.expect_action(Action::OutboxStreamBatch).await;
    let correlation_id = batch.correlation_id.clone().unwrap();

    peer.write(&Envelope::ack("some-other-batch", AckPayload::accepted()))
        .await;
    peer.write(&Envelope::ack(
        correlation_id,
        AckPayload::partial(vec![0, 2]),
    ))
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Had the foreign ack resolved the waiter, all_ok would be true.
    let ack = transport.wait_for_ack(Duration::from_secs(1)).await.unwrap();
    assert!(!ack.all_ok);
    assert_eq!(ack.ok_indices, Some(vec![0, 2]));
    transport.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn batch_event_order_is_preserved_on_the_wire() {
    let (transport, mut peer) = pair(fast_config(15_000), None);

    transport
        .send(Envelope::batch(vec![event(0), event(1), event(2)]))
        .await
        .unwrap();

    let batch = peer
        .expect_action(Action::OutboxStreamBatch)
        .await
        .batch_payload()
        .unwrap();
    let versions: Vec<u32> = batch.events.iter().map(|e| e.event_version).collect();
    assert_eq!(versions, vec![0, 1, 2]);
    assert_eq!(batch.events[2].block_height, Some(102));
    transport.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_rejects_the_pending_ack_and_later_sends() {
    let (transport, mut peer) = pair(fast_config(15_000), None);

    transport
        .send(Envelope::batch(vec![event(0)]))
        .await
        .unwrap();
    peer.expect_action(Action::OutboxStreamBatch).await;

    let waiter = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.wait_for_ack(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    transport.destroy().await;
    assert!(matches!(
        waiter.await.unwrap(),
        Err(TransportError::Destroyed)
    ));
    assert!(matches!(
        transport.send(Envelope::ping()).await,
        Err(TransportError::Destroyed)
    ));
    assert!(!transport.is_online());
}

#[tokio::test(start_paused = true)]
async fn inbound_ping_is_answered_with_the_password_echo() {
    let mut config = fast_config(15_000);
    config.password = Some("hunter2".to_string());
    let (transport, mut peer) = pair(config, None);

    let mut ping = Envelope::ping();
    ping.correlation_id = Some("ping-9".to_string());
    peer.write(&ping).await;

    let pong = peer.expect_action(Action::Pong).await;
    assert_eq!(pong.correlation_id.as_deref(), Some("ping-9"));
    assert_eq!(
        pong.pong_payload().unwrap().password.as_deref(),
        Some("hunter2")
    );
    transport.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn query_request_round_trips_through_the_registry() {
    let mut registry = QueryRegistry::new();
    registry.register("getLastBlock", |_| async move {
        Ok(json!({ "height": 42 }))
    });
    let responder = Arc::new(QueryResponder::new(Arc::new(registry)));
    let (transport, mut peer) = pair(fast_config(15_000), Some(responder));

    let mut request = Envelope::query_request("getLastBlock", None);
    request.correlation_id = Some("q-7".to_string());
    peer.write(&request).await;

    let response = peer.expect_action(Action::QueryResponse).await;
    assert_eq!(response.correlation_id.as_deref(), Some("q-7"));
    let payload: QueryResponsePayload =
        serde_json::from_value(response.payload.clone().unwrap()).unwrap();
    assert!(payload.ok);
    assert_eq!(payload.data.unwrap()["height"], json!(42));
    transport.destroy().await;
}

#[test_log::test(tokio::test(start_paused = true))]
async fn manager_streams_batches_through_the_bound_producer() {
    let (transport, mut peer) = pair(fast_config(15_000), None);

    // Consumer side: answer pings, ack the first batch partially and
    // everything after in full.
    tokio::spawn(async move {
        let mut batches = 0usize;
        while let Some(envelope) = peer.next_envelope().await {
            match envelope.action {
                Action::Ping => {
                    peer.write(&Envelope::pong(envelope.correlation_id, None))
                        .await
                }
                Action::OutboxStreamBatch => {
                    batches += 1;
                    let ack = if batches == 1 {
                        AckPayload::partial(vec![0])
                    } else {
                        AckPayload::accepted()
                    };
                    peer.write(&Envelope::ack(envelope.correlation_id.unwrap(), ack))
                        .await;
                }
                _ => {}
            }
        }
    });

    let manager = OutboxStreamManager::new();
    manager
        .set_producer(Some(transport.clone() as Arc<dyn Transport>))
        .unwrap();

    let first = manager.send_batch(vec![event(0), event(1)]).await.unwrap();
    assert!(!first.all_ok);
    assert_eq!(first.ok_indices, Some(vec![0]));

    let second = manager.send_batch(vec![event(1)]).await.unwrap();
    assert!(second.all_ok);

    transport.destroy().await;
}
