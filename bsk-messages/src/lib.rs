//! Wire envelope and payload types shared by every streaming carrier.
//!
//! Every message on the wire is a single tagged [`Envelope`] carrying an
//! [`Action`] from a closed set, an optional action-specific payload, and the
//! correlation metadata that pairs a request with its response. The wire form
//! is UTF-8 JSON with camelCase field names; heights that may exceed the
//! JSON-safe integer range travel as strings (see [`ser`]).

pub mod ser;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of wire actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "registerStreamConsumer")]
    RegisterStreamConsumer,
    #[serde(rename = "outboxStreamBatch")]
    OutboxStreamBatch,
    #[serde(rename = "outboxStreamAck")]
    OutboxStreamAck,
    #[serde(rename = "query.request")]
    QueryRequest,
    #[serde(rename = "query.response")]
    QueryResponse,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Action::Ping => "ping",
            Action::Pong => "pong",
            Action::RegisterStreamConsumer => "registerStreamConsumer",
            Action::OutboxStreamBatch => "outboxStreamBatch",
            Action::OutboxStreamAck => "outboxStreamAck",
            Action::QueryRequest => "query.request",
            Action::QueryResponse => "query.response",
            Action::Error => "error",
        };
        write!(f, "{}", tag)
    }
}

/// A single event record carried inside an outbox stream batch.
///
/// `event_version` is monotonically non-negative per aggregate and
/// `block_height`, where present, is non-negative; both are encoded by the
/// unsigned types. `payload` is an opaque JSON string the consumer decodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub model_name: String,
    pub event_type: String,
    pub event_version: u32,
    pub request_id: String,
    #[serde(
        with = "ser::opt_u64_string",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub block_height: Option<u64>,
    pub payload: String,
    pub timestamp: i64,
}

/// Payload of an `outboxStreamBatch` envelope. Event order is preserved
/// end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub events: Vec<StreamEvent>,
}

/// Payload of an `outboxStreamAck` envelope.
///
/// `all_ok == true` means every event of the batch was accepted in order.
/// Otherwise `ok_indices` enumerates the zero-based positions (relative to
/// the sent batch) that were accepted; an absent index must be re-sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub all_ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_indices: Option<Vec<usize>>,
}

impl AckPayload {
    pub fn accepted() -> Self {
        AckPayload {
            all_ok: true,
            ok_indices: None,
        }
    }

    pub fn partial(ok_indices: Vec<usize>) -> Self {
        AckPayload {
            all_ok: false,
            ok_indices: Some(ok_indices),
        }
    }
}

/// Payload of a `pong` envelope; the password is a liveness token echo, not
/// a security measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Payload of a `query.request` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequestPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dto: Option<Value>,
}

/// Payload of a `query.response` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponsePayload {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl QueryResponsePayload {
    pub fn success(data: Value) -> Self {
        QueryResponsePayload {
            ok: true,
            data: Some(data),
            err: None,
        }
    }

    pub fn failure(err: impl Into<String>) -> Self {
        QueryResponsePayload {
            ok: false,
            data: None,
            err: Some(err.into()),
        }
    }
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// The single message shape used by all carriers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Mints a fresh, process-unique correlation id. Correlation ids are opaque
/// and never parsed.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Envelope {
    fn stamped(action: Action, payload: Option<Value>) -> Self {
        Envelope {
            action,
            payload,
            request_id: None,
            correlation_id: Some(new_correlation_id()),
            timestamp: now_ms(),
        }
    }

    /// A heartbeat ping. Carries no password.
    pub fn ping() -> Self {
        Envelope::stamped(Action::Ping, None)
    }

    /// A heartbeat pong echoing the ping's correlation id, with the
    /// configured password echoed in the payload when present.
    pub fn pong(correlation_id: Option<String>, password: Option<String>) -> Self {
        let payload = password.map(|password| {
            serde_json::to_value(PongPayload {
                password: Some(password),
            })
            .expect("pong payload serializes")
        });
        Envelope {
            action: Action::Pong,
            payload,
            request_id: None,
            correlation_id,
            timestamp: now_ms(),
        }
    }

    pub fn register_stream_consumer() -> Self {
        Envelope::stamped(Action::RegisterStreamConsumer, None)
    }

    /// An outbox stream batch with a fresh correlation id.
    pub fn batch(events: Vec<StreamEvent>) -> Self {
        let payload = serde_json::to_value(BatchPayload { events }).expect("batch serializes");
        Envelope::stamped(Action::OutboxStreamBatch, Some(payload))
    }

    /// An acknowledgment echoing the batch's correlation id.
    pub fn ack(correlation_id: impl Into<String>, ack: AckPayload) -> Self {
        let payload = serde_json::to_value(ack).expect("ack payload serializes");
        Envelope {
            action: Action::OutboxStreamAck,
            payload: Some(payload),
            request_id: None,
            correlation_id: Some(correlation_id.into()),
            timestamp: now_ms(),
        }
    }

    pub fn query_request(name: impl Into<String>, dto: Option<Value>) -> Self {
        let payload = serde_json::to_value(QueryRequestPayload {
            name: name.into(),
            dto,
        })
        .expect("query request serializes");
        Envelope::stamped(Action::QueryRequest, Some(payload))
    }

    /// A query response echoing the request's correlation id.
    pub fn query_response(
        correlation_id: impl Into<String>,
        payload: QueryResponsePayload,
    ) -> Self {
        let payload = serde_json::to_value(payload).expect("query response serializes");
        Envelope {
            action: Action::QueryResponse,
            payload: Some(payload),
            request_id: None,
            correlation_id: Some(correlation_id.into()),
            timestamp: now_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let payload = serde_json::to_value(ErrorPayload {
            message: message.into(),
        })
        .expect("error payload serializes");
        Envelope::stamped(Action::Error, Some(payload))
    }

    /// Assigns a fresh correlation id when absent and returns the id the
    /// envelope carries. Every object-form message gets one on send.
    pub fn ensure_correlation_id(&mut self) -> &str {
        if self.correlation_id.is_none() {
            self.correlation_id = Some(new_correlation_id());
        }
        self.correlation_id.as_deref().expect("just assigned")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn typed_payload<T: serde::de::DeserializeOwned>(&self, action: Action) -> Option<T> {
        if self.action != action {
            return None;
        }
        self.payload
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn pong_payload(&self) -> Option<PongPayload> {
        if self.action != Action::Pong {
            return None;
        }
        match &self.payload {
            None => Some(PongPayload { password: None }),
            Some(value) => serde_json::from_value(value.clone()).ok(),
        }
    }

    pub fn ack_payload(&self) -> Option<AckPayload> {
        self.typed_payload(Action::OutboxStreamAck)
    }

    pub fn batch_payload(&self) -> Option<BatchPayload> {
        self.typed_payload(Action::OutboxStreamBatch)
    }

    /// The query request payload, guarded: a blank or absent `name` yields
    /// `None` and the caller drops the envelope.
    pub fn query_request_payload(&self) -> Option<QueryRequestPayload> {
        let payload: QueryRequestPayload = self.typed_payload(Action::QueryRequest)?;
        if payload.name.trim().is_empty() {
            return None;
        }
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(version: u32, height: Option<u64>) -> StreamEvent {
        StreamEvent {
            model_name: "block".to_string(),
            event_type: "BlockAdded".to_string(),
            event_version: version,
            request_id: "req-1".to_string(),
            block_height: height,
            payload: "{\"hash\":\"00\"}".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn action_tags_round_trip() {
        let tags = [
            (Action::Ping, "\"ping\""),
            (Action::Pong, "\"pong\""),
            (
                Action::RegisterStreamConsumer,
                "\"registerStreamConsumer\"",
            ),
            (Action::OutboxStreamBatch, "\"outboxStreamBatch\""),
            (Action::OutboxStreamAck, "\"outboxStreamAck\""),
            (Action::QueryRequest, "\"query.request\""),
            (Action::QueryResponse, "\"query.response\""),
            (Action::Error, "\"error\""),
        ];
        for (action, wire) in tags {
            assert_eq!(serde_json::to_string(&action).unwrap(), wire);
            let back: Action = serde_json::from_str(wire).unwrap();
            assert_eq!(back, action);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(Envelope::from_json("{\"action\":\"subscribe\",\"timestamp\":1}").is_err());
    }

    #[test]
    fn batch_envelope_round_trips() {
        let envelope = Envelope::batch(vec![event(0, Some(812_345)), event(1, None)]);
        let raw = envelope.to_json().unwrap();
        let back = Envelope::from_json(&raw).unwrap();
        assert_eq!(back, envelope);

        let batch = back.batch_payload().unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].block_height, Some(812_345));
        assert_eq!(batch.events[1].block_height, None);
    }

    #[test]
    fn block_height_is_stringified_on_the_wire() {
        let raw = serde_json::to_value(event(3, Some(812_345))).unwrap();
        assert_eq!(raw["blockHeight"], json!("812345"));

        // Both the string form and a plain number decode.
        let from_string: StreamEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(from_string.block_height, Some(812_345));
        let from_number: StreamEvent = serde_json::from_value(json!({
            "modelName": "block",
            "eventType": "BlockAdded",
            "eventVersion": 3,
            "requestId": "req-1",
            "blockHeight": 812345,
            "payload": "{}",
            "timestamp": 1
        }))
        .unwrap();
        assert_eq!(from_number.block_height, Some(812_345));
    }

    #[test]
    fn ensure_correlation_id_assigns_once() {
        let mut envelope = Envelope {
            action: Action::Ping,
            payload: None,
            request_id: None,
            correlation_id: None,
            timestamp: 0,
        };
        let minted = envelope.ensure_correlation_id().to_string();
        assert_eq!(envelope.ensure_correlation_id(), minted);
    }

    #[test]
    fn pong_without_payload_has_no_password() {
        let pong = Envelope::pong(Some("c1".to_string()), None);
        assert_eq!(pong.payload, None);
        assert_eq!(pong.pong_payload().unwrap().password, None);

        let pong = Envelope::pong(Some("c1".to_string()), Some("hunter2".to_string()));
        assert_eq!(
            pong.pong_payload().unwrap().password.as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn ack_payload_shapes() {
        let full = Envelope::ack("c1", AckPayload::accepted());
        assert_eq!(
            full.ack_payload().unwrap(),
            AckPayload {
                all_ok: true,
                ok_indices: None
            }
        );

        let partial = Envelope::ack("c2", AckPayload::partial(vec![0, 2]));
        let payload = partial.ack_payload().unwrap();
        assert!(!payload.all_ok);
        assert_eq!(payload.ok_indices, Some(vec![0, 2]));
    }

    #[test]
    fn blank_query_name_is_guarded() {
        let envelope = Envelope::query_request("  ", None);
        assert!(envelope.query_request_payload().is_none());

        let envelope = Envelope::query_request("getBlock", Some(json!({"height": 5})));
        let payload = envelope.query_request_payload().unwrap();
        assert_eq!(payload.name, "getBlock");
        assert_eq!(payload.dto, Some(json!({"height": 5})));
    }

    #[test]
    fn error_and_registration_envelopes_carry_fresh_ids() {
        let error = Envelope::error("decode failed");
        assert_eq!(error.action, Action::Error);
        assert!(error.correlation_id.is_some());
        let payload: ErrorPayload = serde_json::from_value(error.payload.unwrap()).unwrap();
        assert_eq!(payload.message, "decode failed");

        let register = Envelope::register_stream_consumer();
        assert_eq!(register.action, Action::RegisterStreamConsumer);
        assert!(register.correlation_id.is_some());
    }

    #[test]
    fn payload_accessor_ignores_mismatched_action() {
        let envelope = Envelope::ping();
        assert!(envelope.ack_payload().is_none());
        assert!(envelope.batch_payload().is_none());
    }
}
