//! Inbound query handling: a carrier receives a `query.request` envelope,
//! hands it to the application's query bus, and replies with a
//! `query.response` echoing the correlation id.
//!
//! Query names are dispatched through a registry built at startup; there is
//! no runtime fabrication of query types.

use crate::transport::OutboundSink;
use async_trait::async_trait;
use bsk_messages::{Envelope, QueryResponsePayload};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The application-side collaborator executing queries by name.
#[async_trait]
pub trait QueryBus: Send + Sync {
    async fn execute(&self, name: &str, dto: Option<Value>) -> Result<Value, String>;
}

type QueryHandler =
    Box<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Name → handler registry. Handlers receive the request's opaque dto and
/// return either the response data or an error string.
#[derive(Default)]
pub struct QueryRegistry {
    handlers: HashMap<String, QueryHandler>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        QueryRegistry::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Box::new(move |dto| Box::pin(handler(dto))));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[async_trait]
impl QueryBus for QueryRegistry {
    async fn execute(&self, name: &str, dto: Option<Value>) -> Result<Value, String> {
        match self.handlers.get(name) {
            Some(handler) => handler(dto).await,
            None => Err(format!("Query {} is not registered.", name)),
        }
    }
}

/// Bridges inbound query requests to the query bus, per transport.
pub struct QueryResponder {
    bus: Arc<dyn QueryBus>,
}

impl QueryResponder {
    pub fn new(bus: Arc<dyn QueryBus>) -> Self {
        QueryResponder { bus }
    }

    /// Executes the request and writes the response through the carrier.
    /// Requests without a correlation id or with a blank name are silently
    /// dropped; bus failures become `{ ok: false, err }` responses.
    pub(crate) async fn respond(&self, envelope: Envelope, sink: Arc<dyn OutboundSink>) {
        let Some(correlation_id) = envelope.correlation_id.clone() else {
            debug!("dropping query request without correlation id");
            return;
        };
        let Some(request) = envelope.query_request_payload() else {
            debug!("dropping query request without a valid name");
            return;
        };
        let payload = match self.bus.execute(&request.name, request.dto).await {
            Ok(data) => QueryResponsePayload::success(data),
            Err(err) => QueryResponsePayload::failure(err),
        };
        let reply = Envelope::query_response(correlation_id, payload);
        if let Err(error) = sink.write(reply).await {
            debug!(error = %error, "failed to write query response");
        }
    }
}
