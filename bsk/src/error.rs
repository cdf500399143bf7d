use crate::TransportKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("TransportError: {0}")]
    Transport(#[from] TransportError),
    #[error("OutboxError: {0}")]
    Outbox(#[from] OutboxError),
    #[error("ChainError: {0}")]
    Chain(#[from] ChainError),
    #[error("BuilderError: {0}")]
    Builder(#[from] BuilderError),
    #[error("Generic error: {0}")]
    Generic(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport initialization: {0}")]
    Init(String),
    #[error("Carrier is not writable.")]
    Disconnected,
    #[error("Transport did not come online within {0:?}.")]
    NotOnline(Duration),
    #[error("No acknowledgment arrived within {0:?}.")]
    AckTimeout(Duration),
    #[error("Another acknowledgment is already pending on this transport.")]
    AnotherAckPending,
    #[error("No batch is awaiting acknowledgment.")]
    NoBatch,
    #[error("Message of {size} bytes exceeds the {limit} byte limit.")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("Transport was destroyed.")]
    Destroyed,
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("No producer transport is bound.")]
    NoProducer,
    #[error("A producer transport is already bound.")]
    ProducerAlreadySet,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid transaction id hex: {0}")]
    InvalidHex(String),
    #[error("Cannot compute a merkle root over an empty transaction list.")]
    EmptyTree,
    #[error("Block source error: {0}")]
    Source(String),
}

/// An error that could be thrown while wiring the streaming components.
#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Streaming transport {0} was requested but not provisioned.")]
    StreamingTransportNotProvisioned(TransportKind),
    #[error("Transport kind {0} is not supported by this build.")]
    UnsupportedTransport(TransportKind),
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
}
