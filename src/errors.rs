use thiserror::Error;

/// Error kinds surfaced by the narration core.
///
/// Transient connection problems are handled inside the connection loop and
/// never reach callers directly; business logic only ever observes
/// `NotConnected` (the client is between connections) or
/// `WaitingForTelemetry` (connected, first valid frame not yet received).
#[derive(Debug, Error)]
pub enum SimError {
    /// The simulator connection is not established.
    #[error("not connected to simulator")]
    NotConnected,

    /// Connected, but no valid telemetry frame has been received yet.
    #[error("waiting for telemetry")]
    WaitingForTelemetry,

    /// A bounded wait (spawn confirmation, protocol call) expired.
    #[error("operation timed out")]
    Timeout,

    /// The simulator reported a protocol exception for a request we sent.
    #[error("protocol exception {code} (send id {send_id})")]
    ProtocolException { code: u32, send_id: u32 },

    /// The requested entity is not tracked and not in the state store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The state store failed to persist or load.
    #[error("state store failure: {0}")]
    StoreFailure(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type SimResult<T> = Result<T, SimError>;
