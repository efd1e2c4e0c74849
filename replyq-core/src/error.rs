//! Error types shared by every replyq crate

use thiserror::Error;

use crate::models::CorrelationId;

/// replyq error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// The transport rejected an outgoing message. Surfaced to the
    /// caller; the core does not retry sends.
    #[error("failed to send to {destination}: {reason}")]
    SendFailed { destination: String, reason: String },

    /// No response arrived before the deadline. The pending entry has
    /// already been cleaned up when this surfaces.
    #[error("request {correlation_id} timed out after {timeout_ms}ms")]
    RequestTimedOut {
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    /// Creating or looking up a reply destination failed. Fatal to the
    /// dispatch attempting to use that role until retried.
    #[error("reply destination for role {role} unavailable: {reason}")]
    DestinationUnavailable { role: String, reason: String },

    /// An inbound request is missing correlation metadata.
    #[error("malformed request: missing {0} attribute")]
    MalformedRequest(&'static str),

    /// An inbound response is missing its correlation id.
    #[error("malformed response: missing correlation id")]
    MalformedResponse,

    /// A correlation id was registered twice. Ids are collision-resistant,
    /// so this is a programming error, not an operational one.
    #[error("correlation id {0} already registered")]
    DuplicateCorrelationId(CorrelationId),

    /// Transport-level failure outside the send path.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for replyq operations
pub type Result<T> = std::result::Result<T, Error>;
