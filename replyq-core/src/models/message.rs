use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

use super::destination::DestinationName;
use super::id::CorrelationId;

/// Attribute carrying the correlation id. Present on every request and
/// echoed on every response.
pub const ATTR_CORRELATION_ID: &str = "correlation_id";

/// Attribute carrying the reply destination name. Present on requests
/// that expect a response.
pub const ATTR_REPLY_TO: &str = "reply_to";

/// A message in transit: opaque body plus string attributes.
///
/// The core never interprets the body; correlation metadata travels in
/// the attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
}

impl Message {
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Correlation id attribute, if present and well-formed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.attributes
            .get(ATTR_CORRELATION_ID)
            .and_then(|v| CorrelationId::parse(v))
    }

    /// Reply destination attribute, if present.
    #[must_use]
    pub fn reply_to(&self) -> Option<DestinationName> {
        self.attributes
            .get(ATTR_REPLY_TO)
            .map(|v| DestinationName::from_string(v.clone()))
    }
}

/// Receipt identifying one delivery of a message.
///
/// Rotated by the transport on each redelivery; acknowledging with a
/// stale receipt fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed out by `Transport::receive`, paired with the receipt
/// needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: Message,
    pub receipt: ReceiptHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::id::Role;

    #[test]
    fn test_message_attribute_accessors() {
        let id = CorrelationId::new();
        let reply_to = DestinationName::replies("replyq-reply-", &Role::from("echo"), Uuid::new_v4());
        let msg = Message::new("hello")
            .with_attribute(ATTR_CORRELATION_ID, id.to_string())
            .with_attribute(ATTR_REPLY_TO, reply_to.as_str());

        assert_eq!(msg.correlation_id(), Some(id));
        assert_eq!(msg.reply_to(), Some(reply_to));
        assert_eq!(msg.body, Bytes::from("hello"));
    }

    #[test]
    fn test_message_without_metadata() {
        let msg = Message::new("bare");
        assert_eq!(msg.correlation_id(), None);
        assert_eq!(msg.reply_to(), None);
    }

    #[test]
    fn test_garbled_correlation_id_reads_as_missing() {
        let msg = Message::new("x").with_attribute(ATTR_CORRELATION_ID, "garbage");
        assert_eq!(msg.correlation_id(), None);
    }
}
