//! Consumer-side reply helper
//!
//! Pure send operation: no registry involvement. Duplicate replies are
//! harmless because the producer side resolves first-wins.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use replyq_core::{Error, Message, Result, Transport, ATTR_CORRELATION_ID};

#[derive(Clone)]
pub struct Responder {
    transport: Arc<dyn Transport>,
}

impl Responder {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send `payload` back to the requester of `request`, echoing its
    /// correlation id.
    ///
    /// Fails with `MalformedRequest` when the request carries no
    /// correlation id or no reply destination.
    pub async fn reply(&self, request: &Message, payload: impl Into<Bytes> + Send) -> Result<()> {
        let correlation_id = request
            .correlation_id()
            .ok_or(Error::MalformedRequest("correlation_id"))?;
        let reply_to = request.reply_to().ok_or(Error::MalformedRequest("reply_to"))?;

        let response =
            Message::new(payload).with_attribute(ATTR_CORRELATION_ID, correlation_id.to_string());
        self.transport.send(&reply_to, response).await?;

        debug!(
            correlation_id = %correlation_id,
            destination = %reply_to,
            "Response sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;

    use replyq_core::{CorrelationId, DestinationName, InMemoryTransport, ATTR_REPLY_TO};

    #[tokio::test]
    async fn test_reply_echoes_correlation_id() {
        let transport = InMemoryTransport::new();
        let reply_to = DestinationName::from("reply-inbox");
        transport
            .create_destination(&reply_to, Duration::from_secs(60))
            .await
            .unwrap();

        let id = CorrelationId::new();
        let request = Message::new("work")
            .with_attribute(ATTR_CORRELATION_ID, id.to_string())
            .with_attribute(ATTR_REPLY_TO, reply_to.as_str());

        let responder = Responder::new(Arc::new(transport.clone()));
        responder.reply(&request, "done").await.unwrap();

        let batch = transport
            .receive(&reply_to, 10, Duration::from_millis(50), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.correlation_id(), Some(id));
        assert_eq!(batch[0].message.body, Bytes::from("done"));
        // Responses do not carry reply metadata of their own.
        assert_eq!(batch[0].message.reply_to(), None);
    }

    #[tokio::test]
    async fn test_reply_rejects_requests_without_metadata() {
        let responder = Responder::new(Arc::new(InMemoryTransport::new()));

        let no_id = Message::new("x").with_attribute(ATTR_REPLY_TO, "somewhere");
        assert!(matches!(
            responder.reply(&no_id, "y").await.unwrap_err(),
            Error::MalformedRequest("correlation_id")
        ));

        let no_reply_to =
            Message::new("x").with_attribute(ATTR_CORRELATION_ID, CorrelationId::new().to_string());
        assert!(matches!(
            responder.reply(&no_reply_to, "y").await.unwrap_err(),
            Error::MalformedRequest("reply_to")
        ));
    }
}
