pub mod destination;
pub mod id;
pub mod message;

pub use destination::{DestinationInfo, DestinationName};
pub use id::{CorrelationId, Role};
pub use message::{Message, ReceivedMessage, ReceiptHandle, ATTR_CORRELATION_ID, ATTR_REPLY_TO};
