pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod models;
pub mod transport;

pub use config::Config;
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsSink, SharedDiagnostics, TracingSink};
pub use error::{Error, Result};
pub use models::{
    CorrelationId, DestinationInfo, DestinationName, Message, ReceivedMessage, ReceiptHandle,
    Role, ATTR_CORRELATION_ID, ATTR_REPLY_TO,
};
pub use transport::{InMemoryTransport, Transport};
