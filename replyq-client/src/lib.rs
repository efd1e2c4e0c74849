//! Request-reply messaging over an at-least-once queue transport
//!
//! Producers call [`RequestClient::send_request`] and get the correlated
//! response back as if the exchange were synchronous; consumers serve
//! requests with a [`RequestWorker`] or answer ad hoc through
//! [`Responder`]. All correlation state is in-memory and local to the
//! owning process.

pub mod client;
pub mod consumer;
pub mod correlation;
pub mod destination;
pub mod poller;
pub mod responder;
pub mod sweeper;

pub use client::RequestClient;
pub use consumer::{RequestHandler, RequestWorker};
pub use correlation::{CorrelationRegistry, PendingResponse};
pub use destination::{ReplyDestination, ReplyDestinationManager, ReplyLease};
pub use responder::Responder;
pub use sweeper::IdleDestinationSweeper;
