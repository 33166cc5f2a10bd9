//! Trace-event ingestion: raw event types, payload decoding, handlers and
//! the dispatcher that routes between them.

pub mod dispatcher;
pub mod handlers;
pub mod payload;
pub mod types;

pub use dispatcher::{DispatchOutcome, Dispatcher, RegistrationError};
pub use handlers::{EventContext, EventHandler, HandlerError};
pub use types::{extract_peer_id, TraceEvent, UNKNOWN_PEER};
