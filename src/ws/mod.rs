//! WebSocket layer: upgrade, envelopes, and the per-connection router.
//!
//! The endpoint at `/ws` carries request envelopes from clients and
//! routes each dispatch result to the connection named by `target_id`.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::{MessageRouter, RouteOutcome};
pub use messages::{RequestEnvelope, ResponseEnvelope};
