//! Domain layer: the command dispatch and connection routing core.
//!
//! This module holds the two registries every connection shares, the
//! identity newtype that keys them, the per-dispatch context handed to
//! handlers, and the dispatch outcome type the router turns into a
//! response envelope.

pub mod command_registry;
pub mod connection_registry;
pub mod context;
pub mod response;
pub mod user_id;

pub use command_registry::{CommandRegistry, decode_payload};
pub use connection_registry::{
    CLOSE_REPLACED, ConnectionHandle, ConnectionRegistry, Outbound, RegistrationGuard,
};
pub use context::{CancellationSignal, CancellationTrigger, DispatchContext, cancellation_pair};
pub use response::{DispatchResponse, Status};
pub use user_id::UserId;
