//! Identity → live connection map shared by every connection task.
//!
//! [`ConnectionRegistry`] is the single piece of shared mutable state in
//! the routing core. It uses a `std::sync::RwLock`: lookups share the
//! lock, `add`/`remove` take it exclusively, and no guard is ever held
//! across an `.await` or an outbound write.
//!
//! A [`ConnectionHandle`] is the sending side of a connection's outbound
//! queue. The connection's writer task owns the socket sink and drains
//! the queue, so writing to a handle never touches the socket directly.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::UserId;
use crate::error::DeliveryError;

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame.
    Text(String),
    /// Close the connection with the given code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

/// Close code sent to a connection evicted by a newer one for the same
/// identity.
pub const CLOSE_REPLACED: u16 = 4000;

/// Handle to a live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: Uuid,
    identity: UserId,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle with a fresh connection id and a queue of
    /// `buffer` frames. The receiver belongs to the writer task.
    #[must_use]
    pub fn new(identity: UserId, buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            connection_id: Uuid::new_v4(),
            identity,
            outbound,
        };
        (handle, rx)
    }

    /// Unique id of the underlying connection.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Identity the connection was registered under.
    #[must_use]
    pub const fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Queues a text frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] if the writer is behind, or
    /// [`DeliveryError::ConnectionClosed`] if the writer has exited.
    pub fn send_text(&self, text: String) -> Result<(), DeliveryError> {
        self.enqueue(Outbound::Text(text))
    }

    /// Asks the writer task to close the connection.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::send_text`].
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), DeliveryError> {
        self.enqueue(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Returns `true` once the writer task has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Returns `true` if both handles point at the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull(self.connection_id),
            TrySendError::Closed(_) => DeliveryError::ConnectionClosed(self.connection_id),
        })
    }
}

/// Concurrent map from identity to its current connection.
///
/// # Concurrency
///
/// - Any number of `get` calls proceed in parallel.
/// - `add`, `remove` and `remove_if` are serialized against each other
///   and against readers.
/// - At most one handle per identity; a later `add` wins.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the handle for `identity`.
    ///
    /// Returns the displaced handle, if any. The registry does not close
    /// it; that is up to the caller.
    pub fn add(&self, identity: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.connection_id();
        let previous = {
            let mut map = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            map.insert(identity.clone(), handle)
        };
        match &previous {
            Some(old) => tracing::info!(
                identity = %identity,
                %connection_id,
                replaced = %old.connection_id(),
                "connection replaced"
            ),
            None => tracing::info!(identity = %identity, %connection_id, "connection registered"),
        }
        previous
    }

    /// Removes the entry for `identity`. A no-op if absent.
    pub fn remove(&self, identity: &str) -> Option<ConnectionHandle> {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
        if let Some(handle) = &removed {
            tracing::info!(
                identity,
                connection_id = %handle.connection_id(),
                "connection deregistered"
            );
        }
        removed
    }

    /// Removes the entry for `identity` only if it still belongs to
    /// `connection_id`. Returns `true` if an entry was removed.
    pub fn remove_if(&self, identity: &str, connection_id: Uuid) -> bool {
        let removed = {
            let mut map = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            match map.get(identity) {
                Some(current) if current.connection_id() == connection_id => {
                    map.remove(identity);
                    true
                }
                _ => false,
            }
        };
        if removed {
            tracing::info!(identity, %connection_id, "connection deregistered");
        } else {
            tracing::debug!(identity, %connection_id, "stale connection left no entry to remove");
        }
        removed
    }

    /// Returns the current handle for `identity`, if any.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Like [`ConnectionRegistry::get`], but reports a missing identity as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::TargetUnresolved`] if `identity` has no
    /// live connection.
    pub fn resolve(&self, identity: &str) -> Result<ConnectionHandle, DeliveryError> {
        self.get(identity)
            .ok_or_else(|| DeliveryError::TargetUnresolved(identity.to_string()))
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every registered identity, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<UserId> {
        let map = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<UserId> = map.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Registers `handle` and returns a guard that deregisters it when
    /// dropped, together with any handle it displaced.
    ///
    /// The guard uses [`ConnectionRegistry::remove_if`], so dropping a
    /// stale guard never evicts a newer connection for the same identity.
    pub fn register(
        self: &Arc<Self>,
        handle: ConnectionHandle,
    ) -> (RegistrationGuard, Option<ConnectionHandle>) {
        let guard = RegistrationGuard {
            registry: Arc::clone(self),
            identity: handle.identity().clone(),
            connection_id: handle.connection_id(),
        };
        let replaced = self.add(handle.identity().clone(), handle);
        (guard, replaced)
    }
}

/// Scoped registration of one connection.
///
/// Dropping the guard deregisters the connection on every exit path of
/// the owning task, including unwinding.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    identity: UserId,
    connection_id: Uuid,
}

impl RegistrationGuard {
    /// Identity the guarded connection is registered under.
    #[must_use]
    pub const fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Id of the guarded connection.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry
            .remove_if(self.identity.as_str(), self.connection_id);
    }
}
