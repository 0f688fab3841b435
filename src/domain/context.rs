//! Per-dispatch context handed to every command handler.
//!
//! A [`DispatchContext`] tells a handler who sent the command, over which
//! connection, and lets it observe the connection going away through a
//! [`CancellationSignal`].

use tokio::sync::watch;
use uuid::Uuid;

use super::UserId;

/// Creates a linked trigger/signal pair.
///
/// The signal fires when [`CancellationTrigger::cancel`] is called or when
/// the trigger is dropped.
#[must_use]
pub fn cancellation_pair() -> (CancellationTrigger, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancellationTrigger { tx },
        CancellationSignal { rx: Some(rx) },
    )
}

/// Owning side of a cancellation pair. Held by the connection task.
#[derive(Debug)]
pub struct CancellationTrigger {
    tx: watch::Sender<bool>,
}

impl CancellationTrigger {
    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observing side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self { rx: None }
    }

    /// Returns `true` once the owning connection has closed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Completes when the owning connection closes.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        // A dropped trigger surfaces as an error, which also means cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Caller context passed to command handlers.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    identity: UserId,
    connection_id: Uuid,
    cancellation: CancellationSignal,
}

impl DispatchContext {
    /// Builds a context for a command arriving on `connection_id`.
    #[must_use]
    pub const fn new(identity: UserId, connection_id: Uuid, cancellation: CancellationSignal) -> Self {
        Self {
            identity,
            connection_id,
            cancellation,
        }
    }

    /// Context not bound to any live connection. Never cancelled.
    #[must_use]
    pub fn detached(identity: impl Into<UserId>) -> Self {
        Self::new(identity.into(), Uuid::nil(), CancellationSignal::never())
    }

    /// Identity of the sender.
    #[must_use]
    pub const fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Connection the command arrived on.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Cancellation signal tied to the sender's connection lifetime.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Shorthand for `self.cancellation().is_cancelled()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
