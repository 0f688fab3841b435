//! WebSocket connection state machine.
//!
//! Each upgraded socket runs [`run_connection`] in its own task:
//!
//! ```text
//! Connecting ──▶ Registered ──▶ Receiving (loop) ──▶ Closed
//! ```
//!
//! The socket is split. A writer task owns the sink and drains the
//! connection's outbound queue; the reader loop decodes one frame at a
//! time, dispatches it through the [`CommandRegistry`] and hands the
//! response to the target's queue via [`MessageRouter`]. Frames are
//! processed strictly in arrival order; while a handler runs the socket is
//! still watched so a hang-up cancels the handler's context.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::{RequestEnvelope, ResponseEnvelope};
use crate::app_state::AppState;
use crate::domain::{
    CLOSE_REPLACED, CancellationTrigger, CommandRegistry, ConnectionHandle, ConnectionRegistry,
    DispatchContext, Outbound, Status, UserId, cancellation_pair,
};
use crate::error::DeliveryError;

/// Normal closure code.
const CLOSE_NORMAL: u16 = 1000;

/// How long a closing connection waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Frames read ahead while a handler is still running.
const MAX_PENDING_FRAMES: usize = 32;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The response was queued on the target connection.
    Delivered {
        /// Identity the response went to.
        target_id: String,
        /// Status carried by the response.
        status: Status,
    },
    /// No live connection exists for the target; the response was dropped.
    Unresolved {
        /// Identity that could not be resolved.
        target_id: String,
    },
    /// The target exists but its queue rejected the response.
    Failed {
        /// Identity the response was meant for.
        target_id: String,
        /// Why the write failed.
        error: DeliveryError,
    },
}

/// Per-connection router: decode → dispatch → targeted delivery.
///
/// Holds only its own connection handle and references to the shared
/// registries.
#[derive(Debug)]
pub struct MessageRouter {
    commands: Arc<CommandRegistry>,
    connections: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl MessageRouter {
    /// Creates a router for the connection behind `handle`.
    #[must_use]
    pub const fn new(
        commands: Arc<CommandRegistry>,
        connections: Arc<ConnectionRegistry>,
        handle: ConnectionHandle,
    ) -> Self {
        Self {
            commands,
            connections,
            handle,
        }
    }

    /// Identity of the connection this router serves.
    #[must_use]
    pub const fn identity(&self) -> &UserId {
        self.handle.identity()
    }

    /// Processes one inbound frame to completion.
    ///
    /// Malformed frames are answered on the sender's own connection
    /// without dispatching. Well-formed requests are dispatched and the
    /// response is routed to `target_id` (the sender when absent or
    /// empty).
    pub async fn handle_frame(&self, raw: &[u8], ctx: DispatchContext) -> RouteOutcome {
        let request = match RequestEnvelope::parse_bytes(raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(identity = %self.identity(), error = %err, "inbound envelope rejected");
                let envelope = ResponseEnvelope::parse_failure(raw);
                return self.reply_to_sender(&envelope);
            }
        };

        let target_id = match request.target_id {
            Some(target) if !target.is_empty() => target,
            _ => self.identity().to_string(),
        };
        let response = self
            .commands
            .dispatch(&request.command, request.payload, ctx)
            .await;
        let envelope = ResponseEnvelope::routed(response, target_id);
        self.deliver(&envelope)
    }

    /// Resolves `envelope.target_id` and queues the envelope on it.
    ///
    /// The registry lock is released before the write is attempted.
    pub fn deliver(&self, envelope: &ResponseEnvelope) -> RouteOutcome {
        match self.connections.resolve(&envelope.target_id) {
            Ok(target) => self.write(&target, envelope),
            Err(error) => {
                tracing::warn!(
                    sender = %self.identity(),
                    command = %envelope.command,
                    error = %error,
                    "response dropped"
                );
                RouteOutcome::Unresolved {
                    target_id: envelope.target_id.clone(),
                }
            }
        }
    }

    fn reply_to_sender(&self, envelope: &ResponseEnvelope) -> RouteOutcome {
        self.write(&self.handle, envelope)
    }

    fn write(&self, target: &ConnectionHandle, envelope: &ResponseEnvelope) -> RouteOutcome {
        let result = envelope
            .to_json()
            .map_err(|err| DeliveryError::Encode(err.to_string()))
            .and_then(|text| target.send_text(text));

        match result {
            Ok(()) => {
                tracing::debug!(
                    sender = %self.identity(),
                    target_id = %target.identity(),
                    command = %envelope.command,
                    "response queued"
                );
                RouteOutcome::Delivered {
                    target_id: target.identity().to_string(),
                    status: envelope.status,
                }
            }
            Err(error) => {
                tracing::warn!(
                    sender = %self.identity(),
                    target_id = %target.identity(),
                    command = %envelope.command,
                    error = %error,
                    "response write failed"
                );
                RouteOutcome::Failed {
                    target_id: target.identity().to_string(),
                    error,
                }
            }
        }
    }
}

/// Outcome of waiting for the next inbound frame.
enum Inbound {
    Frame(Vec<u8>),
    Skip,
    Closed,
    Failed(axum::Error),
    Idle,
}

/// Runs the full lifecycle of one authenticated WebSocket connection.
///
/// Registers the connection, loops over inbound frames until the socket
/// closes, then deregisters it. Deregistration is tied to a guard, so it
/// also happens if the task unwinds.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: UserId) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (handle, outbound_rx) = ConnectionHandle::new(identity.clone(), state.config.outbound_buffer);
    let connection_id = handle.connection_id();
    let (trigger, signal) = cancellation_pair();

    let (registration, replaced) = state.connections.register(handle.clone());
    if let Some(old) = replaced
        && let Err(err) = old.close(CLOSE_REPLACED, "replaced by a newer connection")
    {
        tracing::debug!(identity = %identity, error = %err, "replaced connection already gone");
    }

    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound_rx, connection_id));
    let mut writer_done = false;
    let router = MessageRouter::new(
        Arc::clone(&state.commands),
        Arc::clone(&state.connections),
        handle.clone(),
    );

    tracing::info!(identity = %identity, %connection_id, "ws connection opened");

    let mut pending: VecDeque<Vec<u8>> = VecDeque::new();
    loop {
        let bytes = match pending.pop_front() {
            Some(bytes) => bytes,
            None => {
                let inbound = tokio::select! {
                    inbound = next_frame(&mut ws_rx, state.config.idle_timeout) => inbound,
                    _ = &mut writer => {
                        writer_done = true;
                        tracing::debug!(identity = %identity, %connection_id, "writer finished, closing reader");
                        break;
                    }
                };
                match inbound {
                    Inbound::Frame(bytes) => bytes,
                    Inbound::Skip => continue,
                    Inbound::Closed => break,
                    Inbound::Failed(err) => {
                        tracing::warn!(identity = %identity, %connection_id, error = %err, "ws read failed");
                        break;
                    }
                    Inbound::Idle => {
                        tracing::info!(identity = %identity, %connection_id, "ws connection idle, closing");
                        break;
                    }
                }
            }
        };

        let ctx = DispatchContext::new(identity.clone(), connection_id, signal.clone());
        let dispatch = router.handle_frame(&bytes, ctx);
        if dispatch_watching_close(dispatch, &mut ws_rx, &mut pending, &trigger).await {
            if !pending.is_empty() {
                tracing::debug!(
                    %connection_id,
                    dropped = pending.len(),
                    "discarding frames queued before close"
                );
            }
            break;
        }
    }

    trigger.cancel();
    drop(registration);
    drop(router);

    if !writer_done {
        if let Err(err) = handle.close(CLOSE_NORMAL, "") {
            tracing::debug!(%connection_id, error = %err, "writer already stopped");
        }
        drop(handle);
        shutdown_writer(writer).await;
    }

    tracing::info!(identity = %identity, %connection_id, "ws connection closed");
}

/// Drives `dispatch` to completion while still watching the socket.
///
/// Frames that arrive meanwhile are queued in order (up to
/// [`MAX_PENDING_FRAMES`]). If the client hangs up, `trigger` fires so the
/// running handler can observe it. Returns `true` once the socket closed.
async fn dispatch_watching_close<F>(
    dispatch: F,
    rx: &mut SplitStream<WebSocket>,
    pending: &mut VecDeque<Vec<u8>>,
    trigger: &CancellationTrigger,
) -> bool
where
    F: Future<Output = RouteOutcome>,
{
    tokio::pin!(dispatch);
    let mut closed = false;
    loop {
        tokio::select! {
            biased;
            _ = &mut dispatch => return closed,
            inbound = next_frame(rx, None), if !closed && pending.len() < MAX_PENDING_FRAMES => {
                match inbound {
                    Inbound::Frame(bytes) => pending.push_back(bytes),
                    Inbound::Skip | Inbound::Idle => {}
                    Inbound::Closed => closed = true,
                    Inbound::Failed(err) => {
                        tracing::warn!(error = %err, "ws read failed during dispatch");
                        closed = true;
                    }
                }
                if closed {
                    trigger.cancel();
                }
            }
        }
    }
}

async fn next_frame(rx: &mut SplitStream<WebSocket>, idle_timeout: Option<Duration>) -> Inbound {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, rx.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => rx.next().await,
    };

    match next {
        Some(Ok(Message::Text(text))) => Inbound::Frame(text.as_str().as_bytes().to_vec()),
        Some(Ok(Message::Binary(bytes))) => Inbound::Frame(bytes.to_vec()),
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Inbound::Skip,
        Some(Ok(Message::Close(_))) | None => Inbound::Closed,
        Some(Err(err)) => Inbound::Failed(err),
    }
}

/// Drains the outbound queue into the socket until a close is requested,
/// every sender is gone, or a write fails.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: Uuid,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(err) = sink.send(Message::text(text)).await {
                    tracing::warn!(%connection_id, error = %err, "ws write failed");
                    return;
                }
            }
            Outbound::Close { code, reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                if let Err(err) = sink.send(close).await {
                    tracing::debug!(%connection_id, error = %err, "ws close frame not sent");
                }
                return;
            }
        }
    }
}

async fn shutdown_writer(mut task: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut task).await.is_err() {
        task.abort();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    struct Harness {
        commands: Arc<CommandRegistry>,
        connections: Arc<ConnectionRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let commands = CommandRegistry::new();
            commands.register("echo", |text: String, _ctx| async move { Ok(text) });
            commands.register("whoami", |_: Value, ctx: DispatchContext| async move {
                Ok(ctx.identity().to_string())
            });
            Self {
                commands: Arc::new(commands),
                connections: Arc::new(ConnectionRegistry::new()),
            }
        }

        fn connect(&self, identity: &str) -> (MessageRouter, mpsc::Receiver<Outbound>) {
            let (handle, rx) = ConnectionHandle::new(UserId::new(identity), 8);
            self.connections.add(UserId::new(identity), handle.clone());
            let router = MessageRouter::new(
                Arc::clone(&self.commands),
                Arc::clone(&self.connections),
                handle,
            );
            (router, rx)
        }
    }

    fn ctx(identity: &str) -> DispatchContext {
        DispatchContext::detached(identity)
    }

    fn received(rx: &mut mpsc::Receiver<Outbound>) -> Value {
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected a queued text frame");
        };
        let Ok(value) = serde_json::from_str(&text) else {
            panic!("frame is not JSON: {text}");
        };
        value
    }

    #[tokio::test]
    async fn echo_returns_to_sender() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.connect("alice");

        let outcome = alice
            .handle_frame(
                br#"{"command":"echo","payload":"\"hi\"","target_id":"alice"}"#,
                ctx("alice"),
            )
            .await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                target_id: "alice".to_string(),
                status: Status::Success
            }
        );
        assert_eq!(
            received(&mut alice_rx),
            json!({"command": "echo", "status": "success", "data": "hi", "target_id": "alice"})
        );
    }

    #[tokio::test]
    async fn response_goes_to_third_party() {
        let harness = Harness::new();
        let (passenger, mut passenger_rx) = harness.connect("passenger");
        let (_driver, mut driver_rx) = harness.connect("driver");

        passenger
            .handle_frame(
                br#"{"command":"whoami","payload":null,"target_id":"driver"}"#,
                ctx("passenger"),
            )
            .await;

        assert_eq!(
            received(&mut driver_rx),
            json!({"command": "whoami", "status": "success", "data": "passenger", "target_id": "driver"})
        );
        assert!(passenger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_command_error_is_routed() {
        let harness = Harness::new();
        let (bob, mut bob_rx) = harness.connect("bob");

        bob.handle_frame(
            br#"{"command":"missing_cmd","payload":null,"target_id":"bob"}"#,
            ctx("bob"),
        )
        .await;
        assert_eq!(
            received(&mut bob_rx),
            json!({"command": "missing_cmd", "status": "error", "data": null, "target_id": "bob"})
        );
    }

    #[tokio::test]
    async fn unresolved_target_is_dropped_silently() {
        let harness = Harness::new();
        let (carol, mut carol_rx) = harness.connect("carol");

        let outcome = carol
            .handle_frame(
                br#"{"command":"echo","payload":"hello","target_id":"dave"}"#,
                ctx("carol"),
            )
            .await;
        assert_eq!(
            outcome,
            RouteOutcome::Unresolved {
                target_id: "dave".to_string()
            }
        );
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_answers_sender_without_dispatch() {
        let harness = Harness::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        harness.commands.register("count", move |_: Value, _ctx| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(()) }
        });
        let (erin, mut erin_rx) = harness.connect("erin");

        let outcome = erin.handle_frame(b"{\"command\":\"count\",", ctx("erin")).await;
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                target_id: "erin".to_string(),
                status: Status::Error
            }
        );
        assert_eq!(
            received(&mut erin_rx),
            json!({"command": "", "status": "error", "data": null, "target_id": ""})
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_target_defaults_to_sender() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.connect("alice");

        alice
            .handle_frame(br#"{"command":"echo","payload":"solo"}"#, ctx("alice"))
            .await;
        let value = received(&mut alice_rx);
        assert_eq!(value.get("target_id"), Some(&json!("alice")));
        assert_eq!(value.get("data"), Some(&json!("solo")));
    }

    #[tokio::test]
    async fn closed_target_reports_failure() {
        let harness = Harness::new();
        let (alice, _alice_rx) = harness.connect("alice");
        let (_frank, frank_rx) = harness.connect("frank");
        drop(frank_rx);

        let outcome = alice
            .handle_frame(
                br#"{"command":"echo","payload":"hey","target_id":"frank"}"#,
                ctx("alice"),
            )
            .await;
        assert!(matches!(
            outcome,
            RouteOutcome::Failed {
                error: DeliveryError::ConnectionClosed(_),
                ..
            }
        ));
    }
}
