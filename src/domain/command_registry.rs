//! Command registry: maps command names to typed handlers.
//!
//! Each registration supplies its own decode step, either the default
//! [`decode_payload`] for any `DeserializeOwned` type or an explicit
//! function through [`CommandRegistry::register_raw`]. Handlers are
//! type-erased behind a boxed closure that decodes, runs the handler and
//! re-encodes the result as JSON.
//!
//! The table is normally filled once at startup and only read afterwards.
//! Late registration is still allowed; it goes through the same
//! `RwLock` and the lock is never held while a handler runs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{DispatchContext, DispatchResponse};
use crate::error::DispatchError;

/// Failures raised after the payload has been decoded.
enum Failure {
    Handler(anyhow::Error),
    Encode(serde_json::Error),
}

type HandlerFuture = BoxFuture<'static, Result<Value, Failure>>;

type BoxedHandler =
    Box<dyn Fn(Value, DispatchContext) -> Result<HandlerFuture, serde_json::Error> + Send + Sync>;

struct CommandEntry {
    payload_type: &'static str,
    handler: BoxedHandler,
}

/// Decodes an opaque payload into `P`.
///
/// A JSON string whose contents are themselves a JSON document of shape
/// `P` is unwrapped first, so `"\"hi\""` decodes to `"hi"`. Anything else
/// is decoded directly from the value.
///
/// # Errors
///
/// Returns the [`serde_json::Error`] of the direct decode when neither
/// form matches `P`.
pub fn decode_payload<P: DeserializeOwned>(payload: Value) -> Result<P, serde_json::Error> {
    if let Value::String(text) = &payload
        && let Ok(decoded) = serde_json::from_str::<P>(text)
    {
        return Ok(decoded);
    }
    serde_json::from_value(payload)
}

/// Name → handler table consulted by every connection.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, Arc<CommandEntry>>>,
    handler_timeout: Option<Duration>,
}

impl CommandRegistry {
    /// Creates an empty registry with no handler deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            handler_timeout: None,
        }
    }

    /// Bounds every handler invocation by `timeout`.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Registers `handler` under `name`, decoding payloads with
    /// [`decode_payload`]. An existing entry with the same name is
    /// replaced.
    pub fn register<P, R, F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_raw(name, decode_payload::<P>, handler);
    }

    /// Registers `handler` under `name` with an explicit decode step.
    /// An existing entry with the same name is replaced.
    pub fn register_raw<P, R, D, F, Fut>(&self, name: impl Into<String>, decode: D, handler: F)
    where
        P: Send + 'static,
        R: Serialize + Send + 'static,
        D: Fn(Value) -> Result<P, serde_json::Error> + Send + Sync + 'static,
        F: Fn(P, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = name.into();
        let boxed: BoxedHandler = Box::new(move |payload, ctx| {
            let decoded = decode(payload)?;
            let fut = handler(decoded, ctx);
            Ok(async move {
                let result = fut.await.map_err(Failure::Handler)?;
                serde_json::to_value(result).map_err(Failure::Encode)
            }
            .boxed())
        });
        let entry = Arc::new(CommandEntry {
            payload_type: std::any::type_name::<P>(),
            handler: boxed,
        });

        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        if commands.insert(name.clone(), entry).is_some() {
            tracing::warn!(command = %name, "command handler replaced");
        } else {
            tracing::debug!(command = %name, "command registered");
        }
    }

    /// Runs the command and folds every failure into an error response.
    ///
    /// Never fails: unknown commands, undecodable payloads, handler
    /// errors, panics and timeouts all come back as
    /// [`super::Status::Error`] with `null` data. The cause is logged.
    pub async fn dispatch(&self, name: &str, payload: Value, ctx: DispatchContext) -> DispatchResponse {
        tracing::info!(command = name, identity = %ctx.identity(), "dispatching command");
        match self.try_dispatch(name, payload, ctx).await {
            Ok(data) => DispatchResponse::success(name, data),
            Err(err) => {
                tracing::warn!(command = name, error = %err, "dispatch failed");
                DispatchResponse::error(name)
            }
        }
    }

    /// Runs the command, surfacing the precise failure.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::CommandNotFound`] if `name` is not registered.
    /// - [`DispatchError::PayloadDecode`] if `payload` does not match the
    ///   registered shape. The handler is not invoked.
    /// - [`DispatchError::Handler`] if the handler returns an error.
    /// - [`DispatchError::HandlerPanicked`] if the decode step or the
    ///   handler panics, before or after returning its future.
    /// - [`DispatchError::HandlerTimeout`] if the configured deadline
    ///   expires.
    /// - [`DispatchError::ResultEncode`] if the result cannot be encoded.
    pub async fn try_dispatch(
        &self,
        name: &str,
        payload: Value,
        ctx: DispatchContext,
    ) -> Result<Value, DispatchError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| DispatchError::CommandNotFound(name.to_string()))?;

        // Decoding and the synchronous part of the handler run here, outside
        // the future guarded below.
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(payload, ctx)))
            .map_err(|_| DispatchError::HandlerPanicked(name.to_string()))?;
        let fut = started.map_err(|source| DispatchError::PayloadDecode {
            command: name.to_string(),
            source,
        })?;
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let outcome = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded).await.map_err(|_| {
                DispatchError::HandlerTimeout {
                    command: name.to_string(),
                    timeout_ms: limit.as_millis(),
                }
            })?,
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Failure::Handler(source))) => Err(DispatchError::Handler {
                command: name.to_string(),
                source,
            }),
            Ok(Err(Failure::Encode(source))) => Err(DispatchError::ResultEncode {
                command: name.to_string(),
                source,
            }),
            Err(_) => Err(DispatchError::HandlerPanicked(name.to_string())),
        }
    }

    /// Returns `true` if a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Returns the Rust type name of the payload `name` decodes into.
    #[must_use]
    pub fn payload_type(&self, name: &str) -> Option<&'static str> {
        self.lookup(name).map(|entry| entry.payload_type)
    }

    /// Returns all registered command names, sorted.
    #[must_use]
    pub fn command_names(&self) -> Vec<String> {
        let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = commands.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no command is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str) -> Option<Arc<CommandEntry>> {
        let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
        commands.get(name).map(Arc::clone)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.command_names())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::domain::{Status, cancellation_pair};

    #[derive(Debug, Deserialize, Serialize)]
    struct Point {
        latitude: f64,
        longitude: f64,
    }

    fn echo_registry() -> CommandRegistry {
        let registry = CommandRegistry::new();
        registry.register("echo", |text: String, _ctx| async move { Ok(text) });
        registry
    }

    #[tokio::test]
    async fn dispatch_returns_handler_result() {
        let registry = echo_registry();
        let resp = registry
            .dispatch("echo", json!("hi"), DispatchContext::detached("alice"))
            .await;
        assert_eq!(resp, DispatchResponse::success("echo", json!("hi")));
    }

    #[tokio::test]
    async fn embedded_json_payload_is_unwrapped() {
        let registry = echo_registry();
        let resp = registry
            .dispatch("echo", json!("\"hi\""), DispatchContext::detached("alice"))
            .await;
        assert_eq!(resp.data, json!("hi"));
    }

    #[tokio::test]
    async fn struct_payload_decodes_from_object_or_text() {
        let registry = CommandRegistry::new();
        registry.register("where", |p: Point, _ctx| async move { Ok(p) });

        let direct = registry
            .dispatch(
                "where",
                json!({"latitude": 1.5, "longitude": -2.0}),
                DispatchContext::detached("a"),
            )
            .await;
        assert!(direct.is_success());

        let embedded = registry
            .dispatch(
                "where",
                json!(r#"{"latitude": 1.5, "longitude": -2.0}"#),
                DispatchContext::detached("a"),
            )
            .await;
        assert_eq!(embedded.data, json!({"latitude": 1.5, "longitude": -2.0}));
    }

    #[tokio::test]
    async fn unknown_command_is_error_with_null_data() {
        let registry = echo_registry();
        let resp = registry
            .dispatch("nonexistent", json!({"x": 1}), DispatchContext::detached("bob"))
            .await;
        assert_eq!(resp.command, "nonexistent");
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.data, Value::Null);

        let err = registry
            .try_dispatch("nonexistent", Value::Null, DispatchContext::detached("bob"))
            .await;
        assert!(matches!(err, Err(DispatchError::CommandNotFound(name)) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn decode_failure_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CommandRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register("where", move |p: Point, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(p) }
        });

        let err = registry
            .try_dispatch("where", json!({"latitude": "north"}), DispatchContext::detached("a"))
            .await;
        assert!(matches!(err, Err(DispatchError::PayloadDecode { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_is_not_leaked() {
        let registry = CommandRegistry::new();
        registry.register("fail", |_: Value, _ctx| async move {
            Err::<(), _>(anyhow::anyhow!("secret database detail"))
        });

        let resp = registry
            .dispatch("fail", Value::Null, DispatchContext::detached("a"))
            .await;
        assert_eq!(resp, DispatchResponse::error("fail"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_error() {
        let registry = CommandRegistry::new();
        registry.register("boom", |_: Value, _ctx| async move {
            if true {
                panic!("handler bug");
            }
            Ok(())
        });

        let err = registry
            .try_dispatch("boom", Value::Null, DispatchContext::detached("a"))
            .await;
        assert!(matches!(err, Err(DispatchError::HandlerPanicked(_))));
    }

    #[tokio::test]
    async fn panics_before_the_future_is_built_become_errors() {
        let registry = Arc::new(echo_registry());
        registry.register(
            "boom",
            |_: Value, _ctx| -> std::future::Ready<anyhow::Result<()>> { panic!("handler bug") },
        );
        registry.register_raw(
            "bad_decode",
            |_: Value| -> Result<(), serde_json::Error> { panic!("decoder bug") },
            |(), _ctx| async move { Ok(()) },
        );

        for name in ["boom", "bad_decode"] {
            let inner = Arc::clone(&registry);
            let task = tokio::spawn(async move {
                inner
                    .dispatch(name, Value::Null, DispatchContext::detached("a"))
                    .await
            });
            let Ok(resp) = task.await else {
                panic!("dispatch of {name} escaped with a panic");
            };
            assert_eq!(resp, DispatchResponse::error(name));
        }

        let err = registry
            .try_dispatch("boom", Value::Null, DispatchContext::detached("a"))
            .await;
        assert!(matches!(err, Err(DispatchError::HandlerPanicked(_))));

        let resp = registry
            .dispatch("echo", json!("still up"), DispatchContext::detached("a"))
            .await;
        assert_eq!(resp.data, json!("still up"));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let registry = CommandRegistry::new().with_handler_timeout(Duration::from_millis(20));
        registry.register("slow", |_: Value, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        let err = registry
            .try_dispatch("slow", Value::Null, DispatchContext::detached("a"))
            .await;
        assert!(matches!(err, Err(DispatchError::HandlerTimeout { timeout_ms: 20, .. })));
    }

    #[tokio::test]
    async fn handler_observes_cancellation() {
        let registry = CommandRegistry::new();
        registry.register("wait", |_: Value, ctx: DispatchContext| async move {
            ctx.cancellation().cancelled().await;
            Ok("cancelled")
        });

        let (trigger, signal) = cancellation_pair();
        let ctx = DispatchContext::new("a".into(), uuid::Uuid::new_v4(), signal);
        trigger.cancel();
        let resp = registry.dispatch("wait", Value::Null, ctx).await;
        assert_eq!(resp.data, json!("cancelled"));
    }

    #[tokio::test]
    async fn re_registration_overwrites() {
        let registry = echo_registry();
        registry.register("echo", |_: Value, _ctx| async move { Ok("second") });
        assert_eq!(registry.len(), 1);

        let resp = registry
            .dispatch("echo", json!("hi"), DispatchContext::detached("a"))
            .await;
        assert_eq!(resp.data, json!("second"));
    }

    #[test]
    fn explicit_decoder_is_used() {
        let registry = CommandRegistry::new();
        registry.register_raw(
            "ride_id",
            |v: Value| serde_json::from_value::<i32>(v.get("id").cloned().unwrap_or_default()),
            |id: i32, _ctx| async move { Ok(id) },
        );
        assert!(registry.contains("ride_id"));
        assert_eq!(registry.payload_type("ride_id"), Some("i32"));
        assert_eq!(registry.command_names(), vec!["ride_id".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_dispatch_and_late_registration() {
        let registry = Arc::new(echo_registry());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    registry.register(format!("late_{i}"), |v: Value, _ctx| async move { Ok(v) });
                    true
                } else {
                    registry
                        .dispatch("echo", json!("x"), DispatchContext::detached("a"))
                        .await
                        .is_success()
                }
            }));
        }
        for task in tasks {
            let Ok(ok) = task.await else {
                panic!("task failed");
            };
            assert!(ok);
        }
        assert_eq!(registry.len(), 9);
    }
}
