//! # ride-gateway
//!
//! WebSocket command dispatch and connection routing for live ride-sharing
//! updates.
//!
//! Clients hold a persistent WebSocket open and send request envelopes
//! naming a command, an opaque payload and a `target_id`. The gateway runs
//! the command and delivers the result to whichever client is registered
//! under `target_id`, so a passenger can push a live location straight to
//! their driver.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── Upgrade + identity (ws/handler, auth)
//!     ├── MessageRouter, one per connection (ws/connection)
//!     │
//!     ├── CommandRegistry (domain/)  ──▶  domain handlers (service/)
//!     └── ConnectionRegistry (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod ws;
