#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! # Rampart Server
//!
//! Authoritative multiplayer core of a real-time, top-down two-team
//! tank-battle game. Stateless instances cooperate behind a shared key-value /
//! pub-sub store; one instance per room holds a TTL lease and runs the
//! authoritative 40 Hz simulation while the others act as gateways.

/// Bearer-token verification (HS256 JWT)
pub mod auth;

/// Pub/sub coordination bus and leader election
pub mod bus;

/// Configuration loading and environment variables
pub mod config;

/// Domain error type and HTTP status mapping
pub mod error;

/// Match lifecycle and the authoritative tick loop
pub mod game;

/// Ingress: HTTP surface, WebSocket loop, bus dispatcher
pub mod gateway;

/// Static collision grid
pub mod grid;

/// Structured logging setup
pub mod logging;

/// Wire protocol and shared domain types
pub mod protocol;

/// Process-local player connections
pub mod registry;

/// Lobby state machine
pub mod room;

/// Shared store abstraction and room records
pub mod store;

/// External user-service collaborators
pub mod users;
