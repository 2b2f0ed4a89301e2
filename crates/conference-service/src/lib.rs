//! Conference Coordinator Service Library
//!
//! Server-side coordinator for real-time multi-party conferences. It owns
//! the authoritative state of each conference and is responsible for:
//!
//! - Conference lifecycle (schedule, start, end, cancel, lock, settings)
//! - Membership, waiting room admission and the reconnect grace period
//! - Opaque WebRTC signaling relay between joined peers
//! - Arbitration of shared resources: screen share, recording, whiteboard
//! - Breakout rooms and chat
//!
//! Media never passes through this service.
//!
//! # Architecture
//!
//! The service follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> store/*.rs
//!                                                 -> repositories/*.rs
//! ```
//!
//! Live conference state is held in `store`, one lock per conference.
//! Repositories receive write-behind copies after each committed mutation.
//!
//! # Modules
//!
//! - `collaborators` - Authorization and calendar seams
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Caller identity and HTTP metrics
//! - `models` - Data models
//! - `observability` - Metrics and health probes
//! - `relay` - Peer event channels, stream parking, reconnect tokens
//! - `repositories` - Durable storage (in-memory and Redis)
//! - `routes` - Axum router setup
//! - `services` - The conference coordinator
//! - `store` - In-memory session store

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod relay;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod store;
