//! Library crate for party-wheel-back: the session provider (REST + SSE) and
//! the device-side synchronization protocol, exposed for binaries and
//! integration tests.

/// Environment-driven configuration for the provider and sync timings.
pub mod config;
/// Session persistence.
pub mod dao;
/// Wire types shared by the REST surface and the sync clients.
pub mod dto;
/// HTTP-facing service errors.
pub mod error;
/// Axum route trees.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state and push hubs.
pub mod state;
/// Host and controller synchronization protocol.
pub mod sync;
