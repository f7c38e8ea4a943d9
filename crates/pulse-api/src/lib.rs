//! Pulse — HTTP API library.
//!
//! Exposes the router, application state, configuration and error types so
//! integration tests can build the app without starting a server.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
