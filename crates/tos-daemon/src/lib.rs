//! tos-daemon library target.
//!
//! Exposes the router, state, registry and intake for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;
