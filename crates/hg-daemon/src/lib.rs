//! hg-daemon library target.
//!
//! Exposes the router, state and startup wiring for integration tests and
//! for the operator CLI. The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod routes;
pub mod state;
pub mod wiring;
