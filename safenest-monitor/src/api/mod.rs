//! HTTP API for controlling the monitor and draining app-layer events.
//!
//! Routes live under `/api/v0`; the OpenAPI document is served at
//! `/api-docs/openapi.json` with Swagger UI at `/swagger-ui`.

pub mod server;
pub mod v0;

pub use server::{SharedState, router, serve};
