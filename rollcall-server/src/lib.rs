//! # Rollcall Server
//!
//! HTTP and worker front end of the attendance pipeline:
//!
//! - **Ingress gate**: `POST /api/v1/attendance` validates a capture and
//!   appends it to the durable event log
//! - **Live feed**: `GET /api/v1/attendance/live` streams new entries to
//!   WebSocket observers through a single fan-out bridge
//! - **Workers**: `rollcall-server worker` runs batch committers that move
//!   entries from the log into PostgreSQL

pub mod application;
pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
