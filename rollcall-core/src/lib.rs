//! # Rollcall Core
//!
//! Delivery pipeline for attendance events: capture stations append events
//! to a durable log, batch committers transcribe them into PostgreSQL, and a
//! best-effort reader tails the same log for live observers.
//!
//! ## Architecture
//!
//! - [`domain`]: events, log entries and the persisted record projection
//! - [`log`]: the [`log::EventLog`] port with Redis stream and in-memory
//!   adapters
//! - [`store`]: the [`store::AttendanceStore`] port with PostgreSQL and
//!   in-memory adapters
//! - [`committer`]: the batch committer worker
//! - [`retry`]: the shared reconnect backoff policy
//!
//! Delivery is at-least-once. Persistence is idempotent on the record
//! identity `(roll_no, date, class_id)`, so a redelivered batch rewrites the
//! same rows.

#![allow(missing_docs)]

pub mod committer;
pub mod domain;
pub mod error;
pub mod log;
pub mod retry;
pub mod store;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{LogError, PipelineError, Result, StoreError};
