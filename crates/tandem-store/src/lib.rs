//! # tandem-store
//!
//! Durable storage for the chat core, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model,
//! plus a cloneable [`StoreHandle`] that runs those helpers on the blocking
//! worker pool so async callers never stall the runtime.

pub mod database;
pub mod handle;
pub mod memberships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod read_status;
pub mod rooms;
pub mod subscriptions;
pub mod typing;
pub mod users;

mod error;
mod sql;

#[cfg(test)]
mod fixtures;

pub use database::Database;
pub use error::{Result, StoreError};
pub use handle::StoreHandle;
pub use models::*;
pub use messages::ChatOutcome;
pub use read_status::ReadOutcome;
