//! # tandem-server
//!
//! Real-time chat server for Tandem.
//!
//! This crate provides:
//! - **Connection gateway** that authenticates WebSocket upgrades and binds
//!   each connection to a room session
//! - **Room sessions** that turn client events into persisted messages,
//!   typing indicators and read receipts
//! - **Broadcast hub** that fans events out to every live connection in a
//!   room over bounded per-connection queues
//! - **Presence tracking** with per-room online counts
//! - **REST API** (axum) for health checks, room creation, history and
//!   subscription administration
//! - **Rate limiting** per client IP and per user

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod presence;
pub mod rate_limit;
pub mod session;
pub mod subscription;
