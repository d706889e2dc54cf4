//! # duorpc-client
//!
//! Dual-transport RPC client.
//!
//! This crate provides:
//! - A WebSocket session with automatic reconnection
//! - A correlation table matching inbound replies to outstanding calls,
//!   including multi-reply follow-up chains
//! - A single-shot HTTP transport used whenever no socket is connected

pub mod client;
pub mod error;
pub mod http;
pub mod session;
pub mod table;

pub use client::{Client, ClientConfig, Endpoint};
pub use error::ClientError;
pub use session::{CallChain, Session};
pub use table::{CallInfo, FollowUp, PendingTable};
