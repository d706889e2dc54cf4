//! # duorpc-protocol
//!
//! Wire protocol for duorpc.
//!
//! This crate provides:
//! - The outbound call message (`{ id, rpc, request }`)
//! - The inbound reply envelope (`{ id, response }`) with continuation
//!   classification decided at decode time
//! - Single-shot HTTP body types
//! - Text-frame encode/decode helpers

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode_envelope, encode_call};
pub use error::ProtocolError;
pub use message::{CallMessage, Envelope, HttpError, HttpReply, Reply};
