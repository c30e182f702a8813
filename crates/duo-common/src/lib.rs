//! Wire protocol shared by the duo relay chat server and client.
//!
//! This crate provides:
//! - Length-prefixed frame values ([`frame`])
//! - A `tokio_util` codec over any byte stream ([`codec`])
//! - Protocol words, result codes and message formats ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod frame;
pub mod types;

pub use codec::FrameCodec;
pub use frame::{Frame, FrameError};
pub use types::AuthAction;
