//! # parley-net
//!
//! Wire framing for the Parley chat protocol: an incremental JSON framer
//! that recovers message boundaries from a raw TCP byte stream, and the
//! newline-delimited write helpers both ends use.

pub mod framer;
pub mod wire;

pub use framer::{FrameError, JsonFramer};
pub use wire::{encode_line, write_message};
