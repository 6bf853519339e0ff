//! # parley-client
//!
//! Client library for the Parley chat service: a server connection with
//! client-imposed receive deadlines, a durable offline queue, the
//! push-then-pull sync engine, and typed helpers for every server
//! operation. The display layer sits on top of this crate.

pub mod cache;
pub mod connection;
pub mod sync;

mod error;

pub use cache::LocalCache;
pub use connection::Connection;
pub use error::{ClientError, Result};
pub use sync::{ChatClient, ReconcileOutcome, SendOutcome, Timeouts};
