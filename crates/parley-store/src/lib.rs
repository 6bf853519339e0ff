//! # parley-store
//!
//! Document persistence for the Parley chat service: the user-profile
//! document and the channel document, each loaded and replaced as a
//! whole (atomic temp-file rename), plus the typed stores that own them
//! in memory and enforce the mutation rules.

pub mod channels;
pub mod documents;
pub mod users;

mod error;

pub use channels::{ChannelStore, JoinOutcome, MergeReport};
pub use documents::{ChannelDocument, ChannelRecord, DocumentFile, UserDocument, UserProfile};
pub use error::{Result, StoreError};
pub use users::UserStore;
