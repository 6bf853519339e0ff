//! The channel store: exclusive owner of the authoritative channel
//! document.
//!
//! Every mutating operation is one load-mutate-save critical section over
//! the whole document behind a single store-wide mutex. There is no
//! per-channel locking; this bounds write concurrency and is a documented
//! scalability ceiling, not an accident.
//!
//! Invariant maintained throughout: each channel's message log is sorted
//! non-decreasing by timestamp after any mutation.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use parley_shared::{EventType, Message, UserStatus, GENERAL_CHANNEL};

use crate::documents::{ChannelDocument, ChannelRecord, DocumentFile};
use crate::error::{Result, StoreError};

/// Outcome of [`ChannelStore::join`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// The channel's host (creator).
    pub host: String,
    /// Whether the user was added to the participant list by this call.
    pub newly_added: bool,
}

/// Outcome of [`ChannelStore::merge_from_client`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Candidates admitted into the log.
    pub added: usize,
    /// Candidates dropped for missing required fields.
    pub discarded: usize,
}

/// Owner of the channel document.
pub struct ChannelStore {
    file: DocumentFile<ChannelDocument>,
    doc: Mutex<ChannelDocument>,
}

impl ChannelStore {
    /// Open the store, loading the document (empty if absent).
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let file = DocumentFile::new(path);
        let doc: ChannelDocument = file.load().await;
        info!(channels = doc.channels.len(), path = %file.path().display(), "channel store opened");
        Self {
            file,
            doc: Mutex::new(doc),
        }
    }

    /// Create a channel hosted by `creator`, who becomes its first
    /// participant.
    pub async fn create(&self, name: &str, creator: &str) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if doc.channels.contains_key(name) {
            return Err(StoreError::ChannelExists(name.to_string()));
        }
        doc.channels
            .insert(name.to_string(), ChannelRecord::created_by(creator));
        self.file.save(&doc).await?;
        info!(channel = name, host = creator, "channel created");
        Ok(())
    }

    /// Names of all channels.
    pub async fn list(&self) -> Vec<String> {
        let doc = self.doc.lock().await;
        doc.channels.keys().cloned().collect()
    }

    /// Delete a channel. Only the host may delete, and "General" is never
    /// deletable — not even by its host.
    pub async fn delete(&self, name: &str, requester: &str) -> Result<()> {
        if name == GENERAL_CHANNEL {
            return Err(StoreError::ProtectedChannel);
        }

        let mut doc = self.doc.lock().await;
        let record = doc
            .channels
            .get(name)
            .ok_or_else(|| StoreError::ChannelNotFound(name.to_string()))?;
        if record.host != requester {
            return Err(StoreError::DeleteForbidden);
        }
        doc.channels.remove(name);
        self.file.save(&doc).await?;
        info!(channel = name, requester, "channel deleted");
        Ok(())
    }

    /// Add `username` to the channel's participants.
    ///
    /// "General" is created implicitly when targeted; any other missing
    /// channel is an error. A non-guest joining for the first time leaves
    /// a `USER_JOINED_CHANNEL` system message in the log.
    pub async fn join(&self, name: &str, username: &str, is_guest: bool) -> Result<JoinOutcome> {
        let mut doc = self.doc.lock().await;
        let record = Self::entry_with_implicit_general(&mut doc, name)?;

        let newly_added = if record.participants.iter().any(|p| p == username) {
            false
        } else {
            record.participants.push(username.to_string());
            true
        };

        if newly_added && !is_guest {
            record.messages.push(Message::system(
                format!("User '{username}' has joined the channel."),
                EventType::UserJoinedChannel,
                Utc::now(),
            ));
            record.sort_log();
        }

        let host = record.host.clone();
        self.file.save(&doc).await?;
        info!(channel = name, username, newly_added, "user joined channel");
        Ok(JoinOutcome { host, newly_added })
    }

    /// Append a user message, stamped with the current UTC time.
    ///
    /// `identity` is the session's authenticated username and must match
    /// the claimed author; the author's live status must permit sending.
    pub async fn save_message(
        &self,
        name: &str,
        author: &str,
        text: &str,
        identity: &str,
        live_status: UserStatus,
    ) -> Result<Message> {
        if author != identity {
            warn!(author, identity, "message save attempt with mismatched identity");
            return Err(StoreError::AuthMismatch);
        }
        if !live_status.may_send_messages() {
            return Err(StoreError::InvalidState(live_status));
        }

        let mut doc = self.doc.lock().await;
        let record = Self::entry_with_implicit_general(&mut doc, name)?;

        let message = Message::user(author, text, Utc::now());
        record.messages.push(message.clone());
        record.sort_log();
        self.file.save(&doc).await?;
        info!(channel = name, author, "message saved");
        Ok(message)
    }

    /// Persist a prebuilt system message (e.g. a livestream rendezvous
    /// notice) into the channel log.
    pub async fn save_system_message(&self, name: &str, message: Message) -> Result<()> {
        let mut doc = self.doc.lock().await;
        let record = Self::entry_with_implicit_general(&mut doc, name)?;
        record.messages.push(message);
        record.sort_log();
        self.file.save(&doc).await?;
        Ok(())
    }

    /// Merge a client's offline queue into the channel log.
    ///
    /// Stricter than `join`/`save_message`: the channel must already
    /// exist. Candidates missing required fields are discarded one by one
    /// (counted, logged); the rest are admitted unless an existing entry
    /// already carries the exact same timestamp. The document is
    /// persisted once, after all admissions.
    pub async fn merge_from_client(
        &self,
        name: &str,
        candidates: &[serde_json::Value],
    ) -> Result<MergeReport> {
        let mut doc = self.doc.lock().await;
        let record = doc
            .channels
            .get_mut(name)
            .ok_or_else(|| StoreError::ChannelNotFound(name.to_string()))?;

        let mut seen: HashSet<_> = record.messages.iter().map(|m| m.timestamp).collect();
        let mut report = MergeReport::default();

        for candidate in candidates {
            let message: Message = match serde_json::from_value(candidate.clone()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(channel = name, error = %e, "discarding malformed sync entry");
                    report.discarded += 1;
                    continue;
                }
            };
            if seen.insert(message.timestamp) {
                record.messages.push(message);
                report.added += 1;
            }
        }

        if report.added > 0 {
            record.sort_log();
            self.file.save(&doc).await?;
        }
        info!(
            channel = name,
            added = report.added,
            discarded = report.discarded,
            "client sync merged"
        );
        Ok(report)
    }

    /// Full log for a reconciliation pull.
    ///
    /// A missing channel yields an empty log rather than an error; an
    /// existing channel is only readable by its participants.
    pub async fn fetch_for_sync(&self, name: &str, requester: &str) -> Result<Vec<Message>> {
        let doc = self.doc.lock().await;
        match doc.channels.get(name) {
            None => Ok(Vec::new()),
            Some(record) => {
                if !record.participants.iter().any(|p| p == requester) {
                    return Err(StoreError::NotParticipant);
                }
                Ok(record.messages.clone())
            }
        }
    }

    /// Participant list of a channel, empty if the channel is missing.
    pub async fn participants(&self, name: &str) -> Vec<String> {
        let doc = self.doc.lock().await;
        doc.channels
            .get(name)
            .map(|r| r.participants.clone())
            .unwrap_or_default()
    }

    fn entry_with_implicit_general<'a>(
        doc: &'a mut ChannelDocument,
        name: &str,
    ) -> Result<&'a mut ChannelRecord> {
        if !doc.channels.contains_key(name) {
            if name == GENERAL_CHANNEL {
                info!("implicitly creating the 'General' channel");
                doc.channels
                    .insert(name.to_string(), ChannelRecord::general());
            } else {
                return Err(StoreError::ChannelNotFound(name.to_string()));
            }
        }
        Ok(doc
            .channels
            .get_mut(name)
            .expect("entry just checked or inserted"))
    }
}
