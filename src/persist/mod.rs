//! Plugin state persistence.
//!
//! All plugin states are folded into one [`ConfigSnapshot`], serialized to
//! JSON and kept in a single tagged, pinned chat message. The chat platform is
//! abstracted as a [`PinnedMessageBoard`] so the protocol can run against an
//! in-memory board in tests.

#[cfg(test)]
pub mod memory;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Literal prefix identifying the config message among pinned messages
pub const CONFIG_TAG: &str = "CONFIG: ";

/// Saved state of every provider and store, keyed by plugin name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stores: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    /// Record a provider state; empty states are dropped
    pub fn set_provider(&mut self, name: &str, config: String) {
        if !config.is_empty() {
            self.providers.insert(name.to_string(), config);
        }
    }

    /// Record a store state; empty states are dropped
    pub fn set_store(&mut self, name: &str, config: String) {
        if !config.is_empty() {
            self.stores.insert(name.to_string(), config);
        }
    }

    pub fn provider(&self, name: &str) -> &str {
        self.providers.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn store(&self, name: &str) -> &str {
        self.stores.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize config snapshot")
    }

    /// Decode a blob. An empty blob is an empty snapshot.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(blob).context("Failed to parse config snapshot")
    }
}

/// A durable slot holding exactly one blob
#[async_trait]
pub trait DurableBlobStore: Send + Sync {
    /// Returns the stored blob, or an empty vector when nothing was saved yet
    async fn load(&self) -> Result<Vec<u8>>;
    async fn save(&self, blob: &[u8]) -> Result<()>;
}

/// A pinned chat message as seen by the persistence protocol
#[derive(Debug, Clone)]
pub struct BoardMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// The subset of a chat platform needed to keep state in pinned messages
#[async_trait]
pub trait PinnedMessageBoard: Send + Sync {
    /// Platform limit on the length of one message, in characters
    fn max_message_len(&self) -> usize;

    async fn pinned_messages(&self) -> Result<Vec<BoardMessage>>;

    /// Send a message and return its id
    async fn send(&self, content: &str) -> Result<String>;
    async fn pin(&self, id: &str) -> Result<()>;
    async fn edit(&self, id: &str, content: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Keeps a blob in the single tagged pinned message of a board.
///
/// Reads pick the newest tagged pinned message. Writes edit that message in
/// place and pin it again (or create and pin one), then delete any older
/// tagged duplicates left behind by racing writers. Boards that only expose
/// their latest pin can still see the config after someone pins another
/// message, as long as a write happened since.
pub struct PinnedConfigStore<B> {
    board: B,
}

impl<B: PinnedMessageBoard> PinnedConfigStore<B> {
    pub fn new(board: B) -> Self {
        Self { board }
    }

    #[cfg(test)]
    pub fn board(&self) -> &B {
        &self.board
    }

    /// Tagged pinned messages newest first, and whether other pins were seen
    async fn tagged_messages(&self) -> Result<(Vec<BoardMessage>, bool)> {
        let (mut tagged, others): (Vec<BoardMessage>, Vec<BoardMessage>) = self
            .board
            .pinned_messages()
            .await
            .context("Failed to get pinned messages")?
            .into_iter()
            .partition(|m| m.content.starts_with(CONFIG_TAG));

        tagged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok((tagged, !others.is_empty()))
    }
}

#[async_trait]
impl<B: PinnedMessageBoard> DurableBlobStore for PinnedConfigStore<B> {
    async fn load(&self) -> Result<Vec<u8>> {
        let (messages, other_pins) = self.tagged_messages().await?;
        let Some(latest) = messages.first() else {
            if other_pins {
                warn!(
                    "Pinned message is not a config message, saved config may be hidden \
                     behind it; pin the \"{}\" message again to restore it",
                    CONFIG_TAG.trim_end()
                );
            } else {
                debug!("No config message pinned");
            }
            return Ok(Vec::new());
        };

        Ok(latest.content[CONFIG_TAG.len()..].as_bytes().to_vec())
    }

    async fn save(&self, blob: &[u8]) -> Result<()> {
        let body = std::str::from_utf8(blob).context("Config blob is not valid UTF-8")?;
        let content = format!("{}{}", CONFIG_TAG, body);

        let len = content.chars().count();
        let max = self.board.max_message_len();
        if len > max {
            anyhow::bail!("config message is {} characters, limit is {}", len, max);
        }

        let (messages, _) = self.tagged_messages().await?;
        let mut messages = messages.into_iter();

        match messages.next() {
            Some(current) => {
                self.board
                    .edit(&current.id, &content)
                    .await
                    .context("Failed to edit config message")?;
                // keeps the config the latest pin
                if let Err(e) = self.board.pin(&current.id).await {
                    warn!("Failed to re-pin config message {}: {:#}", current.id, e);
                }
            }
            None => {
                let id = self
                    .board
                    .send(&content)
                    .await
                    .context("Failed to send config message")?;
                self.board
                    .pin(&id)
                    .await
                    .context("Failed to pin config message")?;
            }
        }

        for stale in messages {
            if let Err(e) = self.board.delete(&stale.id).await {
                warn!("Failed to delete stale config message {}: {:#}", stale.id, e);
            }
        }

        Ok(())
    }
}
