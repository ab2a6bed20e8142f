use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::{BoardMessage, PinnedMessageBoard};

#[derive(Default)]
struct BoardState {
    next_id: u64,
    clock: i64,
    messages: Vec<(BoardMessage, bool)>,
    deleted: Vec<String>,
    /// Ids in the order they were (re)pinned, latest last
    pin_order: Vec<String>,
    latest_pin_only: bool,
}

impl BoardState {
    fn record_pin(&mut self, id: &str) {
        self.pin_order.retain(|p| p != id);
        self.pin_order.push(id.to_string());
    }
}

/// In-memory pinned-message board for tests
pub struct MemoryBoard {
    limit: usize,
    state: Mutex<BoardState>,
}

impl MemoryBoard {
    pub fn new() -> Self {
        Self::with_limit(4096)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(BoardState {
                clock: 1_000,
                ..Default::default()
            }),
        }
    }

    /// Add an already pinned message sent at `secs` seconds after the epoch
    pub fn add_pinned(&self, content: &str, secs: i64) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("m{}", state.next_id);
        state.messages.push((
            BoardMessage {
                id: id.clone(),
                timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
                content: content.to_string(),
            },
            true,
        ));
        state.record_pin(&id);
        id
    }

    /// List only the most recently pinned message, like Telegram does
    pub fn show_latest_pin_only(&self) {
        self.state.lock().unwrap().latest_pin_only = true;
    }

    pub fn pin_order(&self) -> Vec<String> {
        self.state.lock().unwrap().pin_order.clone()
    }

    pub fn pinned(&self) -> Vec<BoardMessage> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .iter()
            .filter(|(_, pinned)| *pinned)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl PinnedMessageBoard for MemoryBoard {
    fn max_message_len(&self) -> usize {
        self.limit
    }

    async fn pinned_messages(&self) -> Result<Vec<BoardMessage>> {
        let pinned = self.pinned();
        let state = self.state.lock().unwrap();
        if !state.latest_pin_only {
            return Ok(pinned);
        }

        let latest = state
            .pin_order
            .iter()
            .rev()
            .find_map(|id| pinned.iter().find(|m| &m.id == id));
        Ok(latest.cloned().into_iter().collect())
    }

    async fn send(&self, content: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.clock += 1;
        let id = format!("m{}", state.next_id);
        let timestamp = Utc.timestamp_opt(state.clock, 0).unwrap();
        state.messages.push((
            BoardMessage {
                id: id.clone(),
                timestamp,
                content: content.to_string(),
            },
            false,
        ));
        Ok(id)
    }

    async fn pin(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some((_, pinned)) = state.messages.iter_mut().find(|(m, _)| m.id == id) else {
            anyhow::bail!("message {} not found", id);
        };
        *pinned = true;
        state.record_pin(id);
        Ok(())
    }

    async fn edit(&self, id: &str, content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.messages.iter_mut().find(|(m, _)| m.id == id) {
            Some((m, _)) => {
                m.content = content.to_string();
                Ok(())
            }
            None => anyhow::bail!("message {} not found", id),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.messages.retain(|(m, _)| m.id != id);
        state.pin_order.retain(|p| p != id);
        state.deleted.push(id.to_string());
        Ok(())
    }
}
