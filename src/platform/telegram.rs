use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::payloads::{PinChatMessageSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::model;
use crate::persist::{BoardMessage, PinnedConfigStore, PinnedMessageBoard};
use crate::plugin::{Handler, PostMessageRequest, Receiver};

/// Telegram rejects messages over 4096 characters
const TELEGRAM_MAX_LEN: usize = 4096;
/// Chunk size for outgoing replies, leaving room for a mention
const CHUNK_LEN: usize = 4000;

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

fn parse_message_id(id: &str) -> Result<MessageId> {
    let id = id
        .parse::<i32>()
        .with_context(|| format!("Invalid Telegram message id: {}", id))?;
    Ok(MessageId(id))
}

struct Inner {
    bot: Bot,
    chat_id: ChatId,
    allowed_user_ids: Vec<u64>,
    mention_username: Option<String>,
    handlers: RwLock<Vec<Handler>>,
    shutdown: Mutex<Option<ShutdownToken>>,
}

/// Watches one Telegram chat and replies in it
#[derive(Clone)]
pub struct TelegramReceiver {
    inner: Arc<Inner>,
}

impl TelegramReceiver {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                bot: Bot::new(&config.bot_token),
                chat_id: ChatId(config.chat_id),
                allowed_user_ids: config.allowed_user_ids.clone(),
                mention_username: config
                    .mention_username
                    .clone()
                    .filter(|name| !name.is_empty()),
                handlers: RwLock::new(Vec::new()),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Durable config storage in the pinned messages of the watched chat
    pub fn config_store(&self) -> PinnedConfigStore<TelegramBoard> {
        PinnedConfigStore::new(TelegramBoard {
            bot: self.inner.bot.clone(),
            chat_id: self.inner.chat_id,
        })
    }

    fn handlers(&self) -> Vec<Handler> {
        match self.inner.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => {
                error!("Telegram handler list lock poisoned");
                Vec::new()
            }
        }
    }

    fn accepts(&self, msg: &Message) -> bool {
        if msg.chat.id != self.inner.chat_id {
            return false;
        }
        let Some(user) = msg.from.as_ref() else {
            return false;
        };
        if user.is_bot {
            return false;
        }
        self.inner.allowed_user_ids.is_empty() || self.inner.allowed_user_ids.contains(&user.id.0)
    }
}

#[async_trait]
impl Receiver for TelegramReceiver {
    fn name(&self) -> &str {
        "telegram"
    }

    fn add_handler(&self, handler: Handler) {
        match self.inner.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(_) => error!("Telegram handler list lock poisoned"),
        }
    }

    async fn post_message(&self, request: PostMessageRequest) -> Result<()> {
        let text = match (&self.inner.mention_username, request.mention_sender) {
            (Some(username), true) => format!("@{} {}", username, request.text),
            _ => request.text,
        };

        let mut reply_to = request
            .reply_to
            .as_deref()
            .map(parse_message_id)
            .transpose()?;

        for chunk in split_message(&text, CHUNK_LEN) {
            let mut send = self.inner.bot.send_message(self.inner.chat_id, chunk);
            // only the first chunk is threaded under the original message
            if let Some(id) = reply_to.take() {
                send = send.reply_parameters(ReplyParameters::new(id).allow_sending_without_reply());
            }
            send.await.context("Failed to send Telegram message")?;
        }

        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!("Starting Telegram receiver...");

        let receiver = self.clone();
        let handler = Update::filter_message()
            .filter_map(move |msg: Message| receiver.accepts(&msg).then_some(msg))
            .endpoint(handle_message);

        let mut dispatcher = Dispatcher::builder(self.inner.bot.clone(), handler)
            .dependencies(dptree::deps![self.clone()])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        *self.inner.shutdown.lock().await = Some(dispatcher.shutdown_token());
        tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        self.post_message(PostMessageRequest::new("READY"))
            .await
            .context("Failed to post READY message")
    }

    async fn stop(&self) -> Result<()> {
        let Some(token) = self.inner.shutdown.lock().await.take() else {
            return Ok(());
        };

        match token.shutdown() {
            Ok(done) => {
                done.await;
                info!("Telegram receiver stopped");
            }
            Err(e) => warn!("Telegram dispatcher was not running: {}", e),
        }
        Ok(())
    }
}

async fn handle_message(msg: Message, receiver: TelegramReceiver) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let sender = msg
        .from
        .as_ref()
        .map(|user| user.username.clone().unwrap_or_else(|| user.first_name.clone()))
        .unwrap_or_default();

    info!("Telegram message from {}: {}", sender, text);

    let message = model::Message {
        id: msg.id.0.to_string(),
        timestamp: msg.date,
        content: text.to_string(),
        sender,
    };

    let as_receiver: Arc<dyn Receiver> = Arc::new(receiver.clone());
    for handler in receiver.handlers() {
        handler(message.clone(), as_receiver.clone()).await;
    }

    Ok(())
}

/// Pinned messages of one Telegram chat. Telegram only exposes the most
/// recently pinned message, so at most one message is listed.
#[derive(Clone)]
pub struct TelegramBoard {
    bot: Bot,
    chat_id: ChatId,
}

#[async_trait]
impl PinnedMessageBoard for TelegramBoard {
    fn max_message_len(&self) -> usize {
        TELEGRAM_MAX_LEN
    }

    async fn pinned_messages(&self) -> Result<Vec<BoardMessage>> {
        let chat = self
            .bot
            .get_chat(self.chat_id)
            .await
            .context("Failed to get Telegram chat")?;

        Ok(chat
            .pinned_message
            .and_then(|msg| {
                let content = msg.text()?.to_string();
                Some(BoardMessage {
                    id: msg.id.0.to_string(),
                    timestamp: msg.edit_date().copied().unwrap_or(msg.date),
                    content,
                })
            })
            .into_iter()
            .collect())
    }

    async fn send(&self, content: &str) -> Result<String> {
        let msg = self
            .bot
            .send_message(self.chat_id, content)
            .await
            .context("Failed to send config message")?;
        Ok(msg.id.0.to_string())
    }

    async fn pin(&self, id: &str) -> Result<()> {
        self.bot
            .pin_chat_message(self.chat_id, parse_message_id(id)?)
            .disable_notification(true)
            .await
            .context("Failed to pin config message")?;
        Ok(())
    }

    async fn edit(&self, id: &str, content: &str) -> Result<()> {
        self.bot
            .edit_message_text(self.chat_id, parse_message_id(id)?, content)
            .await
            .context("Failed to edit config message")?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.bot
            .delete_message(self.chat_id, parse_message_id(id)?)
            .await
            .context("Failed to delete config message")?;
        Ok(())
    }
}
