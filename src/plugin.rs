use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::model::{Message, Post};

/// Behaviour shared by providers and stores: a name, an opaque saved state
/// and an optional login flow.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Restore state previously returned by [`Plugin::config`].
    /// An empty string means nothing was saved.
    async fn init(&self, _saved: &str) -> Result<()> {
        Ok(())
    }

    /// Start a login flow, returning the URL the user should visit
    async fn request_login(&self) -> Result<String> {
        anyhow::bail!("{} does not support login", self.name())
    }

    /// Finish a login flow with the code the user obtained.
    /// Returns an optional message for the user.
    async fn login(&self, _code: &str) -> Result<String> {
        anyhow::bail!("{} does not support login", self.name())
    }

    /// Opaque state to persist. Empty means there is nothing to persist.
    fn config(&self) -> String {
        String::new()
    }
}

/// Recognizes URLs and fetches posts for them
#[async_trait]
pub trait Provider: Plugin {
    fn check(&self, url: &str) -> bool;

    /// Fetch the post behind `url`. Implementations must stop early when
    /// `cancel` fires.
    async fn get_post(&self, cancel: CancellationToken, url: &str) -> Result<Post>;
}

/// Persists posts. Saving the same post twice must not duplicate anything.
#[async_trait]
pub trait Store: Plugin {
    async fn save(&self, post: &Post) -> Result<()>;
}

/// An outbound chat message
#[derive(Debug, Clone, Default)]
pub struct PostMessageRequest {
    pub text: String,
    pub mention_sender: bool,
    pub reply_to: Option<String>,
}

impl PostMessageRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn reply_to(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    pub fn mention(mut self) -> Self {
        self.mention_sender = true;
        self
    }
}

pub type Handler = Arc<dyn Fn(Message, Arc<dyn Receiver>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A chat transport delivering inbound messages and accepting replies
#[async_trait]
pub trait Receiver: Send + Sync {
    fn name(&self) -> &str;
    fn add_handler(&self, handler: Handler);
    async fn post_message(&self, request: PostMessageRequest) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}
