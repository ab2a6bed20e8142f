//! Test doubles for the plugin traits

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{Author, Message, Post};
use crate::persist::DurableBlobStore;
use crate::plugin::{Handler, Plugin, PostMessageRequest, Provider, Receiver, Store};

/// Shared login behaviour: code `bad` is rejected, anything else becomes the
/// plugin's saved config.
fn fake_login(name: &str, config: &Mutex<String>, code: &str) -> Result<String> {
    if code == "bad" {
        anyhow::bail!("invalid code");
    }
    *config.lock().unwrap() = format!("{}:{}", name, code);
    Ok(String::new())
}

pub struct FakeProvider {
    name: String,
    prefix: String,
    failing: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
    inits: Mutex<Vec<String>>,
    config: Mutex<String>,
}

impl FakeProvider {
    /// A provider claiming every URL that starts with `prefix`
    pub fn new(name: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            failing: Mutex::new(HashSet::new()),
            fetched: Mutex::new(Vec::new()),
            inits: Mutex::new(Vec::new()),
            config: Mutex::new(String::new()),
        }
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn set_config(&self, config: &str) {
        *self.config.lock().unwrap() = config.to_string();
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn inits(&self) -> Vec<String> {
        self.inits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, saved: &str) -> Result<()> {
        self.inits.lock().unwrap().push(saved.to_string());
        self.set_config(saved);
        Ok(())
    }

    async fn request_login(&self) -> Result<String> {
        Ok(format!("https://login.example/{}", self.name))
    }

    async fn login(&self, code: &str) -> Result<String> {
        fake_login(&self.name, &self.config, code)
    }

    fn config(&self) -> String {
        self.config.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn check(&self, url: &str) -> bool {
        url.starts_with(&self.prefix)
    }

    async fn get_post(&self, _cancel: CancellationToken, url: &str) -> Result<Post> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            anyhow::bail!("boom");
        }

        let id = url.rsplit('/').next().unwrap_or_default().to_string();
        Ok(Post {
            id,
            provider: self.name.clone(),
            url: url.to_string(),
            author: Author {
                screen_name: "someone".to_string(),
                provider: self.name.clone(),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

pub struct FakeStore {
    name: String,
    failing: Mutex<HashSet<String>>,
    saved: Mutex<Vec<Post>>,
    inits: Mutex<Vec<String>>,
    config: Mutex<String>,
}

impl FakeStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing: Mutex::new(HashSet::new()),
            saved: Mutex::new(Vec::new()),
            inits: Mutex::new(Vec::new()),
            config: Mutex::new(String::new()),
        }
    }

    /// Fail when saving the post with this id
    pub fn fail_on(&self, post_id: &str) {
        self.failing.lock().unwrap().insert(post_id.to_string());
    }

    pub fn set_config(&self, config: &str) {
        *self.config.lock().unwrap() = config.to_string();
    }

    pub fn saved(&self) -> Vec<Post> {
        self.saved.lock().unwrap().clone()
    }

    pub fn inits(&self) -> Vec<String> {
        self.inits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for FakeStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, saved: &str) -> Result<()> {
        self.inits.lock().unwrap().push(saved.to_string());
        self.set_config(saved);
        Ok(())
    }

    async fn request_login(&self) -> Result<String> {
        Ok(format!("https://login.example/{}", self.name))
    }

    async fn login(&self, code: &str) -> Result<String> {
        fake_login(&self.name, &self.config, code)
    }

    fn config(&self) -> String {
        self.config.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn save(&self, post: &Post) -> Result<()> {
        if self.failing.lock().unwrap().contains(&post.id) {
            anyhow::bail!("disk full");
        }
        self.saved.lock().unwrap().push(post.clone());
        Ok(())
    }
}

/// Ordered record of side effects shared between test doubles
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct FakeReceiver {
    name: String,
    handlers: Mutex<Vec<Handler>>,
    posted: Mutex<Vec<PostMessageRequest>>,
    running: Mutex<bool>,
    events: EventLog,
}

impl FakeReceiver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handlers: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            running: Mutex::new(false),
            events: EventLog::default(),
        }
    }

    /// Log of everything posted, as `post <text>`
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Run every registered handler on `msg`
    pub async fn deliver(self: &Arc<Self>, msg: Message) {
        let handlers = self.handlers.lock().unwrap().clone();
        let receiver: Arc<dyn Receiver> = self.clone();
        for handler in handlers {
            handler(msg.clone(), receiver.clone()).await;
        }
    }

    pub fn posted(&self) -> Vec<PostMessageRequest> {
        self.posted.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.posted().into_iter().map(|p| p.text).collect()
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }
}

#[async_trait]
impl Receiver for FakeReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_handler(&self, handler: Handler) {
        self.handlers.lock().unwrap().push(handler);
    }

    async fn post_message(&self, request: PostMessageRequest) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("post {}", request.text));
        self.posted.lock().unwrap().push(request);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        *self.running.lock().unwrap() = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.running.lock().unwrap() = false;
        Ok(())
    }
}

/// Config storage held in memory. Writes are logged as `save config` and can
/// be made to fail.
pub struct MemoryConfigStore {
    blob: Mutex<Vec<u8>>,
    fail_saves: Mutex<bool>,
    events: EventLog,
}

impl MemoryConfigStore {
    pub fn new(events: EventLog) -> Self {
        Self {
            blob: Mutex::new(Vec::new()),
            fail_saves: Mutex::new(false),
            events,
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub fn blob(&self) -> Vec<u8> {
        self.blob.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurableBlobStore for MemoryConfigStore {
    async fn load(&self) -> Result<Vec<u8>> {
        Ok(self.blob())
    }

    async fn save(&self, blob: &[u8]) -> Result<()> {
        self.events.lock().unwrap().push("save config".to_string());
        if *self.fail_saves.lock().unwrap() {
            anyhow::bail!("board unavailable");
        }
        *self.blob.lock().unwrap() = blob.to_vec();
        Ok(())
    }
}
