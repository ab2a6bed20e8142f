mod command;
pub mod error;
#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::model::{Message, Seed};
use crate::persist::{ConfigSnapshot, DurableBlobStore};
use crate::plugin::{Handler, PostMessageRequest, Provider, Receiver, Store};

pub use error::SeedError;

/// Everything the engine is wired to
pub struct EngineOptions {
    pub receivers: Vec<Arc<dyn Receiver>>,
    pub providers: Vec<Arc<dyn Provider>>,
    pub stores: Vec<Arc<dyn Store>>,
    /// Where the plugin config snapshot lives
    pub config_store: Arc<dyn DurableBlobStore>,
    /// Reserved leading token of control commands
    pub command: String,
    /// Parent of the tokens handed to provider fetches
    pub cancel: CancellationToken,
}

/// Routes inbound messages to the command interpreter or the archiving
/// pipeline. Holds no mutable state of its own.
pub struct Engine {
    receivers: Vec<Arc<dyn Receiver>>,
    providers: Vec<Arc<dyn Provider>>,
    stores: Vec<Arc<dyn Store>>,
    config_store: Arc<dyn DurableBlobStore>,
    command: String,
    cancel: CancellationToken,
}

impl Engine {
    /// Wire the engine to its receivers, restore plugin state from the last
    /// saved snapshot and persist the state the plugins ended up with.
    pub async fn new(options: EngineOptions) -> Arc<Self> {
        let engine = Arc::new(Self {
            receivers: options.receivers,
            providers: options.providers,
            stores: options.stores,
            config_store: options.config_store,
            command: options.command,
            cancel: options.cancel,
        });

        for receiver in &engine.receivers {
            receiver.add_handler(handler_for(&engine));
        }

        let snapshot = match engine.load_config().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to load config: {:#}", e);
                ConfigSnapshot::default()
            }
        };

        for provider in &engine.providers {
            info!("Initializing provider {}", provider.name());
            if let Err(e) = provider.init(snapshot.provider(provider.name())).await {
                error!("Failed to init provider {}: {:#}", provider.name(), e);
            }
        }

        for store in &engine.stores {
            info!("Initializing store {}", store.name());
            if let Err(e) = store.init(snapshot.store(store.name())).await {
                error!("Failed to init store {}: {:#}", store.name(), e);
            }
        }

        if let Err(e) = engine.save_config().await {
            error!("Failed to save config: {:#}", e);
        }

        engine
    }

    /// Start every receiver, reporting all failures together
    pub async fn start(&self) -> Result<()> {
        let mut failures = Vec::new();
        for receiver in &self.receivers {
            info!("Starting receiver {}", receiver.name());
            if let Err(e) = receiver.start().await {
                failures.push(format!("{}: {:#}", receiver.name(), e));
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("failed to start receivers: {}", failures.join("; "));
        }
        Ok(())
    }

    /// Stop every receiver, reporting all failures together
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        let mut failures = Vec::new();
        for receiver in &self.receivers {
            info!("Stopping receiver {}", receiver.name());
            if let Err(e) = receiver.stop().await {
                failures.push(format!("{}: {:#}", receiver.name(), e));
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("failed to stop receivers: {}", failures.join("; "));
        }
        Ok(())
    }

    /// Handle one inbound message to completion. Never fails: every plugin
    /// error ends up as a chat reply or a log line.
    pub async fn handle(&self, msg: Message, receiver: Arc<dyn Receiver>) {
        info!(
            "Message {} via {} from {} at {}: {}",
            msg.id,
            receiver.name(),
            msg.sender,
            msg.timestamp.to_rfc3339(),
            msg.content
        );

        if command::is_command(&self.command, &msg.content) {
            let args: Vec<&str> = msg.content.split_whitespace().skip(1).collect();
            if let Err(e) = self.run_command(&args, receiver.as_ref()).await {
                error!("Failed to process command {:?}: {}", args, e);
                post(
                    receiver.as_ref(),
                    PostMessageRequest::new(format!("ERROR: {}", e))
                        .mention()
                        .reply_to(&msg.id),
                )
                .await;
            }
            return;
        }

        let seeds = self.extract_seeds(&msg.content);
        let total = seeds.len();
        if total == 0 {
            info!("No seed found");
            return;
        }

        info!("Found {} seed(s)", total);

        let mut failed = 0;
        for (i, seed) in seeds.iter().enumerate() {
            let index = i + 1;
            info!(
                "Processing seed {}/{}: url={} provider={} category={} tags={:?}",
                index, total, seed.url, seed.provider, seed.category, seed.tags
            );

            post(
                receiver.as_ref(),
                PostMessageRequest::new(format!(
                    "⬇️ {}/{}: (provider={} category={} tags={})",
                    index,
                    total,
                    seed.provider,
                    seed.category,
                    seed.tags.join(",")
                ))
                .reply_to(&msg.id),
            )
            .await;

            match self.process_seed(seed).await {
                Ok(()) => info!("Processed seed {}/{} ({})", index, total, seed.provider),
                Err(e) => {
                    failed += 1;
                    let text = format!("❌ {}/{}: {}", index, total, e);
                    error!("Failed to process seed: {}", text);
                    post(
                        receiver.as_ref(),
                        PostMessageRequest::new(text).mention().reply_to(&msg.id),
                    )
                    .await;
                }
            }
        }

        info!("Done: {} of {} seed(s) failed", failed, total);
        if failed == 0 {
            post(
                receiver.as_ref(),
                PostMessageRequest::new("✅ DONE!").reply_to(&msg.id),
            )
            .await;
        }

        if let Err(e) = self.save_config().await {
            error!("Failed to save config: {:#}", e);
        }
    }

    /// Seeds for every line that starts with a URL some provider claims.
    /// Providers are asked in registration order and the first match wins.
    pub fn extract_seeds(&self, content: &str) -> Vec<Seed> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("https://") || line.starts_with("http://"))
            .filter_map(|line| {
                let url = line.split_once(' ').map_or(line, |(url, _)| url);
                let provider = self.providers.iter().find(|p| p.check(url))?;
                Some(Seed::from_line(url, provider.name(), line))
            })
            .collect()
    }

    /// Fetch one seed and hand the post to every store in order, stopping at
    /// the first store that fails.
    async fn process_seed(&self, seed: &Seed) -> Result<(), SeedError> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == seed.provider)
            .ok_or_else(|| SeedError::UnknownProvider(seed.provider.clone()))?;

        info!("Getting post from {}: {}", provider.name(), seed.url);
        let mut post = provider
            .get_post(self.cancel.child_token(), &seed.url)
            .await
            .map_err(|cause| SeedError::Fetch {
                provider: provider.name().to_string(),
                cause,
            })?;

        post.category = seed.category.clone();
        post.tags = seed.tags.clone();
        debug!("Got post {} by {}", post.id, post.author.screen_name);

        for store in &self.stores {
            info!("Saving post {} to {}", post.id, store.name());
            store.save(&post).await.map_err(|cause| SeedError::Persist {
                store: store.name().to_string(),
                cause,
            })?;
        }

        Ok(())
    }

    /// Persist the current state of every provider and store
    pub async fn save_config(&self) -> Result<()> {
        let mut snapshot = ConfigSnapshot::new(Utc::now());
        for provider in &self.providers {
            snapshot.set_provider(provider.name(), provider.config());
        }
        for store in &self.stores {
            snapshot.set_store(store.name(), store.config());
        }

        let blob = snapshot.encode()?;
        self.config_store
            .save(&blob)
            .await
            .context("Failed to write config")?;

        info!("Saved config");
        Ok(())
    }

    async fn load_config(&self) -> Result<ConfigSnapshot> {
        let blob = self
            .config_store
            .load()
            .await
            .context("Failed to read config")?;
        ConfigSnapshot::decode(&blob)
    }
}

fn handler_for(engine: &Arc<Engine>) -> Handler {
    let engine = Arc::downgrade(engine);
    Arc::new(
        move |msg: Message, receiver: Arc<dyn Receiver>| -> BoxFuture<'static, ()> {
            let engine = engine.clone();
            Box::pin(async move {
                if let Some(engine) = engine.upgrade() {
                    engine.handle(msg, receiver).await;
                }
            })
        },
    )
}

/// Post a reply, logging instead of failing
async fn post(receiver: &dyn Receiver, request: PostMessageRequest) {
    if let Err(e) = receiver.post_message(request).await {
        error!("Failed to post message via {}: {:#}", receiver.name(), e);
    }
}
