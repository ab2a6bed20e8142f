//! Builds the configured plugins in a fixed order.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::EngineOptions;
use crate::persist::DurableBlobStore;
use crate::platform::TelegramReceiver;
use crate::plugin::{Provider, Receiver, Store};
use crate::providers::TwitterProvider;
use crate::stores::{DropboxStore, SqliteStore};

/// A receiver plus the durable storage living alongside it
pub struct ReceiverEntry {
    pub receiver: Arc<dyn Receiver>,
    pub config_store: Arc<dyn DurableBlobStore>,
}

type ReceiverCtor = fn(&Config) -> Result<Option<ReceiverEntry>>;
type ProviderCtor = fn(&Config, &reqwest::Client) -> Result<Option<Arc<dyn Provider>>>;
type StoreCtor = fn(&Config, &reqwest::Client) -> Result<Option<Arc<dyn Store>>>;

/// Registration order is dispatch order: the first provider whose `check`
/// matches wins, and stores are saved to in this order.
const RECEIVERS: &[(&str, ReceiverCtor)] = &[("telegram", telegram)];
const PROVIDERS: &[(&str, ProviderCtor)] = &[("twitter", twitter)];
const STORES: &[(&str, StoreCtor)] = &[("sqlite", sqlite), ("dropbox", dropbox)];

fn telegram(config: &Config) -> Result<Option<ReceiverEntry>> {
    let receiver = TelegramReceiver::new(&config.telegram);
    Ok(Some(ReceiverEntry {
        config_store: Arc::new(receiver.config_store()),
        receiver: Arc::new(receiver),
    }))
}

fn twitter(config: &Config, http: &reqwest::Client) -> Result<Option<Arc<dyn Provider>>> {
    Ok(config.twitter.as_ref().map(|twitter| {
        Arc::new(TwitterProvider::new(http.clone(), &twitter.api_base_url)) as Arc<dyn Provider>
    }))
}

fn sqlite(config: &Config, _http: &reqwest::Client) -> Result<Option<Arc<dyn Store>>> {
    let Some(sqlite) = &config.sqlite else {
        return Ok(None);
    };
    let store = SqliteStore::open(&sqlite.database_path)?;
    Ok(Some(Arc::new(store)))
}

fn dropbox(config: &Config, http: &reqwest::Client) -> Result<Option<Arc<dyn Store>>> {
    Ok(config.dropbox.as_ref().map(|dropbox| {
        Arc::new(DropboxStore::new(dropbox.clone(), http.clone())) as Arc<dyn Store>
    }))
}

pub struct PluginRegistry {
    receivers: Vec<ReceiverEntry>,
    providers: Vec<Arc<dyn Provider>>,
    stores: Vec<Arc<dyn Store>>,
}

impl PluginRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::new();

        let mut receivers = Vec::new();
        for (name, ctor) in RECEIVERS {
            match ctor(config)? {
                Some(entry) => {
                    info!("Registered receiver {}", name);
                    receivers.push(entry);
                }
                None => debug!("Receiver {} not configured", name),
            }
        }

        let mut providers = Vec::new();
        for (name, ctor) in PROVIDERS {
            match ctor(config, &http)? {
                Some(provider) => {
                    info!("Registered provider {}", name);
                    providers.push(provider);
                }
                None => debug!("Provider {} not configured", name),
            }
        }

        let mut stores = Vec::new();
        for (name, ctor) in STORES {
            match ctor(config, &http)? {
                Some(store) => {
                    info!("Registered store {}", name);
                    stores.push(store);
                }
                None => debug!("Store {} not configured", name),
            }
        }

        Ok(Self {
            receivers,
            providers,
            stores,
        })
    }

    /// Hand the plugins to the engine. The first receiver's storage holds the
    /// config snapshot.
    pub fn into_engine_options(
        self,
        command: String,
        cancel: CancellationToken,
    ) -> Result<EngineOptions> {
        let Some(main) = self.receivers.first() else {
            anyhow::bail!("no receivers configured");
        };
        let config_store = main.config_store.clone();

        Ok(EngineOptions {
            receivers: self.receivers.into_iter().map(|e| e.receiver).collect(),
            providers: self.providers,
            stores: self.stores,
            config_store,
            command,
            cancel,
        })
    }
}
