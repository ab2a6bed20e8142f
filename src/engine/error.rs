use thiserror::Error;

/// Why a single seed could not be archived
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("provider {0} is not registered")]
    UnknownProvider(String),

    #[error("failed to get post from {provider}: {cause:#}")]
    Fetch {
        provider: String,
        cause: anyhow::Error,
    },

    #[error("failed to save post to {store}: {cause:#}")]
    Persist { store: String, cause: anyhow::Error },
}

/// Why a control command failed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    MissingArgument(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("failed to request login to {plugin}: {cause:#}")]
    RequestLogin {
        plugin: String,
        cause: anyhow::Error,
    },

    #[error("failed to login to {plugin}: {cause:#}")]
    Login {
        plugin: String,
        cause: anyhow::Error,
    },

    #[error("logged in but failed to save config: {0:#}")]
    SaveConfig(anyhow::Error),
}
