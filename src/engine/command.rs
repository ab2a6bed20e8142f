use anyhow::Result;
use tracing::{error, info};

use super::error::CommandError;
use super::Engine;
use crate::plugin::{PostMessageRequest, Provider, Receiver, Store};

/// A message is a command if it is the reserved token alone or the token
/// followed by a space.
pub fn is_command(token: &str, content: &str) -> bool {
    content == token
        || content
            .strip_prefix(token)
            .is_some_and(|rest| rest.starts_with(' '))
}

fn help(token: &str) -> String {
    format!(
        "Commands:\n\
         {token} help - Show this message\n\
         {token} request-login <plugin> - Get the login URL of a provider or store\n\
         {token} login <plugin> <code> - Finish logging in with the code you received\n\n\
         Any other message: one URL per line, optionally followed by a category \
         (`-` for none) and tags."
    )
}

/// A provider or store found by name
enum PluginRef<'a> {
    Provider(&'a dyn Provider),
    Store(&'a dyn Store),
}

impl PluginRef<'_> {
    async fn request_login(&self) -> Result<String> {
        match self {
            PluginRef::Provider(p) => p.request_login().await,
            PluginRef::Store(s) => s.request_login().await,
        }
    }

    async fn login(&self, code: &str) -> Result<String> {
        match self {
            PluginRef::Provider(p) => p.login(code).await,
            PluginRef::Store(s) => s.login(code).await,
        }
    }
}

impl Engine {
    pub(super) async fn run_command(
        &self,
        args: &[&str],
        receiver: &dyn Receiver,
    ) -> Result<(), CommandError> {
        let Some(&subcommand) = args.first() else {
            reply(receiver, help(&self.command)).await;
            return Ok(());
        };

        match subcommand {
            "help" => {
                reply(receiver, help(&self.command)).await;
                Ok(())
            }
            "request-login" => {
                let name = *args
                    .get(1)
                    .ok_or(CommandError::MissingArgument("request-login <plugin>"))?;
                let plugin = self.find_plugin(name, receiver).await?;

                info!("Requesting login to {}", name);
                let url = plugin
                    .request_login()
                    .await
                    .map_err(|cause| CommandError::RequestLogin {
                        plugin: name.to_string(),
                        cause,
                    })?;
                reply(receiver, url).await;
                Ok(())
            }
            "login" => {
                let name = *args
                    .get(1)
                    .ok_or(CommandError::MissingArgument("login <plugin> <code>"))?;
                let code = args.get(2).copied().unwrap_or_default();
                let plugin = self.find_plugin(name, receiver).await?;

                info!("Logging in to {}", name);
                let message = plugin
                    .login(code)
                    .await
                    .map_err(|cause| CommandError::Login {
                        plugin: name.to_string(),
                        cause,
                    })?;

                self.save_config()
                    .await
                    .map_err(CommandError::SaveConfig)?;

                if message.is_empty() {
                    reply(receiver, "DONE").await;
                } else {
                    reply(receiver, format!("DONE\n{}", message)).await;
                }
                Ok(())
            }
            other => {
                reply(receiver, "unknown command").await;
                Err(CommandError::UnknownCommand(other.to_string()))
            }
        }
    }

    /// Look a plugin up by exact name, providers first. Replies "not found"
    /// when nothing matches.
    async fn find_plugin(
        &self,
        name: &str,
        receiver: &dyn Receiver,
    ) -> Result<PluginRef<'_>, CommandError> {
        if let Some(provider) = self.providers.iter().find(|p| p.name() == name) {
            return Ok(PluginRef::Provider(provider.as_ref()));
        }
        if let Some(store) = self.stores.iter().find(|s| s.name() == name) {
            return Ok(PluginRef::Store(store.as_ref()));
        }

        reply(receiver, "not found").await;
        Err(CommandError::NotFound(name.to_string()))
    }
}

async fn reply(receiver: &dyn Receiver, text: impl Into<String>) {
    if let Err(e) = receiver.post_message(PostMessageRequest::new(text)).await {
        error!("Failed to post message via {}: {:#}", receiver.name(), e);
    }
}
