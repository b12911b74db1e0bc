use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::parser::parse;
use super::{CommandContext, CommandInfo, CommandOutcome, CommandProvider};
use crate::utils::error::CoreError;

pub struct CommandRegistry {
    providers: Vec<Arc<dyn CommandProvider>>,
}

impl CommandRegistry {
    /// Providers are consulted in the given order; the first match wins.
    pub fn new(providers: Vec<Arc<dyn CommandProvider>>) -> Self {
        Self { providers }
    }

    /// Every command the bot can run, each name once, in provider order.
    pub async fn list(&self, bot_id: i64) -> Result<Vec<CommandInfo>, CoreError> {
        let mut seen = HashSet::new();
        let mut commands = Vec::new();
        for provider in &self.providers {
            for info in provider.list(bot_id).await? {
                if seen.insert(info.name.clone()) {
                    commands.push(info);
                }
            }
        }
        Ok(commands)
    }

    /// Run `input` if it is a command. `None` means it was not command-shaped.
    pub async fn interpret(
        &self,
        bot_id: i64,
        user_id: i64,
        conversation_id: Uuid,
        input: &str,
    ) -> Result<Option<CommandOutcome>, CoreError> {
        let Some(parsed) = parse(input) else {
            return Ok(None);
        };

        for provider in &self.providers {
            if let Some(handler) = provider.resolve(bot_id, &parsed.name).await? {
                debug!("Executing /{} for bot {}", parsed.name, bot_id);
                let ctx = CommandContext {
                    bot_id,
                    user_id,
                    conversation_id,
                    args: &parsed.args,
                    registry: self,
                };
                let outcome = handler.execute(&ctx).await?;
                info!(
                    "Command /{} for bot {} finished (success={})",
                    parsed.name, bot_id, outcome.success
                );
                return Ok(Some(outcome));
            }
        }

        debug!("Unknown command /{} for bot {}", parsed.name, bot_id);
        Ok(Some(CommandOutcome::failed(format!(
            "Unknown command /{}. Type /help to see the available commands.",
            parsed.name
        ))))
    }
}
