use std::sync::Arc;

use tracing::info;

use super::builtin::BuiltinCommands;
use super::parser::is_valid_name;
use super::{CommandContext, CommandHandler, CommandInfo, CommandOutcome, CommandProvider, CommandSource};
use crate::database::{CommandRepository, CustomCommandDefinition, NewCustomCommand};
use crate::utils::error::CoreError;

/// Answers with a stored template.
///
/// Placeholders: `{args}`, `{user_id}`, `{bot_id}`.
struct TemplateCommand {
    template: String,
}

fn render_template(template: &str, ctx: &CommandContext<'_>) -> String {
    template
        .replace("{args}", ctx.args)
        .replace("{user_id}", &ctx.user_id.to_string())
        .replace("{bot_id}", &ctx.bot_id.to_string())
}

#[async_trait::async_trait]
impl CommandHandler for TemplateCommand {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CoreError> {
        Ok(CommandOutcome::ok(render_template(&self.template, ctx)))
    }
}

/// Bot-scoped commands from the repository. Disabled ones are invisible.
pub struct CustomCommands {
    repo: Arc<dyn CommandRepository>,
}

impl CustomCommands {
    pub fn new(repo: Arc<dyn CommandRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait::async_trait]
impl CommandProvider for CustomCommands {
    async fn list(&self, bot_id: i64) -> Result<Vec<CommandInfo>, CoreError> {
        let commands = self
            .repo
            .custom_commands(bot_id)
            .await
            .map_err(CoreError::persistence)?;
        Ok(commands
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| CommandInfo {
                name: c.name,
                description: c.description,
                source: CommandSource::Custom,
            })
            .collect())
    }

    async fn resolve(&self, bot_id: i64, name: &str) -> Result<Option<Arc<dyn CommandHandler>>, CoreError> {
        let found = self
            .repo
            .find_custom_command(bot_id, name)
            .await
            .map_err(CoreError::persistence)?;
        Ok(found.filter(|c| c.enabled).map(|c| {
            Arc::new(TemplateCommand {
                template: c.response_template,
            }) as Arc<dyn CommandHandler>
        }))
    }
}

/// Management of a bot's custom commands.
pub struct CustomCommandService {
    repo: Arc<dyn CommandRepository>,
}

impl CustomCommandService {
    pub fn new(repo: Arc<dyn CommandRepository>) -> Self {
        Self { repo }
    }

    /// Create or replace by (bot, name).
    pub async fn save(&self, bot_id: i64, mut command: NewCustomCommand) -> Result<CustomCommandDefinition, CoreError> {
        command.bot_id = bot_id;
        command.name = command.name.trim().trim_start_matches('/').to_lowercase();

        if !is_valid_name(&command.name) {
            return Err(CoreError::validation(format!(
                "invalid command name '{}': use lower-case letters, digits, '-' or '_'",
                command.name
            )));
        }
        if BuiltinCommands::is_builtin(&command.name) {
            return Err(CoreError::validation(format!(
                "'{}' is a built-in command",
                command.name
            )));
        }
        if command.response_template.trim().is_empty() {
            return Err(CoreError::validation("response_template must not be empty"));
        }

        let saved = self
            .repo
            .upsert_custom_command(&command)
            .await
            .map_err(CoreError::persistence)?;
        info!("Saved custom command /{} for bot {}", saved.name, bot_id);
        Ok(saved)
    }

    /// Includes disabled commands.
    pub async fn list(&self, bot_id: i64) -> Result<Vec<CustomCommandDefinition>, CoreError> {
        self.repo
            .custom_commands(bot_id)
            .await
            .map_err(CoreError::persistence)
    }

    pub async fn set_enabled(&self, bot_id: i64, name: &str, enabled: bool) -> Result<(), CoreError> {
        let name = name.to_lowercase();
        let updated = self
            .repo
            .set_custom_command_enabled(bot_id, &name, enabled)
            .await
            .map_err(CoreError::persistence)?;
        if !updated {
            return Err(CoreError::NotFound(format!("command /{}", name)));
        }
        Ok(())
    }

    pub async fn delete(&self, bot_id: i64, name: &str) -> Result<(), CoreError> {
        let name = name.to_lowercase();
        let deleted = self
            .repo
            .delete_custom_command(bot_id, &name)
            .await
            .map_err(CoreError::persistence)?;
        if !deleted {
            return Err(CoreError::NotFound(format!("command /{}", name)));
        }
        Ok(())
    }
}
