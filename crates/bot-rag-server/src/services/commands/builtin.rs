use std::sync::Arc;

use super::{CommandContext, CommandHandler, CommandInfo, CommandOutcome, CommandProvider, CommandSource};
use crate::models::metadata::EmbeddingMetadata;
use crate::services::knowledge_store::KnowledgeStore;
use crate::utils::error::CoreError;

pub const LEARN_SOURCE: &str = "user-command";

struct HelpCommand;

#[async_trait::async_trait]
impl CommandHandler for HelpCommand {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CoreError> {
        let commands = ctx.registry.list(ctx.bot_id).await?;
        let lines: Vec<String> = commands
            .iter()
            .map(|c| format!("/{} - {}", c.name, c.description))
            .collect();
        Ok(CommandOutcome::ok(format!("Available commands:\n{}", lines.join("\n"))))
    }
}

struct LearnCommand {
    knowledge: Arc<KnowledgeStore>,
}

#[async_trait::async_trait]
impl CommandHandler for LearnCommand {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CoreError> {
        if ctx.args.trim().is_empty() {
            return Ok(CommandOutcome::failed(
                "Please tell me what to learn, e.g. /learn The office opens at 9am.",
            ));
        }

        let metadata = EmbeddingMetadata {
            source: Some(LEARN_SOURCE.to_string()),
            user_id: Some(ctx.user_id),
            sender_id: Some(ctx.user_id),
            ..Default::default()
        };
        self.knowledge.add_entry(ctx.bot_id, ctx.args, metadata).await?;
        Ok(CommandOutcome::ok("Got it, I'll remember that."))
    }
}

struct ForgetCommand {
    knowledge: Arc<KnowledgeStore>,
}

#[async_trait::async_trait]
impl CommandHandler for ForgetCommand {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CoreError> {
        let removed = self.knowledge.reset(ctx.bot_id).await?;
        Ok(CommandOutcome::ok(format!(
            "Done. I forgot everything I was taught ({} entries).",
            removed
        )))
    }
}

struct Builtin {
    name: &'static str,
    description: &'static str,
    handler: Arc<dyn CommandHandler>,
}

/// The fixed command set every bot understands.
pub struct BuiltinCommands {
    commands: Vec<Builtin>,
}

impl BuiltinCommands {
    pub fn new(knowledge: Arc<KnowledgeStore>) -> Self {
        let commands = vec![
            Builtin {
                name: "help",
                description: "List the available commands",
                handler: Arc::new(HelpCommand),
            },
            Builtin {
                name: "learn",
                description: "Teach me a fact: /learn <text>",
                handler: Arc::new(LearnCommand { knowledge: knowledge.clone() }),
            },
            Builtin {
                name: "forget",
                description: "Forget everything I was taught",
                handler: Arc::new(ForgetCommand { knowledge }),
            },
        ];
        Self { commands }
    }

    pub fn is_builtin(name: &str) -> bool {
        matches!(name, "help" | "learn" | "forget")
    }
}

#[async_trait::async_trait]
impl CommandProvider for BuiltinCommands {
    async fn list(&self, _bot_id: i64) -> Result<Vec<CommandInfo>, CoreError> {
        Ok(self
            .commands
            .iter()
            .map(|c| CommandInfo {
                name: c.name.to_string(),
                description: c.description.to_string(),
                source: CommandSource::Builtin,
            })
            .collect())
    }

    async fn resolve(&self, _bot_id: i64, name: &str) -> Result<Option<Arc<dyn CommandHandler>>, CoreError> {
        Ok(self
            .commands
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.handler.clone()))
    }
}
