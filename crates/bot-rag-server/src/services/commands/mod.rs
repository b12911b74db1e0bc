//! Slash-command interpretation.
//!
//! One registry, several providers queried in order. Built-ins come first,
//! so a custom command can never shadow `help`, `learn` or `forget`.

pub mod builtin;
pub mod custom;
pub mod parser;
pub mod registry;

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::utils::error::CoreError;

pub use builtin::BuiltinCommands;
pub use custom::{CustomCommandService, CustomCommands};
pub use parser::{is_command, parse, ParsedCommand};
pub use registry::CommandRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Builtin,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub source: CommandSource,
}

/// Result of running a command. Failure here is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub response: String,
    pub success: bool,
}

impl CommandOutcome {
    pub fn ok(response: impl Into<String>) -> Self {
        Self { response: response.into(), success: true }
    }

    pub fn failed(response: impl Into<String>) -> Self {
        Self { response: response.into(), success: false }
    }
}

/// Everything a handler may need about the invocation.
pub struct CommandContext<'a> {
    pub bot_id: i64,
    pub user_id: i64,
    pub conversation_id: Uuid,
    pub args: &'a str,
    pub registry: &'a CommandRegistry,
}

#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Only infrastructure failures are returned as `Err`.
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<CommandOutcome, CoreError>;
}

/// A source of commands for a bot.
#[async_trait::async_trait]
pub trait CommandProvider: Send + Sync {
    /// Commands this provider offers the bot, in display order.
    async fn list(&self, bot_id: i64) -> Result<Vec<CommandInfo>, CoreError>;

    async fn resolve(&self, bot_id: i64, name: &str) -> Result<Option<Arc<dyn CommandHandler>>, CoreError>;
}
