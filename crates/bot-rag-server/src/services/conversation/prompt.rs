use tracing::debug;

use super::history::HistoryEntry;
use crate::config::PromptsConfig;
use crate::models::chat::ChatMessage;
use crate::models::conversation::MessageRole;
use crate::models::metadata::ContextType;
use crate::services::vector_index::SearchHit;

const MAX_KNOWLEDGE_CHARS: usize = 8_000;

/// Fills the configured templates. Placeholders are `{{KNOWLEDGE}}`,
/// `{{HISTORY}}` and `{{QUESTION}}`.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    answer_template: String,
    condense_template: String,
    greeting_instruction: String,
}

impl PromptBuilder {
    pub fn new(config: &PromptsConfig) -> Self {
        Self {
            answer_template: config.answer_template.clone(),
            condense_template: config.condense_template.clone(),
            greeting_instruction: config.greeting_instruction.clone(),
        }
    }

    pub fn greeting_instruction(&self) -> &str {
        &self.greeting_instruction
    }

    pub fn answer_messages(
        &self,
        documents: &[SearchHit],
        history: &[HistoryEntry],
        question: &str,
    ) -> Vec<ChatMessage> {
        let prompt = self
            .answer_template
            .replace("{{KNOWLEDGE}}", &format_knowledge(documents))
            .replace("{{HISTORY}}", &format_history(history))
            .replace("{{QUESTION}}", question);
        vec![ChatMessage::user(prompt)]
    }

    pub fn condense_messages(&self, history: &[HistoryEntry], question: &str) -> Vec<ChatMessage> {
        let prompt = self
            .condense_template
            .replace("{{HISTORY}}", &format_history(history))
            .replace("{{QUESTION}}", question);
        vec![ChatMessage::user(prompt)]
    }

    /// Opening message of a fresh conversation: the greeting instruction
    /// stands in for the question.
    pub fn greeting_messages(&self, history: &[HistoryEntry]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.greeting_instruction.clone())];
        if !history.is_empty() {
            messages.push(ChatMessage::user(format!(
                "Earlier conversation:\n{}",
                format_history(history)
            )));
        }
        messages
    }
}

pub fn format_knowledge(documents: &[SearchHit]) -> String {
    if documents.is_empty() {
        return "(no relevant knowledge)".to_string();
    }

    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, doc.content.trim()));
        if out.len() > MAX_KNOWLEDGE_CHARS {
            debug!("Knowledge truncated at {} entries", i + 1);
            break;
        }
    }
    out.trim_end().to_string()
}

pub fn format_history(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "(no previous messages)".to_string();
    }

    history
        .iter()
        .map(|entry| {
            let speaker = match entry.role {
                MessageRole::Assistant => "Bot",
                MessageRole::System => "System",
                MessageRole::User => "User",
            };
            match entry.recalled_from {
                Some(context) => format!("{} ({}): {}", speaker, recall_label(context), entry.content),
                None => format!("{}: {}", speaker, entry.content),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn recall_label(context: ContextType) -> &'static str {
    match context {
        ContextType::Bot => "earlier, to a bot",
        ContextType::Direct => "in a direct message",
        ContextType::Group => "in a group chat",
    }
}
