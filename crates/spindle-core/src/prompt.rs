//! Rendering chat messages into a single engine prompt

use crate::generation::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maps a message list to the prompt string the engine consumes
pub trait PromptFormatter: Send + Sync {
    fn format(&self, messages: &[ChatMessage]) -> String;
}

/// Named prompt templates selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptTemplate {
    Plain,
    ChatMl,
}

impl PromptTemplate {
    pub fn formatter(self) -> Arc<dyn PromptFormatter> {
        match self {
            PromptTemplate::Plain => Arc::new(PlainFormatter),
            PromptTemplate::ChatMl => Arc::new(ChatMlFormatter),
        }
    }
}

/// `System:` / `Human:` / `Assistant:` transcript ending with an open
/// assistant turn
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl PromptFormatter for PlainFormatter {
    fn format(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let speaker = match message.role {
                ChatRole::System => "System",
                ChatRole::User => "Human",
                ChatRole::Assistant => "Assistant",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push_str("Assistant: ");
        prompt
    }
}

/// ChatML (`<|im_start|>role ... <|im_end|>`) as used by Qwen-family models
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatMlFormatter;

impl PromptFormatter for ChatMlFormatter {
    fn format(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str("<|im_start|>");
            prompt.push_str(message.role.as_str());
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str("<|im_end|>\n");
        }
        prompt.push_str("<|im_start|>assistant\n");
        prompt
    }
}
