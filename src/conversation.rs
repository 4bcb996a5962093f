//! Conversation state for one in-flight request.
//!
//! Messages, tool calls, and tool results live only for the duration of a
//! single query; nothing here is persisted or shared across requests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

/// A structured request emitted by the model to invoke a tool method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub recipient: String,
    pub method: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub call_id: Option<String>,
}

/// The outcome of one tool call, folded back into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: None,
            tool_results: Some(results),
        }
    }
}

/// Ordered message sequence scoped to one request.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last assistant message carrying content, scanned from the end.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }

    /// Bound the history: keep every system message plus the most recent
    /// `max_history - system_count` non-system messages, preserving the
    /// relative order within each group.
    pub fn trim(&mut self, max_history: usize) {
        if self.messages.len() <= max_history {
            return;
        }

        let system: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let others: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let keep = max_history.saturating_sub(system.len());
        let recent = others[others.len().saturating_sub(keep)..].to_vec();

        self.messages = system;
        self.messages.extend(recent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_is_noop_under_limit() {
        let mut conv = Conversation::new();
        conv.push(ChatMessage::system("sys"));
        conv.push(ChatMessage::user("q"));
        conv.trim(10);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn trim_keeps_system_and_recent() {
        let mut conv = Conversation::new();
        conv.push(ChatMessage::system("sys"));
        for i in 0..10 {
            conv.push(ChatMessage::user(format!("u{}", i)));
            conv.push(ChatMessage::assistant(format!("a{}", i)));
        }
        conv.trim(5);

        assert_eq!(conv.len(), 5);
        assert_eq!(conv.messages()[0].role, Role::System);
        // The four most recent non-system messages, in order.
        assert_eq!(conv.messages()[1].content, "u8");
        assert_eq!(conv.messages()[2].content, "a8");
        assert_eq!(conv.messages()[3].content, "u9");
        assert_eq!(conv.messages()[4].content, "a9");
    }

    #[test]
    fn last_assistant_content_skips_tool_result_messages() {
        let mut conv = Conversation::new();
        conv.push(ChatMessage::assistant("final answer"));
        conv.push(ChatMessage::tool_results(vec![ToolResult {
            call_id: "c1".into(),
            result: serde_json::json!({}),
            error: None,
        }]));
        assert_eq!(conv.last_assistant_content(), Some("final answer"));
    }
}
