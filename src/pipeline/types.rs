//! Shared types for the message pipeline.

use serde::Serialize;

/// What the matcher decided for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    /// A channel rule fired. `response` still carries the `{user}` placeholder.
    ChannelRule { response: String, notify: Vec<String> },
    /// A knowledge base record matched; `answer` is already localized.
    KnowledgeBase { answer: String },
    NoMatch,
}

impl MatchResult {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChannelRule { .. } => "channel_rule",
            Self::KnowledgeBase { .. } => "knowledge_base",
            Self::NoMatch => "no_match",
        }
    }
}

/// What the dispatcher did with one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Dropped without matching (edits, deletions, bot echoes).
    Ignored { reason: String },
    /// Channel rule reply plus direct messages to responsible parties.
    RuleReply {
        replied: bool,
        notified: Vec<String>,
        failed: Vec<String>,
    },
    /// Knowledge base answer.
    KbReply { replied: bool },
    /// Fallback reply.
    Fallback { replied: bool },
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::RuleReply { .. } => "rule_reply",
            Self::KbReply { .. } => "kb_reply",
            Self::Fallback { .. } => "fallback",
        }
    }
}
