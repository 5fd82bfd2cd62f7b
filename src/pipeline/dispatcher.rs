//! Dispatcher: one inbound event in, replies and notifications out.
//!
//! Flow per message:
//! 1. Drop edits, deletions and bot echoes
//! 2. OCR image attachments and append the text
//! 3. `Matcher::match_message()`
//! 4. Reply in thread; for channel rules, DM the responsible parties

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::channels::{Attachment, Channel, IncomingMessage, SlashCommand};
use crate::config::ResponseTemplates;
use crate::error::{ChannelError, Error};
use crate::kb::KnowledgeBaseStore;
use crate::ocr::TextExtractor;
use crate::pipeline::matcher::Matcher;
use crate::pipeline::types::{MatchResult, Outcome};

/// Message subtypes that never get an answer.
pub const IGNORED_SUBTYPES: &[&str] = &["bot_message", "message_changed", "message_deleted"];

/// Slash command that reloads the knowledge base.
pub const RELOAD_COMMAND: &str = "/reloadkb";

pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    matcher: Matcher,
    extractor: Arc<dyn TextExtractor>,
    kb: Arc<KnowledgeBaseStore>,
    templates: ResponseTemplates,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn Channel>,
        matcher: Matcher,
        extractor: Arc<dyn TextExtractor>,
        kb: Arc<KnowledgeBaseStore>,
        templates: ResponseTemplates,
    ) -> Self {
        Self {
            channel,
            matcher,
            extractor,
            kb,
            templates,
        }
    }

    /// Why a message is dropped without matching, if it is.
    pub fn ignore_reason(message: &IncomingMessage) -> Option<String> {
        if let Some(ref subtype) = message.subtype
            && IGNORED_SUBTYPES.contains(&subtype.as_str())
        {
            return Some(format!("subtype {subtype}"));
        }
        if message.bot_id.is_some() {
            return Some("bot echo".into());
        }
        if message.user_id.trim().is_empty() {
            return Some("no user".into());
        }
        None
    }

    /// Handle one message end to end. Never fails: every platform error is
    /// logged and reflected in the outcome.
    pub async fn handle_incoming(&self, message: &IncomingMessage) -> Outcome {
        if let Some(reason) = Self::ignore_reason(message) {
            debug!(channel_id = %message.channel_id, reason = %reason, "Ignoring message");
            return Outcome::Ignored { reason };
        }

        info!(
            id = %message.id,
            channel_id = %message.channel_id,
            user_id = %message.user_id,
            attachments = message.attachments.len(),
            "Handling message"
        );

        let text = self.combined_text(message).await;
        let result = self.matcher.match_message(&message.channel_id, &text).await;
        debug!(id = %message.id, result = result.label(), "Matched");

        let outcome = match result {
            MatchResult::ChannelRule { response, notify } => {
                let reply = fill_user(&response, &message.user_id);
                let replied = self.reply(message, &reply).await;
                let (notified, failed) = self.notify_all(message, &notify).await;
                Outcome::RuleReply {
                    replied,
                    notified,
                    failed,
                }
            }
            MatchResult::KnowledgeBase { answer } => {
                let reply = format!("{}\n{}", self.templates.kb_banner, answer);
                Outcome::KbReply {
                    replied: self.reply(message, &reply).await,
                }
            }
            MatchResult::NoMatch => {
                let reply = fill_user(&self.templates.fallback, &message.user_id);
                Outcome::Fallback {
                    replied: self.reply(message, &reply).await,
                }
            }
        };

        info!(id = %message.id, outcome = outcome.label(), "Message handled");
        outcome
    }

    /// Handle a slash command and answer the invoker.
    pub async fn handle_command(&self, command: &SlashCommand) -> Result<(), ChannelError> {
        info!(
            command = %command.command,
            user_id = %command.user_id,
            channel_id = %command.channel_id,
            "Handling command"
        );

        let reply = match command.command.as_str() {
            RELOAD_COMMAND => match self.kb.reload().await {
                Ok(kb) => format!("🔄 KB reloaded: {} rows", kb.len()),
                Err(e) => {
                    let kb = self.kb.current().await;
                    format!(
                        "⚠️ KB reload failed ({e}). Still serving {} rows loaded {}.",
                        kb.len(),
                        kb.loaded_at().format("%Y-%m-%d %H:%M UTC")
                    )
                }
            },
            other => format!("Unknown command `{other}`. Try `{RELOAD_COMMAND}`."),
        };

        self.channel.respond_command(command, &reply).await
    }

    /// Message text followed by the text of every readable image.
    async fn combined_text(&self, message: &IncomingMessage) -> String {
        if message.attachments.is_empty() {
            return message.text.clone();
        }

        let mut extracted = Vec::new();
        for attachment in &message.attachments {
            if !attachment.is_image() || attachment.url.is_none() {
                continue;
            }
            match self.ocr(attachment).await {
                Ok(text) => extracted.push(text),
                Err(e) => warn!(file = %attachment.name, error = %e, "Skipping attachment"),
            }
        }

        format!("{}\n{}", message.text, extracted.join("\n"))
    }

    async fn ocr(&self, attachment: &Attachment) -> Result<String, Error> {
        let bytes = self.channel.download_attachment(attachment).await?;
        let text = self.extractor.extract_text(&bytes).await?;
        debug!(file = %attachment.name, chars = text.len(), "Extracted text");
        Ok(text)
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> bool {
        let thread = (!message.thread_id.is_empty()).then_some(message.thread_id.as_str());
        match self.channel.post_message(&message.channel_id, thread, text).await {
            Ok(()) => true,
            Err(e) => {
                error!(channel_id = %message.channel_id, error = %e, "Failed to post reply");
                false
            }
        }
    }

    /// DM every recipient concurrently. Returns (notified, failed).
    async fn notify_all(&self, message: &IncomingMessage, recipients: &[String]) -> (Vec<String>, Vec<String>) {
        let link = self.channel.deep_link(&message.channel_id, &message.thread_id);
        let text = self
            .templates
            .notify
            .replace("{channel}", &message.channel_id)
            .replace("{link}", &link);

        let sends = recipients.iter().map(|recipient| {
            let text = &text;
            async move {
                let result = self.channel.post_direct_message(recipient, text).await;
                (recipient.clone(), result)
            }
        });

        let mut notified = Vec::new();
        let mut failed = Vec::new();
        for (recipient, result) in join_all(sends).await {
            match result {
                Ok(()) => notified.push(recipient),
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "Notification failed");
                    failed.push(recipient);
                }
            }
        }
        (notified, failed)
    }
}

fn fill_user(template: &str, user_id: &str) -> String {
    template.replace("{user}", user_id)
}
