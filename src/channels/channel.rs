//! Channel trait and the message types that flow through it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;

/// A file attached to an incoming message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Platform file id.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// Declared media type, e.g. `image/png`.
    pub mimetype: String,
    /// Download reference (private URL on Slack).
    pub url: Option<String>,
}

impl Attachment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mimetype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mimetype: mimetype.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether the declared media type is an image.
    pub fn is_image(&self) -> bool {
        self.mimetype.starts_with("image/")
    }
}

/// A chat message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Local id for log correlation.
    pub id: Uuid,
    /// Connector that produced the message ("slack", "cli").
    pub channel: String,
    /// Platform conversation id (e.g. `C05KM25RM5W`).
    pub channel_id: String,
    /// Author id. Empty for system messages.
    pub user_id: String,
    /// Thread the reply belongs to (Slack `thread_ts`, or the message `ts`).
    pub thread_id: String,
    /// Message text.
    pub text: String,
    /// Platform event subtype (`bot_message`, `message_changed`, ...).
    pub subtype: Option<String>,
    /// Set when a bot authored the message.
    pub bot_id: Option<String>,
    /// Attached files.
    pub attachments: Vec<Attachment>,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            thread_id: String::new(),
            text: text.into(),
            subtype: None,
            bot_id: None,
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_bot_id(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = Some(bot_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// An operator slash command (e.g. `/reloadkb`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    /// Command name including the slash.
    pub command: String,
    /// Arguments after the command.
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    /// Where to post the command reply (Slack `response_url`).
    pub response_url: Option<String>,
}

impl SlashCommand {
    pub fn new(command: impl Into<String>, user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            text: String::new(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            response_url: None,
        }
    }
}

/// Anything a channel hands to the bot loop.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(IncomingMessage),
    Command(SlashCommand),
}

/// Stream of events produced by [`Channel::start`].
pub type EventStream = Pin<Box<dyn Stream<Item = ChannelEvent> + Send>>;

/// A chat platform connector: receives events, posts replies and direct messages.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Connector name for logs.
    fn name(&self) -> &str;

    /// Start listening. Events arrive on the returned stream until shutdown.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Post a message to a conversation, threaded when `thread_id` is given.
    async fn post_message(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> Result<(), ChannelError>;

    /// Send a direct message to a single recipient.
    async fn post_direct_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Fetch the raw bytes of an attachment.
    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError>;

    /// Reply to a slash command.
    async fn respond_command(&self, command: &SlashCommand, text: &str) -> Result<(), ChannelError>;

    /// Link that opens the given thread in the platform client.
    fn deep_link(&self, channel_id: &str, thread_id: &str) -> String;

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
