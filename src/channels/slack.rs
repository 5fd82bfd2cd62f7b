//! Slack channel: Socket Mode for events, Web API for replies.
//!
//! Socket Mode hands out a short-lived WebSocket URL (`apps.connections.open`,
//! app-level token). Every envelope received on it must be acknowledged by
//! echoing its `envelope_id`, otherwise Slack redelivers it. Slack also sends
//! `disconnect` frames before rotating the connection; the listener simply
//! opens a new one.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::channels::{Attachment, Channel, ChannelEvent, EventStream, IncomingMessage, SlashCommand};
use crate::error::ChannelError;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// First reconnect delay; doubled on every consecutive failure.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Reconnect delay. Only a socket that reached `hello` counts as healthy.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    /// Delay to wait now; the next one doubles up to `MAX_BACKOFF`.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// Slack connection settings.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-…`) for the Web API and file downloads.
    pub bot_token: SecretString,
    /// App-level token (`xapp-…`) for Socket Mode.
    pub app_token: SecretString,
    /// Timeout for Web API calls and file downloads.
    pub http_timeout: Duration,
}

/// Slack channel: connects through Socket Mode.
pub struct SlackChannel {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn api_url(method: &str) -> String {
        format!("{SLACK_API_BASE}/{method}")
    }

    /// Call a Web API method with the bot token. Slack reports most failures
    /// as HTTP 200 with `"ok": false`, so the body is checked too.
    async fn call_api(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(Self::api_url(method))
            .bearer_auth(self.config.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method} returned {status}: {e}")))?;

        check_ok(method, &data)?;
        Ok(data)
    }
}

/// Map a Web API body with `"ok": false` to an error carrying Slack's reason.
fn check_ok(method: &str, data: &Value) -> Result<(), ChannelError> {
    if data.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    let reason = data
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(ChannelError::SendFailed {
        name: "slack".into(),
        reason: format!("{method}: {reason}"),
    })
}

/// Request a fresh Socket Mode WebSocket URL.
async fn open_connection(client: &reqwest::Client, app_token: &SecretString) -> Result<String, ChannelError> {
    let resp = client
        .post(SlackChannel::api_url("apps.connections.open"))
        .bearer_auth(app_token.expose_secret())
        .send()
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "slack".into(),
            reason: e.to_string(),
        })?;

    let data: Value = resp.json().await.map_err(|e| ChannelError::StartupFailed {
        name: "slack".into(),
        reason: e.to_string(),
    })?;

    check_ok("apps.connections.open", &data)?;
    data.get("url")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ChannelError::InvalidMessage("apps.connections.open returned no url".into()))
}

// ── Socket Mode frames ──────────────────────────────────────────────

/// A decoded Socket Mode frame.
#[derive(Debug)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    /// Anything carrying an `envelope_id`. `event` is `None` for payloads
    /// the bot does not handle (reactions, joins, interactive blocks).
    Envelope {
        envelope_id: String,
        event: Option<ChannelEvent>,
    },
    Other(String),
}

/// Decode one Socket Mode text frame.
pub fn parse_frame(raw: &str) -> Result<SocketFrame, ChannelError> {
    let data: Value =
        serde_json::from_str(raw).map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;

    let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string();
            return Ok(SocketFrame::Disconnect { reason });
        }
        _ => {}
    }

    let Some(envelope_id) = data.get("envelope_id").and_then(Value::as_str) else {
        return Ok(SocketFrame::Other(kind.to_string()));
    };

    let payload = data.get("payload").unwrap_or(&Value::Null);
    let event = match kind {
        "events_api" => payload
            .get("event")
            .and_then(parse_message_event)
            .map(ChannelEvent::Message),
        "slash_commands" => parse_slash_command(payload).map(ChannelEvent::Command),
        _ => None,
    };

    Ok(SocketFrame::Envelope {
        envelope_id: envelope_id.to_string(),
        event,
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Convert a Slack `message` event into an [`IncomingMessage`].
pub fn parse_message_event(event: &Value) -> Option<IncomingMessage> {
    if event.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }

    let channel_id = str_field(event, "channel")?;
    let user_id = str_field(event, "user").unwrap_or_default();
    let text = str_field(event, "text").unwrap_or_default();
    let ts = str_field(event, "ts").unwrap_or_default();
    let thread_id = str_field(event, "thread_ts").unwrap_or(ts);

    let mut msg = IncomingMessage::new("slack", channel_id, user_id, text).with_thread(thread_id);
    msg.subtype = str_field(event, "subtype");
    msg.bot_id = str_field(event, "bot_id");

    if let Some(files) = event.get("files").and_then(Value::as_array) {
        msg.attachments = files
            .iter()
            .map(|f| Attachment {
                id: str_field(f, "id").unwrap_or_default(),
                name: str_field(f, "name").unwrap_or_default(),
                mimetype: str_field(f, "mimetype").unwrap_or_default(),
                url: str_field(f, "url_private_download"),
            })
            .collect();
    }

    Some(msg)
}

/// Convert a `slash_commands` payload into a [`SlashCommand`].
pub fn parse_slash_command(payload: &Value) -> Option<SlashCommand> {
    let command = str_field(payload, "command")?;
    Some(SlashCommand {
        command,
        text: str_field(payload, "text").unwrap_or_default(),
        user_id: str_field(payload, "user_id").unwrap_or_default(),
        channel_id: str_field(payload, "channel_id").unwrap_or_default(),
        response_url: str_field(payload, "response_url"),
    })
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let app_token = SecretString::from(self.config.app_token.expose_secret().to_string());
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut backoff = Backoff::new();

            while !tx.is_closed() {
                let url = match open_connection(&client, &app_token).await {
                    Ok(url) => url,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(retry_in = ?delay, "Slack connection open failed: {e}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                let ws = match connect_async(url.as_str()).await {
                    Ok((ws, _)) => ws,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(retry_in = ?delay, "Slack WebSocket connect failed: {e}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                tracing::info!("Slack channel listening for events...");
                let (mut write, mut read) = ws.split();
                let mut saw_hello = false;

                while let Some(frame) = read.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!("Slack socket error: {e}");
                            break;
                        }
                    };

                    match parse_frame(text.as_str()) {
                        Ok(SocketFrame::Envelope { envelope_id, event }) => {
                            let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
                            if let Err(e) = write.send(Message::Text(ack.into())).await {
                                tracing::warn!(envelope_id = %envelope_id, "Slack ack failed: {e}");
                                break;
                            }
                            if let Some(event) = event
                                && tx.send(event).is_err()
                            {
                                tracing::info!("Slack listener channel closed");
                                return;
                            }
                        }
                        Ok(SocketFrame::Disconnect { reason }) => {
                            tracing::info!(reason = %reason, "Slack requested reconnect");
                            break;
                        }
                        Ok(SocketFrame::Hello) => {
                            tracing::debug!("Slack socket hello");
                            saw_hello = true;
                            backoff.reset();
                        }
                        Ok(SocketFrame::Other(kind)) => {
                            tracing::debug!(kind = %kind, "Ignoring Slack frame");
                        }
                        Err(e) => {
                            tracing::warn!("Unparseable Slack frame: {e}");
                        }
                    }
                }

                // A socket dropped before hello is a failed attempt.
                if !saw_hello && !tx.is_closed() {
                    let delay = backoff.next_delay();
                    tracing::warn!(retry_in = ?delay, "Slack socket closed before hello");
                    tokio::time::sleep(delay).await;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn post_message(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "channel": channel_id,
            "text": text,
        });
        if let Some(ts) = thread_id.filter(|ts| !ts.is_empty()) {
            body["thread_ts"] = Value::String(ts.to_string());
        }
        self.call_api("chat.postMessage", &body).await?;
        Ok(())
    }

    async fn post_direct_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "channel": recipient_id,
            "text": text,
        });
        self.call_api("chat.postMessage", &body)
            .await
            .map_err(|e| ChannelError::NotifyFailed {
                recipient: recipient_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        let download_failed = |reason: String| ChannelError::DownloadFailed {
            file: attachment.id.clone(),
            reason,
        };

        let url = attachment
            .url
            .as_deref()
            .ok_or_else(|| download_failed("no download url".into()))?;

        let resp = self
            .client
            .get(url)
            .bearer_auth(self.config.bot_token.expose_secret())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| download_failed(e.to_string()))?;

        let bytes = resp.bytes().await.map_err(|e| download_failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn respond_command(&self, command: &SlashCommand, text: &str) -> Result<(), ChannelError> {
        let Some(ref response_url) = command.response_url else {
            return self.post_message(&command.channel_id, None, text).await;
        };

        let resp = self
            .client
            .post(response_url)
            .json(&serde_json::json!({
                "response_type": "ephemeral",
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChannelError::SendFailed {
                name: "slack".into(),
                reason: format!("response_url returned {}", resp.status()),
            });
        }
        Ok(())
    }

    fn deep_link(&self, channel_id: &str, thread_id: &str) -> String {
        format!("https://slack.com/app_redirect?channel={channel_id}&message_ts={thread_id}")
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.call_api("auth.test", &serde_json::json!({}))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::StartupFailed {
                name: "slack".into(),
                reason: e.to_string(),
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Slack channel shutting down");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
