//! CLI channel: stdin/stdout REPL for local testing.
//!
//! Every line is a message posted in one fixed channel id, so channel rules
//! can be exercised without a chat workspace. Lines starting with `/` are
//! treated as slash commands (`/reloadkb`).

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Attachment, Channel, ChannelEvent, EventStream, IncomingMessage, SlashCommand};
use crate::error::ChannelError;

/// User id attached to every CLI message.
pub const CLI_USER: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    channel_id: String,
}

impl CliChannel {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
        }
    }
}

fn is_quit(line: &str) -> bool {
    matches!(line.trim(), "/quit" | "/exit")
}

/// Turn one input line into a channel event. Blank lines yield nothing.
pub fn parse_line(channel_id: &str, line: &str, seq: u64) -> Option<ChannelEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('/') {
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        let mut cmd = SlashCommand::new(command, CLI_USER, channel_id);
        cmd.text = args.trim().to_string();
        return Some(ChannelEvent::Command(cmd));
    }

    let msg = IncomingMessage::new("cli", channel_id, CLI_USER, line).with_thread(seq.to_string());
    Some(ChannelEvent::Message(msg))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let channel_id = self.channel_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();
            let mut seq: u64 = 0;

            eprint!("[{channel_id}] > ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if is_quit(&line) => break,
                    Ok(Some(line)) => {
                        seq += 1;
                        let Some(event) = parse_line(&channel_id, &line, seq) else {
                            eprint!("[{channel_id}] > ");
                            continue;
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn post_message(
        &self,
        _channel_id: &str,
        _thread_id: Option<&str>,
        text: &str,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", text);
        eprint!("[{}] > ", self.channel_id);
        Ok(())
    }

    async fn post_direct_message(&self, recipient_id: &str, text: &str) -> Result<(), ChannelError> {
        eprintln!("✉️  DM to {}: {}", recipient_id, text);
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::DownloadFailed {
            file: attachment.id.clone(),
            reason: "the CLI channel has no attachments".into(),
        })
    }

    async fn respond_command(&self, _command: &SlashCommand, text: &str) -> Result<(), ChannelError> {
        eprintln!("ℹ️  {}", text);
        eprint!("[{}] > ", self.channel_id);
        Ok(())
    }

    fn deep_link(&self, channel_id: &str, thread_id: &str) -> String {
        format!("cli://{channel_id}/{thread_id}")
    }
}
