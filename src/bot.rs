//! Main event loop.

use std::sync::Arc;

use futures::StreamExt;

use crate::channels::{Channel, ChannelEvent};
use crate::error::Error;
use crate::pipeline::Dispatcher;

/// Owns the connector and the dispatcher; handles one event at a time.
pub struct Bot {
    channel: Arc<dyn Channel>,
    dispatcher: Dispatcher,
}

impl Bot {
    pub fn new(channel: Arc<dyn Channel>, dispatcher: Dispatcher) -> Self {
        Self { channel, dispatcher }
    }

    /// Handle a single event.
    pub async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => {
                self.dispatcher.handle_incoming(&message).await;
            }
            ChannelEvent::Command(command) => {
                if let Err(e) = self.dispatcher.handle_command(&command).await {
                    tracing::error!(command = %command.command, error = %e, "Failed to answer command");
                }
            }
        }
    }

    /// Run until Ctrl+C or the event stream ends.
    pub async fn run(self) -> Result<(), Error> {
        let mut events = self.channel.start().await?;

        if let Err(e) = self.channel.health_check().await {
            tracing::warn!(channel = self.channel.name(), error = %e, "Health check failed");
        }

        tracing::info!(channel = self.channel.name(), "FixBuddy ready and listening");

        loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(e) => e,
                        None => {
                            tracing::info!("Event stream ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.handle_event(event).await;
        }

        if let Err(e) = self.channel.shutdown().await {
            tracing::warn!(error = %e, "Channel shutdown failed");
        }
        Ok(())
    }
}
