// src/orchestrator.rs
use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use serde_json::Value;

use crate::api::ApiClient;
use crate::config::Settings;
use crate::connection::{StreamClient, StreamOptions};
use crate::monitors::{NoteHandler, NoteLogger, TimelineMonitor};

/// Channel carrying account notifications (follows, mentions, reactions...).
const MAIN_CHANNEL: &str = "main";

pub struct Orchestrator {
    api: ApiClient,
    client: StreamClient,
    monitor: TimelineMonitor,
}

impl Orchestrator {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api = ApiClient::new(&settings.misskey.instance_url, &settings.misskey.api_token)
            .context("Failed to build API client")?;

        let client = StreamClient::new(
            &settings.misskey.instance_url,
            &settings.misskey.api_token,
            StreamOptions {
                reconnect: settings.stream.reconnect_policy(),
            },
        )
        .context("Failed to build stream client")?;

        let monitor = TimelineMonitor::new(client.clone());

        Ok(Self {
            api,
            client,
            monitor,
        })
    }

    pub fn register_handler(&self, handler: Arc<dyn NoteHandler>) {
        self.monitor.register_handler(handler);
    }

    // Log which account the token belongs to
    async fn log_account(&self) {
        match self.api.request("i", Value::Null).await {
            Ok(account) => {
                let username = account
                    .get("username")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let display_name = account
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(username);
                let user_id = account.get("id").and_then(Value::as_str).unwrap_or("unknown");

                if display_name != username {
                    info!("Connected account: @{} ({}) ({})", username, display_name, user_id);
                } else {
                    info!("Connected account: @{} ({})", username, user_id);
                }
            }
            Err(e) => error!("Failed to fetch account information: {}", e),
        }
    }

    fn watch_notifications(&self) {
        let main = self.client.use_channel(MAIN_CHANNEL);
        main.on("notification", |notification: Value| async move {
            let kind = notification
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let from = notification
                .pointer("/user/username")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            info!("Notification '{}' from @{}", kind, from);
            Ok(())
        });
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Run until `shutdown` resolves. Handlers are cleaned up and the stream
    /// closed even when waiting for the signal fails.
    pub async fn run_until<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = io::Result<()>>,
    {
        info!("Misskey streamer starting");
        self.log_account().await;

        if self.monitor.pipeline().is_empty() {
            self.monitor.register_handler(Arc::new(NoteLogger::new()));
        }
        self.monitor.initialize_handlers().await;
        self.monitor.start();
        self.watch_notifications();

        info!("Monitors started. Press Ctrl+C to stop...");
        match shutdown.await {
            Ok(()) => info!("Shutdown signal received, stopping monitors..."),
            Err(e) => error!("Failed to wait for the shutdown signal, stopping monitors: {}", e),
        }
        self.monitor.cleanup_handlers().await;
        self.monitor.dispose();

        info!("Stream closed, shutting down gracefully");
        Ok(())
    }
}
