// src/monitors/timeline.rs
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::note::Note;
use crate::connection::{ConnectionSignal, StreamClient, Subscription};
use crate::error::panic_message;

/// Channel carrying the notes of the account's home timeline.
pub const HOME_TIMELINE: &str = "homeTimeline";

/// A consumer of timeline notes.
///
/// `initialize` runs once before the monitor starts and `cleanup` once on
/// shutdown; both default to doing nothing.
#[async_trait]
pub trait NoteHandler: Send + Sync {
    /// Used in logs.
    fn name(&self) -> &str;

    async fn handle_note(&self, note: &Note) -> Result<()>;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of handlers that every text note is fanned out to.
///
/// Dispatch is sequential: each handler is awaited before the next one
/// starts, and the next note is not taken until all of them are done. A
/// handler that fails or panics is logged and skipped for that note only.
#[derive(Default)]
pub struct NotePipeline {
    handlers: RwLock<Vec<Arc<dyn NoteHandler>>>,
}

impl NotePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, handler: Arc<dyn NoteHandler>) {
        info!("Registered note handler: {}", handler.name());
        self.handlers.write().push(handler);
    }

    pub fn register_handlers<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn NoteHandler>>,
    {
        for handler in handlers {
            self.register_handler(handler);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn NoteHandler>> {
        self.handlers.read().clone()
    }

    pub async fn dispatch(&self, note: &Note) {
        if !note.has_text() {
            debug!("Skipping note {} without text", note.id);
            return;
        }

        for handler in self.snapshot() {
            let outcome = AssertUnwindSafe(handler.handle_note(note)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Handler \"{}\" failed on note {}: {:#}",
                    handler.name(),
                    note.id,
                    e
                ),
                Err(panic) => error!(
                    "Handler \"{}\" panicked on note {}: {}",
                    handler.name(),
                    note.id,
                    panic_message(panic.as_ref())
                ),
            }
        }
    }

    pub async fn initialize_all(&self) {
        for handler in self.snapshot() {
            if let Err(e) = handler.initialize().await {
                error!("Handler \"{}\" failed to initialize: {:#}", handler.name(), e);
            }
        }
    }

    pub async fn cleanup_all(&self) {
        for handler in self.snapshot() {
            if let Err(e) = handler.cleanup().await {
                error!("Handler \"{}\" failed to clean up: {:#}", handler.name(), e);
            }
        }
    }
}

/// Watches the home timeline and feeds its notes through a [`NotePipeline`].
pub struct TimelineMonitor {
    client: StreamClient,
    pipeline: Arc<NotePipeline>,
    subscription: Option<Subscription>,
    signal_task: Option<JoinHandle<()>>,
}

impl TimelineMonitor {
    pub fn new(client: StreamClient) -> Self {
        Self {
            client,
            pipeline: Arc::new(NotePipeline::new()),
            subscription: None,
            signal_task: None,
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn NoteHandler>) {
        self.pipeline.register_handler(handler);
    }

    pub fn register_handlers<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn NoteHandler>>,
    {
        self.pipeline.register_handlers(handlers);
    }

    pub fn pipeline(&self) -> &Arc<NotePipeline> {
        &self.pipeline
    }

    pub async fn initialize_handlers(&self) {
        self.pipeline.initialize_all().await;
    }

    pub async fn cleanup_handlers(&self) {
        self.pipeline.cleanup_all().await;
    }

    /// Subscribe to the home timeline. Calling it again returns the same
    /// subscription without attaching a second consumer.
    pub fn start(&mut self) -> Subscription {
        if let Some(subscription) = &self.subscription {
            return subscription.clone();
        }

        info!(
            "Starting timeline monitor with {} handler(s)",
            self.pipeline.len()
        );

        let subscription = self.client.use_channel(HOME_TIMELINE);
        let pipeline = Arc::clone(&self.pipeline);
        subscription.on("note", move |payload| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                let note: Note =
                    serde_json::from_value(payload).context("note payload has an unexpected shape")?;
                pipeline.dispatch(&note).await;
                Ok(())
            }
        });

        let mut signals = self.client.signals();
        self.signal_task = Some(tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(ConnectionSignal::Connected) => info!("Timeline stream connected"),
                    Ok(ConnectionSignal::Disconnected) => warn!("Timeline stream disconnected"),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Missed {} connection signal(s)", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        self.subscription = Some(subscription.clone());
        subscription
    }

    /// Close the underlying stream client.
    pub fn dispose(&mut self) {
        self.client.close();
        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
    }
}
