// src/connection/manager.rs
use std::{
    future::pending,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::{future::BoxFuture, sink::SinkExt, stream::StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::Sleep,
};
use url::Url;

use super::frame::OutboundFrame;
use super::registry::ChannelRegistry;
use super::router::route_frame;
use super::subscription::Subscription;
use super::transport::{
    streaming_endpoint, Connector, FrameSink, FrameStream, Transport, TransportEvent,
    WebSocketConnector,
};
use crate::error::{StreamError, TransportError};

/// Default pause between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Lifecycle of the shared connection.
///
/// `Disconnected → Connecting → Open → Disconnected → ...`; `Closed` is
/// terminal and reachable from every state through `StreamClient::close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Broadcast whenever the transport opens or goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    Connected,
    Disconnected,
}

/// How long to wait before reconnecting.
///
/// The default retries forever with a fixed delay. A `multiplier` above 1.0
/// turns it into a growing backoff capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.delay,
            initial_interval: self.delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier.max(1.0),
            max_interval: self.max_delay.max(self.delay),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub reconnect: ReconnectPolicy,
}

// Commands that can be sent to the connection task
#[derive(Debug)]
enum ManagerCommand {
    Connect,
    Close,
}

/// Registry plus the outbound queue of the current connection epoch.
///
/// Kept under one lock so "register, then send if open" and "open, then
/// replay everything registered" cannot interleave.
struct ChannelState {
    registry: ChannelRegistry,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    channels: Mutex<ChannelState>,
    closed: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: broadcast::Sender<ConnectionSignal>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            debug!("Connection state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    fn signal(&self, signal: ConnectionSignal) {
        // No receivers is fine.
        let _ = self.signal_tx.send(signal);
    }
}

fn queue_subscribe(outbound: &mpsc::UnboundedSender<String>, subscription: &Subscription) {
    match OutboundFrame::subscribe(subscription).to_text() {
        Ok(text) => {
            if outbound.send(text).is_err() {
                warn!(
                    "Connection went away before subscribing channel {} ({})",
                    subscription.channel(),
                    subscription.id()
                );
            }
        }
        Err(e) => error!("Failed to encode subscribe frame: {}", e),
    }
}

/// Streaming client: one persistent connection, many channels.
///
/// All clones share the same connection. The background task that owns the
/// transport is spawned on construction, so a Tokio runtime must be running.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl StreamClient {
    /// Client for a Misskey instance using the WebSocket transport.
    pub fn new(instance_url: &str, token: &str, options: StreamOptions) -> Result<Self, StreamError> {
        if token.is_empty() {
            return Err(TransportError::InvalidEndpoint("empty access token".to_string()).into());
        }
        let endpoint = streaming_endpoint(instance_url, token)?;
        Ok(Self::with_connector(endpoint, WebSocketConnector, options))
    }

    /// Client with a custom transport.
    pub fn with_connector<C: Connector>(endpoint: Url, connector: C, options: StreamOptions) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (signal_tx, _) = broadcast::channel(16);

        let shared = Arc::new(Shared {
            channels: Mutex::new(ChannelState {
                registry: ChannelRegistry::default(),
                outbound: None,
            }),
            closed: AtomicBool::new(false),
            state_tx,
            signal_tx,
        });

        let task = ConnectionTask {
            connector: Arc::new(connector),
            endpoint,
            shared: Arc::clone(&shared),
            command_rx,
            backoff: options.reconnect.backoff(),
            fallback_delay: options.reconnect.delay,
        };
        tokio::spawn(task.run());

        Self { shared, command_tx }
    }

    /// Start connecting. No-op while connecting or open.
    pub fn connect(&self) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.command_tx
            .send(ManagerCommand::Connect)
            .map_err(|_| StreamError::Closed)
    }

    /// Subscribe to `channel`, or return the subscription that already exists.
    ///
    /// A new subscription is announced to the server right away when the
    /// connection is open; otherwise a connection attempt is started and the
    /// announcement goes out with the open-time replay. After `close()` the
    /// returned subscription is detached and never receives events.
    pub fn use_channel(&self, channel: &str) -> Subscription {
        let (subscription, created, sent) = {
            let mut channels = self.shared.channels.lock();
            if self.is_closed() {
                warn!("use_channel({}) after close; returning a detached subscription", channel);
                return Subscription::new(channel);
            }

            let (subscription, created) = channels.registry.get_or_insert(channel);
            let mut sent = false;
            if created {
                if let Some(outbound) = &channels.outbound {
                    info!("Subscribing to channel {} ({})", channel, subscription.id());
                    queue_subscribe(outbound, &subscription);
                    sent = true;
                }
            }
            (subscription, created, sent)
        };

        if created && !sent {
            debug!(
                "Channel {} ({}) will be subscribed once the connection opens",
                channel,
                subscription.id()
            );
            if let Err(e) = self.connect() {
                error!("Could not start connection for channel {}: {}", channel, e);
            }
        }

        subscription
    }

    /// Shut the client down for good. Repeated calls do nothing.
    ///
    /// Does not wait for a consumer that is currently running.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("Stream client already closed");
            return;
        }

        {
            let mut channels = self.shared.channels.lock();
            channels.registry.clear();
            channels.outbound = None;
        }
        self.shared.set_state(ConnectionState::Closed);
        let _ = self.command_tx.send(ManagerCommand::Close);
        info!("Stream client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.shared.signal_tx.subscribe()
    }

    /// Snapshot of the active subscriptions in request order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.channels.lock().registry.iter().cloned().collect()
    }
}

/// Reading and writing halves of the open connection.
struct Link {
    sink: FrameSink,
    stream: FrameStream,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

enum LinkEvent {
    Outbound(String),
    Inbound(String),
    Error(TransportError),
    Closed,
}

type PendingAttempt = BoxFuture<'static, Result<Transport, TransportError>>;

struct ConnectionTask {
    connector: Arc<dyn Connector>,
    endpoint: Url,
    shared: Arc<Shared>,
    command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
    backoff: ExponentialBackoff,
    fallback_delay: Duration,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: Option<PendingAttempt> = None;
        let mut link: Option<Link> = None;
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(ManagerCommand::Connect) => {
                        if attempt.is_some() || link.is_some() {
                            debug!("Connect ignored: connection already {:?}", self.shared.state_tx.borrow().clone());
                        } else if !self.is_closed() {
                            reconnect = None;
                            attempt = Some(self.start_attempt());
                        }
                    }
                    Some(ManagerCommand::Close) | None => {
                        reconnect = None;
                        attempt = None;
                        if let Some(mut link) = link.take() {
                            if let Err(e) = link.sink.close().await {
                                debug!("Error while closing transport: {}", e);
                            }
                        }
                        self.shared.set_state(ConnectionState::Closed);
                        break;
                    }
                },

                result = next_attempt(&mut attempt) => {
                    attempt = None;
                    match result {
                        Ok(transport) => link = Some(self.on_open(transport)),
                        Err(e) => {
                            error!("Transport error: {}", e);
                            self.on_close(&mut reconnect);
                        }
                    }
                }

                event = next_link_event(&mut link) => match event {
                    LinkEvent::Outbound(text) => {
                        if let Some(open) = link.as_mut() {
                            if let Err(e) = open.sink.send(text).await {
                                error!("Transport error: {}", e);
                            }
                        }
                    }
                    LinkEvent::Inbound(text) => {
                        let shared = &self.shared;
                        route_frame(&text, |id| shared.channels.lock().registry.find(id)).await;
                    }
                    LinkEvent::Error(e) => error!("Transport error: {}", e),
                    LinkEvent::Closed => {
                        link = None;
                        self.on_close(&mut reconnect);
                    }
                },

                _ = next_tick(&mut reconnect) => {
                    reconnect = None;
                    if !self.is_closed() {
                        attempt = Some(self.start_attempt());
                    }
                }
            }
        }

        info!("Connection task exiting");
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn start_attempt(&self) -> PendingAttempt {
        self.shared.set_state(ConnectionState::Connecting);
        info!(
            "Connecting to streaming endpoint at {}",
            self.endpoint.host_str().unwrap_or("<unknown host>")
        );
        self.connector.connect(&self.endpoint)
    }

    fn on_open(&mut self, transport: Transport) -> Link {
        self.backoff.reset();
        self.shared.set_state(ConnectionState::Open);
        self.shared.signal(ConnectionSignal::Connected);
        info!("Stream connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        {
            let mut channels = self.shared.channels.lock();
            for subscription in channels.registry.iter() {
                info!(
                    "Resubscribing to channel {} ({})",
                    subscription.channel(),
                    subscription.id()
                );
                queue_subscribe(&outbound_tx, subscription);
            }
            channels.outbound = Some(outbound_tx);
        }

        Link {
            sink: transport.sink,
            stream: transport.stream,
            outbound_rx,
        }
    }

    fn on_close(&mut self, reconnect: &mut Option<Pin<Box<Sleep>>>) {
        self.shared.channels.lock().outbound = None;
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.signal(ConnectionSignal::Disconnected);
        warn!("Stream disconnected");

        if self.is_closed() {
            return;
        }

        let delay = self.backoff.next_backoff().unwrap_or(self.fallback_delay);
        info!("Reconnecting in {} ms", delay.as_millis());
        // Replacing the timer cancels any earlier one.
        *reconnect = Some(Box::pin(tokio::time::sleep(delay)));
    }
}

async fn next_attempt(attempt: &mut Option<PendingAttempt>) -> Result<Transport, TransportError> {
    match attempt {
        Some(pending_attempt) => pending_attempt.await,
        None => pending().await,
    }
}

async fn next_tick(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}

async fn next_link_event(link: &mut Option<Link>) -> LinkEvent {
    let Some(link) = link else {
        return pending().await;
    };

    tokio::select! {
        Some(text) = link.outbound_rx.recv() => LinkEvent::Outbound(text),
        event = link.stream.next() => match event {
            Some(TransportEvent::Frame(text)) => LinkEvent::Inbound(text),
            Some(TransportEvent::Error(e)) => LinkEvent::Error(e),
            None => LinkEvent::Closed,
        },
    }
}
