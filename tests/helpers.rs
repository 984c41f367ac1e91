// tests/helpers.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use misskey_streamer::connection::{
    ConnectionState, Connector, ReconnectPolicy, StreamClient, StreamOptions, Transport,
    TransportEvent,
};
use misskey_streamer::TransportError;

pub const WAIT: Duration = Duration::from_secs(2);
pub const RECONNECT_DELAY: Duration = Duration::from_millis(20);

/// Server side of one mock connection.
///
/// Dropping it closes the connection from the client's point of view.
pub struct MockPeer {
    sent: fmpsc::UnboundedReceiver<String>,
    inbound: fmpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    /// Next frame the client wrote, parsed as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let text = timeout(WAIT, self.sent.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the connection");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Asserts the client writes nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(text)) = timeout(window, self.sent.next()).await {
            panic!("unexpected client frame: {text}");
        }
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        self.inbound
            .unbounded_send(TransportEvent::Frame(text.to_string()))
            .expect("client stream gone");
    }

    pub fn push_error(&self, message: &str) {
        self.inbound
            .unbounded_send(TransportEvent::Error(TransportError::Receive(message.to_string())))
            .expect("client stream gone");
    }
}

/// Connector handing every new connection's server side to the test.
#[derive(Clone)]
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            refusals: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, peer_rx)
    }

    /// Make the next `count` connection attempts fail.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, _endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Box::pin(async { Err(TransportError::Connect("connection refused".to_string())) });
        }

        let (client_tx, sent) = fmpsc::unbounded::<String>();
        let (inbound, client_rx) = fmpsc::unbounded::<TransportEvent>();
        let _ = self.peers.send(MockPeer { sent, inbound });

        Box::pin(async move {
            Ok(Transport {
                sink: Box::pin(client_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
                stream: Box::pin(client_rx),
            })
        })
    }
}

pub fn mock_client() -> (StreamClient, MockConnector, mpsc::UnboundedReceiver<MockPeer>) {
    let (connector, peers) = MockConnector::new();
    let endpoint = Url::parse("wss://misskey.test/streaming?i=token").unwrap();
    let client = StreamClient::with_connector(
        endpoint,
        connector.clone(),
        StreamOptions {
            reconnect: ReconnectPolicy::fixed(RECONNECT_DELAY),
        },
    );
    (client, connector, peers)
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    timeout(WAIT, peers.recv())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("connector dropped")
}

pub async fn wait_for_state(client: &StreamClient, target: ConnectionState) {
    let mut state = client.watch_state();
    timeout(WAIT, state.wait_for(|current| *current == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"))
        .expect("state channel closed");
}

pub fn subscribe_frame(channel: &str, id: &str) -> Value {
    json!({"type": "connect", "body": {"channel": channel, "id": id}})
}

pub fn channel_frame(id: &str, event_type: &str, body: Value) -> Value {
    json!({"type": "channel", "body": {"id": id, "type": event_type, "body": body}})
}
