// src/connection/transport.rs
use std::pin::Pin;

use futures::{
    future::{self, BoxFuture},
    sink::{Sink, SinkExt},
    stream::{self, Stream, StreamExt},
};
use log::{debug, warn};
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use url::Url;

use crate::error::TransportError;

/// Path of the Misskey streaming endpoint, relative to the instance origin.
pub const STREAMING_PATH: &str = "streaming";

/// Something the transport reports while it is open.
///
/// The end of the stream is the close event; an `Error` is informational and
/// does not by itself end the connection.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(String),
    Error(TransportError),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// An open duplex connection, split into its writing and reading halves.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports for the connection manager. One call per attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

/// Build the streaming URL from an instance origin.
///
/// `https` becomes `wss`, `http` becomes `ws`, and a bare host is assumed to
/// be served over TLS. The token travels as the `i` query parameter.
pub fn streaming_endpoint(origin: &str, token: &str) -> Result<Url, TransportError> {
    let trimmed = origin.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TransportError::InvalidEndpoint("empty instance URL".to_string()));
    }

    let rewritten = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.to_string()
    } else {
        format!("wss://{trimmed}")
    };

    let mut url = Url::parse(&rewritten)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{trimmed}: {e}")))?;

    let path = format!("{}/{}", url.path().trim_end_matches('/'), STREAMING_PATH);
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("i", token);
    Ok(url)
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let endpoint = endpoint.to_string();

        Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let (write, read) = ws_stream.split();

            let sink = write
                .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into()))))
                .sink_map_err(|e| TransportError::Send(e.to_string()));

            // Control frames are answered by tungstenite itself; only payloads
            // are surfaced. A read error ends the stream after being reported.
            let stream = stream::unfold(Some(read), |state| async move {
                let mut read = state?;
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            return Some((TransportEvent::Frame(text.as_str().to_owned()), Some(read)));
                        }
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => return Some((TransportEvent::Frame(text), Some(read))),
                            Err(_) => warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len()),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Server sent close frame: {:?}", frame);
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let error = TransportError::Receive(e.to_string());
                            return Some((TransportEvent::Error(error), None));
                        }
                        None => return None,
                    }
                }
            });

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}
