// src/connection/mod.rs
mod frame;
mod manager;
mod registry;
mod router;
mod subscription;
mod transport;

pub use frame::{ChannelEvent, InboundFrame, OutboundFrame};
pub use manager::{
    ConnectionSignal, ConnectionState, ReconnectPolicy, StreamClient, StreamOptions,
    DEFAULT_RECONNECT_DELAY,
};
pub use router::{route_frame, RouteOutcome};
pub use subscription::{EventCallback, Subscription, SubscriptionId};
pub use transport::{
    streaming_endpoint, Connector, FrameSink, FrameStream, Transport, TransportEvent,
    WebSocketConnector, STREAMING_PATH,
};
