// src/connection/router.rs
use log::{debug, info, trace, warn};

use super::frame::InboundFrame;
use super::subscription::{Subscription, SubscriptionId};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// Well-formed channel frame whose id matches no live subscription.
    UnknownSubscription,
    Malformed,
    Liveness,
    Unrecognized,
}

/// Parse one text frame and hand it to the subscription that owns it.
///
/// Nothing here returns an error: malformed frames and routing misses are
/// logged and dropped so one bad frame never stalls the stream. Delivery is
/// awaited, so the caller does not read the next frame until every consumer
/// of this one has finished.
pub async fn route_frame<F>(text: &str, lookup: F) -> RouteOutcome
where
    F: Fn(SubscriptionId) -> Option<Subscription>,
{
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping malformed frame ({}): {}", e, text);
            return RouteOutcome::Malformed;
        }
    };

    match frame {
        InboundFrame::Channel(event) => {
            let Some(subscription) = SubscriptionId::parse(&event.id).and_then(lookup) else {
                warn!(
                    "No subscription for channel id {}; dropping '{}' event",
                    event.id, event.event_type
                );
                return RouteOutcome::UnknownSubscription;
            };

            debug!(
                "Routing '{}' event to channel {} ({})",
                event.event_type,
                subscription.channel(),
                subscription.id()
            );
            trace!("Event body: {}", event.body);
            subscription.deliver(&event.event_type, event.body).await;
            RouteOutcome::Delivered
        }
        InboundFrame::Ping | InboundFrame::Pong => RouteOutcome::Liveness,
        InboundFrame::Other { kind, body } => {
            info!("Unhandled frame type '{}': {}", kind, body);
            RouteOutcome::Unrecognized
        }
    }
}
