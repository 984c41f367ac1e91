// src/connection/subscription.rs
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, error};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::panic_message;

// Generate unique subscription IDs
static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription, stable for the lifetime of the process.
///
/// On the wire it is rendered as `sub_<n>`, which is what the server echoes
/// back in the `id` field of every `channel` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(NEXT_SUB_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Parse the wire form produced by `Display`. Anything else is not ours.
    pub fn parse(wire: &str) -> Option<Self> {
        wire.strip_prefix("sub_")?.parse().ok().map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Consumer callback attached to one event type of a subscription.
pub type EventCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named channel multiplexed over the shared connection.
///
/// Cloning is cheap and every clone refers to the same subscription, so the
/// handle returned by `use_channel` can be kept by as many consumers as needed.
/// Reconnects only resend the wire-level subscribe frame; this object and its
/// consumers are never rebuilt.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    channel: String,
    id: SubscriptionId,
    consumers: RwLock<HashMap<String, Vec<EventCallback>>>,
}

impl Subscription {
    pub(crate) fn new(channel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                channel: channel.into(),
                id: SubscriptionId::new(),
                consumers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// True if both handles point at the same subscription.
    pub fn same(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a consumer for one event type (`"note"`, `"notification"`, ...).
    ///
    /// Consumers for the same event type run in the order they were attached,
    /// each awaited before the next. Event types without consumers are ignored.
    pub fn on<F, Fut>(&self, event_type: impl Into<String>, consumer: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |payload| Box::pin(consumer(payload)));
        self.inner
            .consumers
            .write()
            .entry(event_type.into())
            .or_default()
            .push(callback);
    }

    pub(crate) async fn deliver(&self, event_type: &str, payload: Value) {
        // Snapshot so no lock is held while consumers run.
        let consumers = self.inner.consumers.read().get(event_type).cloned();

        let Some(consumers) = consumers else {
            debug!(
                "No consumer for '{}' events on channel {} ({})",
                event_type, self.inner.channel, self.inner.id
            );
            return;
        };

        // A panicking consumer must not take the connection task down with it.
        for consumer in consumers {
            match AssertUnwindSafe(consumer(payload.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Consumer for '{}' on channel {} ({}) failed: {:#}",
                    event_type, self.inner.channel, self.inner.id, e
                ),
                Err(panic) => error!(
                    "Consumer for '{}' on channel {} ({}) panicked: {}",
                    event_type,
                    self.inner.channel,
                    self.inner.id,
                    panic_message(panic.as_ref())
                ),
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event_types: Vec<String> = self.inner.consumers.read().keys().cloned().collect();
        f.debug_struct("Subscription")
            .field("channel", &self.inner.channel)
            .field("id", &self.inner.id)
            .field("event_types", &event_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn ids_are_unique_and_round_trip_through_wire_form() {
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(SubscriptionId::parse(&a.to_string()), Some(a));
    }

    #[test]
    fn foreign_ids_do_not_parse() {
        assert_eq!(SubscriptionId::parse("channel_1700000000_abc"), None);
        assert_eq!(SubscriptionId::parse("sub_"), None);
        assert_eq!(SubscriptionId::parse("sub_x1"), None);
    }

    #[tokio::test]
    async fn deliver_runs_consumers_in_order_and_survives_failures() {
        let sub = Subscription::new("main");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        sub.on("notification", move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("first");
                anyhow::bail!("boom")
            }
        });
        let log = Arc::clone(&seen);
        sub.on("notification", move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("second");
                Ok(())
            }
        });

        sub.deliver("notification", Value::Null).await;
        sub.deliver("unknownEvent", Value::Null).await;

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    async fn explode(_: Value) -> anyhow::Result<()> {
        panic!("consumer blew up")
    }

    #[tokio::test]
    async fn deliver_contains_panicking_consumers() {
        let sub = Subscription::new("main");
        let seen = Arc::new(Mutex::new(Vec::new()));

        sub.on("notification", explode);
        let log = Arc::clone(&seen);
        sub.on("notification", move |payload| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(payload);
                Ok(())
            }
        });

        sub.deliver("notification", Value::from(1)).await;
        sub.deliver("notification", Value::from(2)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Value::from(1), Value::from(2)]);
    }
}
