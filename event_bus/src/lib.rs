mod events;

pub use events::{ConsoleEvent, Severity, StudyClosedSummary};

use std::sync::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

/// Internal publish/subscribe bus.
///
/// Every subscriber owns an unbounded channel and consumes at its own pace.
/// Publishing walks the subscriber list and drops senders whose receiver has
/// gone away; a publish to a disposed subscriber is silently ignored. Events
/// published by a single producer arrive at every subscriber in publish
/// order.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<UnboundedSender<ConsoleEvent>>>,
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: UnboundedReceiver<ConsoleEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ConsoleEvent> {
        self.rx.recv().await
    }

    /// Returns the next event without waiting, if one is queued.
    pub fn try_recv(&mut self) -> Option<ConsoleEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .write()
            .expect("event bus subscriber list poisoned")
            .push(tx);
        Subscription { rx }
    }

    /// Publishes an event to every live subscriber.
    ///
    /// Closed subscriptions are pruned here; their absence is not an error.
    pub fn publish(&self, event: ConsoleEvent) {
        trace!("publish {:?}", event.kind());
        let mut subscribers = self
            .subscribers
            .write()
            .expect("event bus subscriber list poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers; pruning happens on publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("event bus subscriber list poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(code: &str) -> ConsoleEvent {
        ConsoleEvent::OperatorNotification {
            severity: Severity::Info,
            code: code.to_string(),
            detail: String::new(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(notification("one"));
        bus.publish(notification("two"));
        match sub.recv().await.unwrap() {
            ConsoleEvent::OperatorNotification { code, .. } => assert_eq!(code, "one"),
            other => panic!("unexpected event: {other:?}"),
        }
        match sub.recv().await.unwrap() {
            ConsoleEvent::OperatorNotification { code, .. } => assert_eq!(code, "two"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_is_ignored_and_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let mut live = bus.subscribe();
        drop(sub);
        bus.publish(notification("after-drop"));
        assert!(live.recv().await.is_some());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(notification("nobody"));
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(notification("both"));
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }
}
