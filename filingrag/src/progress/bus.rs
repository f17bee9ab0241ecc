//! Conversation-keyed progress pub/sub.
//!
//! Delivery is at-least-once to subscribers currently joined to the
//! conversation's group; there is no durable replay — reconnecting clients
//! read the snapshot from the conversation's ingestion-status mirror. Slow
//! subscribers lag rather than block publishers; lagged (dropped) events are
//! counted and logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio::time::timeout;

use super::event::ProcessingEvent;
use crate::types::ConversationId;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out hub for pipeline progress, keyed by conversation id.
#[derive(Debug)]
pub struct ProgressBus {
    groups: RwLock<FxHashMap<ConversationId, broadcast::Sender<ProcessingEvent>>>,
    capacity: usize,
    dropped_events: AtomicUsize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            groups: RwLock::new(FxHashMap::default()),
            capacity: capacity.max(1),
            dropped_events: AtomicUsize::new(0),
        }
    }

    /// Publish to a conversation's group. Events published while nobody is
    /// subscribed are dropped by design.
    pub fn publish(&self, conversation_id: &str, event: ProcessingEvent) {
        let sender = {
            let groups = self.groups.read();
            groups.get(conversation_id).cloned()
        };
        let Some(sender) = sender else {
            return;
        };
        if sender.send(event).is_err() {
            // Last receiver left between lookup and send; prune the group.
            let mut groups = self.groups.write();
            if groups
                .get(conversation_id)
                .is_some_and(|s| s.receiver_count() == 0)
            {
                groups.remove(conversation_id);
            }
        }
    }

    /// Join a conversation's group. Dropping the stream leaves the group.
    pub fn subscribe(self: &Arc<Self>, conversation_id: &str) -> ProgressStream {
        let receiver = {
            let mut groups = self.groups.write();
            groups
                .entry(conversation_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        ProgressStream {
            receiver,
            bus: Arc::clone(self),
        }
    }

    /// Subscribers currently joined to the conversation's group.
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.groups
            .read()
            .get(conversation_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Total events dropped because a subscriber lagged.
    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Subscription to one conversation's progress events.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: broadcast::Receiver<ProcessingEvent>,
    bus: Arc<ProgressBus>,
}

impl ProgressStream {
    /// Receive the next event, skipping over any lagged gap after counting
    /// it.
    pub async fn recv(&mut self) -> Option<ProcessingEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.bus
                        .dropped_events
                        .fetch_add(missed as usize, Ordering::Relaxed);
                    tracing::warn!(
                        target: "filingrag::progress",
                        missed,
                        total_dropped = self.bus.dropped(),
                        "progress stream lagged; dropped events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ProcessingEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.bus
                        .dropped_events
                        .fetch_add(missed as usize, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }

    /// Next event within `duration`, or `None` on timeout/closure.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<ProcessingEvent> {
        timeout(duration, self.recv()).await.ok().flatten()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<ProcessingEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IngestionStatus;

    #[tokio::test]
    async fn events_fan_out_to_joined_subscribers() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe("conv-1");
        let mut b = bus.subscribe("conv-1");

        bus.publish(
            "conv-1",
            ProcessingEvent::update(IngestionStatus::Downloading, "downloading filings", 10),
        );

        for stream in [&mut a, &mut b] {
            let event = stream.next_timeout(Duration::from_secs(1)).await.unwrap();
            assert_eq!(event.channel(), "ProcessingUpdate");
            assert_eq!(event.stage(), Some(IngestionStatus::Downloading));
        }
    }

    #[tokio::test]
    async fn groups_are_isolated_by_conversation() {
        let bus = ProgressBus::new();
        let mut other = bus.subscribe("conv-2");
        bus.publish("conv-1", ProcessingEvent::completed(1, None));
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = ProgressBus::new();
        bus.publish("conv-1", ProcessingEvent::completed(1, None));
        assert_eq!(bus.subscriber_count("conv-1"), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_counts_drops() {
        let bus = Arc::new(ProgressBus::with_capacity(1));
        let mut stream = bus.subscribe("conv-1");
        for i in 0..3 {
            bus.publish(
                "conv-1",
                ProcessingEvent::update(IngestionStatus::Chunking, format!("event {i}"), 50),
            );
        }
        // Capacity 1: only the newest event survives; the gap is counted.
        let event = stream.recv().await.unwrap();
        assert_eq!(event.channel(), "ProcessingUpdate");
        assert!(bus.dropped() >= 1);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = ProgressBus::new();
        let mut stream = bus.subscribe("conv-1");
        bus.publish(
            "conv-1",
            ProcessingEvent::update(IngestionStatus::Downloading, "a", 10),
        );
        bus.publish(
            "conv-1",
            ProcessingEvent::update(IngestionStatus::Extracting, "b", 30),
        );
        bus.publish("conv-1", ProcessingEvent::completed(2, Some(1_000)));

        let events = stream.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].stage(), Some(IngestionStatus::Downloading));
        assert_eq!(events[1].stage(), Some(IngestionStatus::Extracting));
        assert_eq!(events[2].channel(), "ProcessingComplete");
    }
}
