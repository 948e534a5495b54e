// src/events/hub.rs

//! In-process publish/subscribe broker keyed by run id.
//!
//! One mutex guards both the per-run history and the subscriber sets. It is
//! held only while those collections change; delivery happens after the
//! lock is released, into unbounded per-subscriber queues, so a slow
//! subscriber never blocks the publisher or other subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::models::{EventKind, RunEvent, RunId};

type SubscriberId = u64;

#[derive(Default)]
struct HubState {
    history: HashMap<RunId, Vec<RunEvent>>,
    subscribers: HashMap<RunId, Vec<(SubscriberId, UnboundedSender<RunEvent>)>>,
}

/// Event broker shared between run executors and observers.
#[derive(Default)]
pub struct EventHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp, record and fan out an event for `run_id`.
    pub fn publish(&self, run_id: RunId, kind: EventKind) -> RunEvent {
        let event = RunEvent::new(run_id, kind);
        self.publish_event(event.clone());
        event
    }

    /// Record and fan out an already stamped event.
    pub fn publish_event(&self, event: RunEvent) {
        let senders: Vec<UnboundedSender<RunEvent>> = {
            let mut state = self.lock();
            state
                .history
                .entry(event.run_id)
                .or_default()
                .push(event.clone());
            state
                .subscribers
                .get(&event.run_id)
                .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
                .unwrap_or_default()
        };

        log::debug!("Run {} event {}", event.run_id, event.kind.name());
        for tx in senders {
            // A closed inbox belongs to a subscription that is going away
            let _ = tx.send(event.clone());
        }
    }

    /// Register a consumer for `run_id`.
    ///
    /// Existing history is queued into the new inbox before the subscriber
    /// becomes visible to publishers, so replay always precedes live events.
    pub fn subscribe(self: &Arc<Self>, run_id: RunId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            if let Some(history) = state.history.get(&run_id) {
                for event in history {
                    let _ = tx.send(event.clone());
                }
            }
            state.subscribers.entry(run_id).or_default().push((id, tx));
        }

        Subscription {
            hub: Arc::clone(self),
            run_id,
            id,
            rx,
            active: true,
        }
    }

    fn unsubscribe(&self, run_id: RunId, id: SubscriberId) {
        let mut state = self.lock();
        if let Some(subs) = state.subscribers.get_mut(&run_id) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                state.subscribers.remove(&run_id);
            }
        }
    }

    /// Every event published for `run_id` so far.
    pub fn history(&self, run_id: RunId) -> Vec<RunEvent> {
        self.lock().history.get(&run_id).cloned().unwrap_or_default()
    }

    /// Number of live subscribers for `run_id`.
    pub fn subscriber_count(&self, run_id: RunId) -> usize {
        self.lock().subscribers.get(&run_id).map_or(0, Vec::len)
    }

    /// Emitter bound to one run.
    pub fn emitter(self: &Arc<Self>, run_id: RunId) -> RunEmitter {
        RunEmitter {
            hub: Arc::clone(self),
            run_id,
        }
    }
}

/// A registered consumer. Dropping it unsubscribes.
pub struct Subscription {
    hub: Arc<EventHub>,
    run_id: RunId,
    id: SubscriberId,
    rx: UnboundedReceiver<RunEvent>,
    active: bool,
}

impl Subscription {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next event, replayed history first.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Next already queued event, if any.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }

    /// Remove this consumer from the hub. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.active {
            self.active = false;
            self.hub.unsubscribe(self.run_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Publishes events tagged with a fixed run id.
#[derive(Clone)]
pub struct RunEmitter {
    hub: Arc<EventHub>,
    run_id: RunId,
}

impl RunEmitter {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn emit(&self, kind: EventKind) -> RunEvent {
        self.hub.publish(self.run_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> EventKind {
        EventKind::RunStarted {
            source_id: "tax".into(),
        }
    }

    fn item(index: usize) -> EventKind {
        EventKind::ItemStarted {
            reference: format!("item-{index}"),
            item_index: index,
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<RunEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn test_late_subscriber_gets_history_then_live_events() {
        let hub = EventHub::new();
        let mut early = hub.subscribe(1);
        hub.publish(1, started());
        hub.publish(1, item(0));

        let mut late = hub.subscribe(1);
        hub.publish(1, item(1));

        let early_events = drain(&mut early);
        let late_events = drain(&mut late);
        assert_eq!(early_events.len(), 3);
        assert_eq!(early_events, late_events);
        assert_eq!(hub.history(1), early_events);
    }

    #[test]
    fn test_runs_are_isolated() {
        let hub = EventHub::new();
        let mut first = hub.subscribe(1);
        hub.publish(2, started());
        assert!(first.try_recv().is_none());
        assert!(hub.history(1).is_empty());
        assert_eq!(hub.history(2).len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes_and_keeps_history() {
        let hub = EventHub::new();
        let a = hub.subscribe(7);
        let mut b = hub.subscribe(7);
        assert_eq!(hub.subscriber_count(7), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(7), 1);
        b.unsubscribe();
        b.unsubscribe();
        assert_eq!(hub.subscriber_count(7), 0);

        hub.publish(7, started());
        assert_eq!(hub.history(7).len(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new();
        let event = hub.emitter(3).emit(started());
        assert_eq!(event.run_id, 3);
        assert_eq!(hub.history(3), vec![event]);
    }

    #[tokio::test]
    async fn test_concurrent_publishers_and_subscribers_agree_on_order() {
        let hub = EventHub::new();
        let mut watcher = hub.subscribe(9);

        let producer = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for i in 0..200 {
                    hub.publish(9, item(i));
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut mid = None;
        for _ in 0..10 {
            tokio::task::yield_now().await;
            mid.get_or_insert_with(|| hub.subscribe(9));
        }
        producer.await.unwrap();

        let mut mid = mid.unwrap();
        let all = drain(&mut watcher);
        let replayed = drain(&mut mid);
        assert_eq!(all.len(), 200);
        assert_eq!(all, replayed);
    }
}
