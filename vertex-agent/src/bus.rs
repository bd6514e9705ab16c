//! Event bus
//!
//! In-process publish/subscribe hub used to propagate instance status and
//! output to the rest of the agent.
//!
//! Dispatch notifies listeners in rounds. A listener may register another
//! listener from inside its handler and expect it to receive the same event,
//! so each round picks up listeners that joined during the previous one.
//! Dispatch ends when a round finds nobody new, or after `max_rounds` rounds.
//! The lock only guards the listener map; handlers always run without it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;
use vertex_core::domain::event::Event;

/// Default number of notification rounds per dispatch
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Receiver of bus events
///
/// Handlers must not block and must not fail loudly: errors are logged by
/// the listener itself and never abort delivery to other listeners.
pub trait Listener: Send + Sync {
    /// Identity used for registration and exactly-once delivery
    fn id(&self) -> Uuid;

    fn on_event(&self, event: &Event);
}

/// Summary of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Number of listeners that received the event
    pub notified: usize,
    /// Rounds run, including the final empty one when converged
    pub rounds: usize,
    /// False when listeners were still joining after `max_rounds` rounds
    pub converged: bool,
}

/// In-memory publish/subscribe hub
///
/// The bus does not own its listeners: it keeps weak references and drops
/// entries whose listener is gone.
pub struct EventBus {
    listeners: RwLock<HashMap<Uuid, Weak<dyn Listener>>>,
    max_rounds: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_max_rounds(DEFAULT_MAX_ROUNDS)
    }

    /// Creates a bus with a custom round cap (minimum 1)
    pub fn with_max_rounds(max_rounds: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn add_listener<L: Listener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn Listener> = Arc::downgrade(listener) as Weak<dyn Listener>;
        let id = listener.id();

        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, weak);

        debug!("Listener {} registered", id);
    }

    /// Removes a listener by identity
    ///
    /// # Returns
    /// `false` if no listener with this id was registered
    pub fn remove_listener(&self, id: Uuid) -> bool {
        let removed = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();

        if removed {
            debug!("Listener {} removed", id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Delivers `event` to every registered listener exactly once
    pub fn dispatch(&self, event: Event) -> Dispatch {
        let mut notified: HashSet<Uuid> = HashSet::new();

        for round in 0..=self.max_rounds {
            let pending = self.pending(&notified);

            if pending.is_empty() {
                return Dispatch {
                    notified: notified.len(),
                    rounds: round + 1,
                    converged: true,
                };
            }

            if round == self.max_rounds {
                error!(
                    "Dispatch of {:?} did not converge after {} rounds: {} listener(s) notified, {} left out",
                    event,
                    self.max_rounds,
                    notified.len(),
                    pending.len()
                );
                return Dispatch {
                    notified: notified.len(),
                    rounds: round,
                    converged: false,
                };
            }

            for (id, listener) in pending {
                notified.insert(id);
                listener.on_event(&event);
            }
        }

        unreachable!("dispatch loop always returns")
    }

    /// Subscribes a channel to the bus
    ///
    /// The subscription deregisters itself when dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(ChannelListener {
            id: Uuid::new_v4(),
            tx,
        });

        self.add_listener(&listener);

        Subscription {
            bus: Arc::downgrade(self),
            listener,
            rx,
        }
    }

    /// Snapshot of live listeners not yet notified, pruning dead entries
    fn pending(&self, notified: &HashSet<Uuid>) -> Vec<(Uuid, Arc<dyn Listener>)> {
        let mut dead = Vec::new();
        let pending: Vec<_> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|(id, _)| !notified.contains(*id))
                .filter_map(|(id, weak)| match weak.upgrade() {
                    Some(listener) => Some((*id, listener)),
                    None => {
                        dead.push(*id);
                        None
                    }
                })
                .collect()
        };

        if !dead.is_empty() {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in dead {
                // Only drop the entry if it was not replaced meanwhile
                if listeners.get(&id).is_some_and(|w| w.strong_count() == 0) {
                    listeners.remove(&id);
                }
            }
        }

        pending
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct ChannelListener {
    id: Uuid,
    tx: mpsc::UnboundedSender<Event>,
}

impl Listener for ChannelListener {
    fn id(&self) -> Uuid {
        self.id
    }

    fn on_event(&self, event: &Event) {
        // The receiver may already be gone while the subscription is dropping
        let _ = self.tx.send(event.clone());
    }
}

/// Channel-backed registration on an [`EventBus`]
pub struct Subscription {
    bus: Weak<EventBus>,
    listener: Arc<ChannelListener>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.listener.id
    }

    /// Waits for the next event
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_listener(self.listener.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        id: Uuid,
        count: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                count: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl Listener for CountingListener {
        fn id(&self) -> Uuid {
            self.id
        }

        fn on_event(&self, _event: &Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Registers a fresh listener on every event it receives, up to `budget` times
    struct SpawningListener {
        id: Uuid,
        bus: Weak<EventBus>,
        budget: AtomicUsize,
        spawned: Mutex<Vec<Arc<SpawningListener>>>,
        received: AtomicUsize,
    }

    impl SpawningListener {
        fn new(bus: &Arc<EventBus>, budget: usize) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                bus: Arc::downgrade(bus),
                budget: AtomicUsize::new(budget),
                spawned: Mutex::new(Vec::new()),
                received: AtomicUsize::new(0),
            })
        }

        fn total_received(&self) -> usize {
            self.received.load(Ordering::SeqCst)
                + self
                    .spawned
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|child| child.total_received())
                    .sum::<usize>()
        }
    }

    impl Listener for SpawningListener {
        fn id(&self) -> Uuid {
            self.id
        }

        fn on_event(&self, _event: &Event) {
            self.received.fetch_add(1, Ordering::SeqCst);

            let budget = self.budget.load(Ordering::SeqCst);
            if budget == 0 {
                return;
            }

            if let Some(bus) = self.bus.upgrade() {
                let child = SpawningListener::new(&bus, budget - 1);
                bus.add_listener(&child);
                self.spawned.lock().unwrap().push(child);
            }
        }
    }

    /// Removes itself and `peer` and registers `late` when it sees an event
    struct RemovingListener {
        id: Uuid,
        bus: Weak<EventBus>,
        peer: Uuid,
        late: Arc<CountingListener>,
        received: AtomicUsize,
    }

    impl Listener for RemovingListener {
        fn id(&self) -> Uuid {
            self.id
        }

        fn on_event(&self, _event: &Event) {
            self.received.fetch_add(1, Ordering::SeqCst);

            if let Some(bus) = self.bus.upgrade() {
                bus.remove_listener(self.peer);
                bus.remove_listener(self.id);
                bus.add_listener(&self.late);
            }
        }
    }

    #[test]
    fn test_dispatch_reaches_every_listener_once() {
        let bus = EventBus::new();
        let a = CountingListener::new();
        let b = CountingListener::new();
        bus.add_listener(&a);
        bus.add_listener(&b);

        let outcome = bus.dispatch(Event::InstancesChange);

        assert!(outcome.converged);
        assert_eq!(outcome.notified, 2);
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let bus = EventBus::new();
        let outcome = bus.dispatch(Event::InstancesChange);
        assert!(outcome.converged);
        assert_eq!(outcome.notified, 0);
    }

    #[test]
    fn test_removed_listener_is_not_notified() {
        let bus = EventBus::new();
        let a = CountingListener::new();
        bus.add_listener(&a);

        assert!(bus.remove_listener(a.id));
        assert!(!bus.remove_listener(a.id));

        bus.dispatch(Event::InstancesChange);
        assert_eq!(a.count(), 0);
    }

    #[test]
    fn test_listener_added_during_dispatch_receives_event() {
        let bus = Arc::new(EventBus::new());
        let root = SpawningListener::new(&bus, 3);
        bus.add_listener(&root);

        let outcome = bus.dispatch(Event::InstancesChange);

        // root + three generations of children
        assert!(outcome.converged);
        assert_eq!(outcome.notified, 4);
        assert_eq!(root.total_received(), 4);
    }

    #[test]
    fn test_listener_removed_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let peer = CountingListener::new();
        let late = CountingListener::new();
        let remover = Arc::new(RemovingListener {
            id: Uuid::new_v4(),
            bus: Arc::downgrade(&bus),
            peer: peer.id,
            late: Arc::clone(&late),
            received: AtomicUsize::new(0),
        });
        bus.add_listener(&peer);
        bus.add_listener(&remover);

        let outcome = bus.dispatch(Event::InstancesChange);

        // Round 0 snapshot still reaches the peer; the late joiner gets round 1
        assert!(outcome.converged);
        assert_eq!(outcome.notified, 3);
        assert_eq!(peer.count(), 1);
        assert_eq!(remover.received.load(Ordering::SeqCst), 1);
        assert_eq!(late.count(), 1);

        let outcome = bus.dispatch(Event::InstancesChange);
        assert!(outcome.converged);
        assert_eq!(outcome.notified, 1);
        assert_eq!(peer.count(), 1);
        assert_eq!(remover.received.load(Ordering::SeqCst), 1);
        assert_eq!(late.count(), 2);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_dispatch_stops_at_round_cap() {
        let bus = Arc::new(EventBus::with_max_rounds(3));
        let root = SpawningListener::new(&bus, 100);
        bus.add_listener(&root);

        let outcome = bus.dispatch(Event::InstancesChange);

        assert!(!outcome.converged);
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.notified, 3);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let bus = EventBus::new();
        let a = CountingListener::new();
        bus.add_listener(&a);
        drop(a);

        let outcome = bus.dispatch(Event::InstancesChange);
        assert_eq!(outcome.notified, 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_receives_and_unregisters() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);

        bus.dispatch(Event::InstancesChange);
        assert_eq!(sub.recv().await, Some(Event::InstancesChange));
        assert!(sub.try_recv().is_none());

        drop(sub);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_concurrent_registration_and_dispatch() {
        let bus = Arc::new(EventBus::new());
        let listeners: Vec<_> = (0..8).map(|_| CountingListener::new()).collect();

        std::thread::scope(|scope| {
            for listener in &listeners {
                let bus = Arc::clone(&bus);
                scope.spawn(move || {
                    bus.add_listener(listener);
                    bus.dispatch(Event::InstancesChange);
                });
            }
        });

        let outcome = bus.dispatch(Event::InstancesChange);
        assert_eq!(outcome.notified, 8);
        for listener in &listeners {
            // Its own dispatch, the final one, and any that ran after it joined
            assert!(listener.count() >= 2);
        }
    }
}
