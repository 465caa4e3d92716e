//! Subscriber registry
//!
//! Listeners live in an arena of slots. A [`SubscriptionId`] is the slot index
//! plus a generation counter, so removal is O(1) and a stale handle can never
//! remove a listener that later reused the slot.
//!
//! Dispatch iterates over a snapshot of the listeners and re-checks that each
//! one is still registered right before calling it: a listener removed during
//! dispatch (by itself or by another listener) is not invoked again.

use parking_lot::Mutex;
use shared::order::Order;
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback invoked with the merged order
pub type Listener = Arc<dyn Fn(&Order) + Send + Sync>;

/// Optional filter; absence matches every order
pub type Predicate = Arc<dyn Fn(&Order) -> bool + Send + Sync>;

/// Only orders owned by `owner_ref`
pub fn by_owner(owner_ref: impl Into<String>) -> Predicate {
    let owner_ref = owner_ref.into();
    Arc::new(move |order: &Order| order.is_owned_by(&owner_ref))
}

/// Only the order with this number
pub fn by_order_number(order_number: impl Into<String>) -> Predicate {
    let order_number = order_number.into();
    Arc::new(move |order: &Order| order.order_number == order_number)
}

/// Stable handle of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    index: u32,
    generation: u32,
}

struct Entry {
    predicate: Option<Predicate>,
    listener: Listener,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: usize,
}

impl RegistryInner {
    fn insert(&mut self, entry: Entry) -> SubscriptionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.active += 1;
        SubscriptionId {
            index,
            generation: slot.generation,
        }
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.active -= 1;
        true
    }

    fn contains(&self, id: SubscriptionId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.entry.is_some())
    }
}

/// Publish-subscribe fan-out of order mutations
///
/// Cloning shares the same registry. State is ephemeral per session.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`, optionally filtered by `predicate`
    pub fn subscribe(&self, predicate: Option<Predicate>, listener: Listener) -> Subscription {
        let id = self.inner.lock().insert(Entry {
            predicate,
            listener,
        });
        tracing::debug!(?id, "Listener subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Register a closure for every order
    pub fn subscribe_fn<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Order) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(listener))
    }

    /// Remove a registration; `false` if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.lock().remove(id)
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.lock().contains(id)
    }

    /// Number of active registrations
    pub fn len(&self) -> usize {
        self.inner.lock().active
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration (session teardown)
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let ids: Vec<SubscriptionId> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| SubscriptionId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        for id in ids {
            inner.remove(id);
        }
    }

    /// Invoke every matching listener with `order`; returns how many ran
    pub fn dispatch(&self, order: &Order) -> usize {
        let snapshot: Vec<(SubscriptionId, Option<Predicate>, Listener)> = {
            let inner = self.inner.lock();
            inner
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    slot.entry.as_ref().map(|entry| {
                        (
                            SubscriptionId {
                                index: index as u32,
                                generation: slot.generation,
                            },
                            entry.predicate.clone(),
                            entry.listener.clone(),
                        )
                    })
                })
                .collect()
        };

        let mut invoked = 0;
        for (id, predicate, listener) in snapshot {
            if !self.is_subscribed(id) {
                continue;
            }
            if predicate.is_some_and(|p| !p(order)) {
                continue;
            }
            listener(order);
            invoked += 1;
        }
        invoked
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("active", &self.len())
            .finish()
    }
}

/// Handle returned by [`SubscriberRegistry::subscribe`]
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
/// The handle does not keep the registry alive.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Synchronous and idempotent; safe to call from
    /// inside the listener itself.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => {
                let removed = inner.lock().remove(self.id);
                if removed {
                    tracing::debug!(id = ?self.id, "Listener unsubscribed");
                }
                removed
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|inner| inner.lock().contains(self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            count,
            Arc::new(move |_: &Order| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_dispatch_respects_predicate() {
        let registry = SubscriberRegistry::new();
        let (all, all_listener) = counter();
        let (mine, mine_listener) = counter();
        registry.subscribe(None, all_listener);
        registry.subscribe(Some(by_owner("u-1")), mine_listener);

        registry.dispatch(&Order::new("ORD-1").with_owner("u-1"));
        registry.dispatch(&Order::new("ORD-2").with_owner("u-2"));
        registry.dispatch(&Order::new("ORD-3"));

        assert_eq!(all.load(Ordering::SeqCst), 3);
        assert_eq!(mine.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (count, listener) = counter();
        let sub = registry.subscribe(None, listener);
        assert_eq!(registry.len(), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!registry.unsubscribe(sub.id()));
        assert!(registry.is_empty());

        registry.dispatch(&Order::new("ORD-1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_handle_does_not_remove_reused_slot() {
        let registry = SubscriberRegistry::new();
        let (_, first) = counter();
        let old = registry.subscribe(None, first);
        old.unsubscribe();

        let (count, second) = counter();
        let new = registry.subscribe(None, second);
        // Same slot, new generation
        assert_ne!(old.id(), new.id());
        assert!(!old.unsubscribe());
        assert!(new.is_active());

        registry.dispatch(&Order::new("ORD-1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_unsubscribe_during_dispatch() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let c = calls.clone();
        let h = handle.clone();
        let sub = registry.subscribe_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = h.get() {
                sub.unsubscribe();
            }
        });
        handle.set(sub).unwrap();

        let (others, other_listener) = counter();
        registry.subscribe(None, other_listener);

        registry.dispatch(&Order::new("ORD-1"));
        registry.dispatch(&Order::new("ORD-1"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(others.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_removed_by_earlier_listener_is_skipped() {
        let registry = SubscriberRegistry::new();
        let victim: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let v = victim.clone();
        registry.subscribe_fn(move |_| {
            if let Some(sub) = v.get() {
                sub.unsubscribe();
            }
        });
        let (count, listener) = counter();
        victim.set(registry.subscribe(None, listener)).unwrap();

        assert_eq!(registry.dispatch(&Order::new("ORD-1")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_and_dropped_registry() {
        let registry = SubscriberRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();
        let sub = registry.subscribe(None, a);
        registry.subscribe(None, b);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!sub.is_active());

        let registry = SubscriberRegistry::new();
        let (_, c) = counter();
        let sub = registry.subscribe(None, c);
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
