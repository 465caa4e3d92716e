//! Notification store
//!
//! Turns order mutations into read-tracked notifications. Per order number it
//! remembers the last status a notification was derived from; per
//! `(order number, status)` pair it remembers that a notification was emitted,
//! so a duplicated push event or a replayed refresh never produces a second
//! entry, even after the first one was removed.

use crate::persist::{NotifiedKey, PersistedNotifications, StateStore};
use crate::store::{OrderStore, Subscription};
use parking_lot::Mutex;
use shared::order::{Notification, NotificationKind, Order, OrderStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

#[derive(Default)]
struct InboxState {
    /// Append order (oldest first)
    items: Vec<Notification>,
    last_notified: BTreeMap<String, OrderStatus>,
    emitted: HashSet<(String, OrderStatus)>,
}

impl InboxState {
    fn unread(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    fn snapshot(&self) -> PersistedNotifications {
        let mut emitted: Vec<NotifiedKey> = self
            .emitted
            .iter()
            .map(|(order_number, status)| NotifiedKey {
                order_number: order_number.clone(),
                status: status.clone(),
            })
            .collect();
        emitted.sort_by(|a, b| {
            a.order_number
                .cmp(&b.order_number)
                .then_with(|| a.status.as_str().cmp(b.status.as_str()))
        });
        PersistedNotifications {
            items: self.items.clone(),
            last_notified: self.last_notified.clone(),
            emitted,
        }
    }
}

/// De-duplicated inbox of order notifications
pub struct NotificationStore {
    state: Mutex<InboxState>,
    announce_new_orders: bool,
    persistence: Option<Arc<dyn StateStore>>,
    unread_tx: watch::Sender<usize>,
    /// Held across snapshot + publish
    publish_lock: Mutex<()>,
}

impl NotificationStore {
    /// In-memory inbox.
    ///
    /// With `announce_new_orders` the first sighting of an order produces a
    /// `Created` notification; otherwise it only records the baseline status.
    pub fn new(announce_new_orders: bool) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(InboxState::default()),
            announce_new_orders,
            persistence: None,
            unread_tx,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn with_persistence(announce_new_orders: bool, persistence: Arc<dyn StateStore>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::new(announce_new_orders)
        }
    }

    /// Subscribe to every changed order of `store`.
    ///
    /// The registration holds only a weak reference to the inbox.
    pub fn attach(self: &Arc<Self>, store: &OrderStore) -> Subscription {
        let inbox: Weak<Self> = Arc::downgrade(self);
        store.registry().subscribe_fn(move |order| {
            if let Some(inbox) = inbox.upgrade() {
                inbox.observe(order);
            }
        })
    }

    /// Feed one merged order; returns the notification it produced, if any
    pub fn observe(&self, order: &Order) -> Option<Notification> {
        let notification = {
            let mut state = self.state.lock();
            let baseline = state.last_notified.get(&order.order_number).cloned();
            let notification = self.derive(&mut state, order);
            match &notification {
                Some(n) => state.items.push(n.clone()),
                None if baseline.as_ref() == Some(&order.status) => return None,
                None => {}
            }
            notification
        };

        if let Some(n) = &notification {
            tracing::info!(
                order_number = %n.order_number,
                kind = ?n.kind,
                status = %n.status,
                "Notification created"
            );
        }
        self.publish();
        notification
    }

    fn derive(&self, state: &mut InboxState, order: &Order) -> Option<Notification> {
        let number = &order.order_number;
        let status = &order.status;

        let previous = state.last_notified.insert(number.clone(), status.clone());
        let (kind, message) = match previous {
            None if self.announce_new_orders => (
                NotificationKind::Created,
                format!("New order {} placed ({})", number, status),
            ),
            None => {
                tracing::debug!(order_number = %number, status = %status, "Baseline status recorded");
                return None;
            }
            Some(previous) if previous == *status => return None,
            Some(previous) if previous.is_known() && status.is_known() => (
                NotificationKind::StatusChanged,
                format!(
                    "Order {} status changed from {} to {}",
                    number, previous, status
                ),
            ),
            Some(_) => (
                NotificationKind::Updated,
                format!("Order {} was updated", number),
            ),
        };

        if !state.emitted.insert((number.clone(), status.clone())) {
            tracing::debug!(order_number = %number, status = %status, "Already notified");
            return None;
        }

        Some(Notification {
            id: shared::util::random_id(),
            order_number: number.clone(),
            order_id: order.id.clone(),
            kind,
            message,
            status: status.clone(),
            created_at: shared::util::now_millis(),
            read: false,
        })
    }

    /// All notifications, newest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().items.iter().rev().cloned().collect()
    }

    /// Notifications about one order, newest first
    pub fn for_order(&self, order_number: &str) -> Vec<Notification> {
        self.state
            .lock()
            .items
            .iter()
            .rev()
            .filter(|n| n.order_number == order_number)
            .cloned()
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread()
    }

    /// Receiver of the unread count, for badges
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    /// Status the last notification for `order_number` was derived from
    pub fn last_notified(&self, order_number: &str) -> Option<OrderStatus> {
        self.state.lock().last_notified.get(order_number).cloned()
    }

    /// Returns `false` if no such notification exists or it was already read
    pub fn mark_as_read(&self, id: &str) -> bool {
        self.mutate(|state| match state.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        })
    }

    /// Returns how many notifications changed
    pub fn mark_all_as_read(&self) -> usize {
        self.mutate(|state| {
            let mut count = 0;
            for n in state.items.iter_mut().filter(|n| !n.read) {
                n.read = true;
                count += 1;
            }
            count
        })
    }

    /// Remove one notification. Its de-duplication key is kept.
    pub fn remove_notification(&self, id: &str) -> bool {
        self.mutate(|state| {
            let before = state.items.len();
            state.items.retain(|n| n.id != id);
            state.items.len() != before
        })
    }

    /// Empty the inbox. De-duplication keys and last statuses are kept.
    pub fn clear_all(&self) {
        self.mutate(|state| {
            state.items.clear();
            true
        });
    }

    /// Forget everything, including de-duplication state (logout)
    pub fn reset(&self) {
        self.mutate(|state| {
            *state = InboxState::default();
            true
        });
        tracing::info!("Notification inbox reset");
    }

    /// Replace the inbox with restored state without notifying anyone
    pub fn restore(&self, persisted: PersistedNotifications) -> usize {
        let mut emitted: HashSet<(String, OrderStatus)> = persisted
            .emitted
            .into_iter()
            .map(|key| (key.order_number, key.status))
            .collect();
        // Restored items imply their keys even if the section predates them
        emitted.extend(
            persisted
                .items
                .iter()
                .map(|n| (n.order_number.clone(), n.status.clone())),
        );

        let (count, unread) = {
            let mut state = self.state.lock();
            *state = InboxState {
                items: persisted.items,
                last_notified: persisted.last_notified,
                emitted,
            };
            (state.items.len(), state.unread())
        };
        self.unread_tx.send_replace(unread);
        tracing::debug!(count, unread, "Notification inbox restored");
        count
    }

    /// Apply `f`; persist and publish when it reports a change
    fn mutate<R>(&self, f: impl FnOnce(&mut InboxState) -> R) -> R
    where
        R: Changed,
    {
        let result = f(&mut *self.state.lock());
        if result.changed() {
            self.publish();
        }
        result
    }

    /// Publish the unread count and persist the current inbox.
    ///
    /// Serialized so the saved inbox and the badge never go back in time.
    fn publish(&self) {
        let _publish = self.publish_lock.lock();
        let (unread, snapshot) = {
            let state = self.state.lock();
            let snapshot = self.persistence.as_ref().map(|_| state.snapshot());
            (state.unread(), snapshot)
        };
        self.unread_tx.send_replace(unread);
        if let (Some(persistence), Some(snapshot)) = (&self.persistence, snapshot)
            && let Err(e) = persistence.save_notifications(&snapshot)
        {
            tracing::warn!(error = %e, "Failed to persist notifications");
        }
    }
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NotificationStore")
            .field("items", &state.items.len())
            .field("unread", &state.unread())
            .field("announce_new_orders", &self.announce_new_orders)
            .finish()
    }
}

/// Whether a mutation result warrants persisting
trait Changed {
    fn changed(&self) -> bool;
}

impl Changed for bool {
    fn changed(&self) -> bool {
        *self
    }
}

impl Changed for usize {
    fn changed(&self) -> bool {
        *self > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStateStore;

    fn order(number: &str, status: OrderStatus, version: i64) -> Order {
        Order::new(number).with_status(status).with_version(version)
    }

    fn attached(announce: bool) -> (OrderStore, Arc<NotificationStore>) {
        let store = OrderStore::new();
        let inbox = Arc::new(NotificationStore::new(announce));
        inbox.attach(&store);
        (store, inbox)
    }

    #[test]
    fn test_first_sighting_is_baseline() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Pending, 10));
        assert!(inbox.notifications().is_empty());
        assert_eq!(inbox.last_notified("ORD-1"), Some(OrderStatus::Pending));
    }

    #[test]
    fn test_announce_new_orders() {
        let (store, inbox) = attached(true);
        store.merge(order("ORD-1", OrderStatus::Pending, 10));
        let items = inbox.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::Created);
    }

    #[test]
    fn test_status_change_message() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Pending, 10));
        store.merge(order("ORD-1", OrderStatus::OutForDelivery, 20).with_id("srv-1"));

        let items = inbox.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::StatusChanged);
        assert_eq!(
            items[0].message,
            "Order ORD-1 status changed from Pending to Out for Delivery"
        );
        assert_eq!(items[0].order_id.as_deref(), Some("srv-1"));
        assert!(!items[0].read);
    }

    #[test]
    fn test_non_status_update_is_silent() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Shipped, 10));
        store.merge(order("ORD-1", OrderStatus::Shipped, 20).with_tracking_number("1Z"));
        assert!(inbox.notifications().is_empty());
    }

    #[test]
    fn test_duplicate_shipped_events_notify_once() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Processing, 10));
        store.merge(order("ORD-1", OrderStatus::Shipped, 20));
        store.merge(order("ORD-1", OrderStatus::Shipped, 20));
        // Direct replay bypassing the store's own idempotence
        inbox.observe(&order("ORD-1", OrderStatus::Shipped, 30));
        assert_eq!(inbox.notifications().len(), 1);
    }

    #[test]
    fn test_removed_notification_is_not_recreated() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Processing, 10));
        store.merge(order("ORD-1", OrderStatus::Shipped, 20));
        let id = inbox.notifications()[0].id.clone();
        assert!(inbox.remove_notification(&id));
        assert!(!inbox.remove_notification(&id));

        // Correction back and forth does not resurrect the Shipped entry
        store.merge(order("ORD-1", OrderStatus::Processing, 30));
        store.merge(order("ORD-1", OrderStatus::Shipped, 40));
        let items = inbox.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, OrderStatus::Processing);
    }

    #[test]
    fn test_unknown_status_falls_back_to_generic_message() {
        let (store, inbox) = attached(false);
        store.merge(order("ORD-1", OrderStatus::Processing, 10));
        store.merge(order("ORD-1", OrderStatus::parse("on_hold"), 20));
        let items = inbox.notifications();
        assert_eq!(items[0].kind, NotificationKind::Updated);
        assert_eq!(items[0].message, "Order ORD-1 was updated");
    }

    #[test]
    fn test_read_tracking_and_watch() {
        let (store, inbox) = attached(true);
        let rx = inbox.watch_unread();
        store.merge(order("ORD-1", OrderStatus::Pending, 10));
        store.merge(order("ORD-2", OrderStatus::Pending, 10));
        store.merge(order("ORD-1", OrderStatus::Processing, 20));
        assert_eq!(inbox.unread_count(), 3);
        assert_eq!(*rx.borrow(), 3);

        // Newest first
        let newest = inbox.notifications()[0].clone();
        assert_eq!(newest.status, OrderStatus::Processing);
        assert!(inbox.mark_as_read(&newest.id));
        assert!(!inbox.mark_as_read(&newest.id));
        assert!(!inbox.mark_as_read("missing"));
        assert_eq!(*rx.borrow(), 2);

        assert_eq!(inbox.mark_all_as_read(), 2);
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(inbox.for_order("ORD-1").len(), 2);

        inbox.clear_all();
        assert!(inbox.notifications().is_empty());
        store.merge(order("ORD-1", OrderStatus::Processing, 30).with_tracking_number("1Z"));
        assert!(inbox.notifications().is_empty());
    }

    #[test]
    fn test_persist_and_restore_keeps_dedup_state() {
        let persistence = Arc::new(MemoryStateStore::new());
        let store = OrderStore::new();
        let inbox = Arc::new(NotificationStore::with_persistence(false, persistence.clone()));
        inbox.attach(&store);
        store.merge(order("ORD-1", OrderStatus::Processing, 10));
        store.merge(order("ORD-1", OrderStatus::Shipped, 20));

        let saved = persistence.load().unwrap().unwrap().notifications;
        assert_eq!(saved.items.len(), 1);
        assert_eq!(saved.last_notified.get("ORD-1"), Some(&OrderStatus::Shipped));

        let restored = NotificationStore::new(false);
        assert_eq!(restored.restore(saved), 1);
        assert_eq!(restored.unread_count(), 1);
        assert!(restored.observe(&order("ORD-1", OrderStatus::Shipped, 30)).is_none());

        restored.reset();
        assert!(restored.notifications().is_empty());
        assert!(restored.last_notified("ORD-1").is_none());
    }
}
