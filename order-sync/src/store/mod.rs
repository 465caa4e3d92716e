//! Order cache store
//!
//! One record per `order_number`. Every ingress path (optimistic insert,
//! REST refresh, push event) goes through [`OrderStore::merge`], which
//! replaces whole records by `version` and never patches fields.
//!
//! # Identity
//!
//! ```text
//! order_number ──► Order
//! id           ──┐
//! client_temp_id ┴► index ──► order_number
//! temp id ──► aliases ──► server id
//! ```
//!
//! # Dispatch
//!
//! Changed records are queued under the state lock and delivered to the
//! [`SubscriberRegistry`] after the lock is released, in commit order. A
//! merge issued from inside a listener is delivered once the current
//! listener returns.
//!
//! # Persistence
//!
//! Saves are serialized and each one snapshots the state at the time it
//! runs, so the last write on disk never predates the last commit.

pub mod registry;

pub use registry::{
    Listener, Predicate, SubscriberRegistry, Subscription, SubscriptionId, by_order_number,
    by_owner,
};

use crate::normalize::normalize_order;
use crate::persist::{PersistedOrders, StateStore};
use parking_lot::{Mutex, RwLock};
use shared::order::{Order, OrderStatus, Transition};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Result of [`OrderStore::merge`]
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Whether the cached record was inserted or replaced
    pub changed: bool,
    /// The cached record after the merge
    pub result: Order,
}

/// Snapshot of cached orders, newest first
///
/// Iterating does not consume the list, so it can be walked any number of
/// times.
#[derive(Debug, Clone, Default)]
pub struct OrderList {
    orders: Vec<Order>,
}

impl OrderList {
    pub fn iter(&self) -> std::slice::Iter<'_, Order> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn into_vec(self) -> Vec<Order> {
        self.orders
    }
}

impl IntoIterator for OrderList {
    type Item = Order;
    type IntoIter = std::vec::IntoIter<Order>;

    fn into_iter(self) -> Self::IntoIter {
        self.orders.into_iter()
    }
}

impl<'a> IntoIterator for &'a OrderList {
    type Item = &'a Order;
    type IntoIter = std::slice::Iter<'a, Order>;

    fn into_iter(self) -> Self::IntoIter {
        self.orders.iter()
    }
}

#[derive(Default)]
struct StoreState {
    orders: HashMap<String, Order>,
    /// id / client temp id -> order number
    index: HashMap<String, String>,
    /// client temp id -> server id
    aliases: BTreeMap<String, String>,
}

impl StoreState {
    fn index_identity(&mut self, order: &Order) {
        for key in [&order.id, &order.client_temp_id].into_iter().flatten() {
            if let Some(previous) = self.index.insert(key.clone(), order.order_number.clone())
                && previous != order.order_number
            {
                tracing::warn!(
                    key = %key,
                    previous = %previous,
                    order_number = %order.order_number,
                    "Identifier moved to a different order number"
                );
            }
        }
        if let (Some(temp_id), Some(id)) = (&order.client_temp_id, &order.id)
            && temp_id != id
        {
            self.aliases.insert(temp_id.clone(), id.clone());
        }
    }

    fn merge(&mut self, mut incoming: Order) -> MergeOutcome {
        let Some(existing) = self.orders.get(&incoming.order_number) else {
            tracing::debug!(
                order_number = %incoming.order_number,
                version = incoming.version,
                "Order inserted"
            );
            self.index_identity(&incoming);
            self.orders
                .insert(incoming.order_number.clone(), incoming.clone());
            return MergeOutcome {
                changed: true,
                result: incoming,
            };
        };

        if incoming.version < existing.version {
            tracing::debug!(
                order_number = %incoming.order_number,
                incoming = incoming.version,
                cached = existing.version,
                "Stale order discarded"
            );
            return MergeOutcome {
                changed: false,
                result: existing.clone(),
            };
        }

        // Identity survives the replacement even when the newer source omits it
        if incoming.client_temp_id.is_none() {
            incoming.client_temp_id = existing.client_temp_id.clone();
        }
        if incoming.id.is_none() {
            incoming.id = existing.id.clone();
        }

        if incoming == *existing {
            return MergeOutcome {
                changed: false,
                result: incoming,
            };
        }

        match OrderStatus::transition(&existing.status, &incoming.status) {
            Transition::Regress => tracing::warn!(
                order_number = %incoming.order_number,
                from = %existing.status,
                to = %incoming.status,
                "Backward status transition applied"
            ),
            Transition::Unknown => tracing::info!(
                order_number = %incoming.order_number,
                from = %existing.status,
                to = %incoming.status,
                "Unrecognized status transition applied"
            ),
            Transition::Advance | Transition::Same => {}
        }

        tracing::debug!(
            order_number = %incoming.order_number,
            version = incoming.version,
            "Order replaced"
        );
        self.index_identity(&incoming);
        self.orders
            .insert(incoming.order_number.clone(), incoming.clone());
        MergeOutcome {
            changed: true,
            result: incoming,
        }
    }

    fn resolve(&self, key: &str) -> Option<&Order> {
        if let Some(order) = self.orders.get(key) {
            return Some(order);
        }
        let by_index = |k: &str| self.index.get(k).and_then(|n| self.orders.get(n));
        by_index(key).or_else(|| self.aliases.get(key).and_then(|id| by_index(id.as_str())))
    }

    fn snapshot(&self) -> PersistedOrders {
        let mut records: Vec<Order> = self.orders.values().cloned().collect();
        records.sort_by(|a, b| a.order_number.cmp(&b.order_number));
        PersistedOrders {
            records,
            aliases: self.aliases.clone(),
        }
    }
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Order>,
    draining: bool,
}

/// Process-wide order cache
///
/// Construct one per session; tests build isolated instances.
pub struct OrderStore {
    state: RwLock<StoreState>,
    queue: Mutex<DispatchQueue>,
    registry: SubscriberRegistry,
    persistence: Option<Arc<dyn StateStore>>,
    /// Held across snapshot + save
    save_lock: Mutex<()>,
}

impl OrderStore {
    /// In-memory store without persistence
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            queue: Mutex::new(DispatchQueue::default()),
            registry: SubscriberRegistry::new(),
            persistence: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Store that writes its section of the session blob after every mutation
    pub fn with_persistence(persistence: Arc<dyn StateStore>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::new()
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Register a listener for changed orders
    pub fn subscribe(&self, predicate: Option<Predicate>, listener: Listener) -> Subscription {
        self.registry.subscribe(predicate, listener)
    }

    /// Look up by order number
    pub fn get(&self, order_number: &str) -> Option<Order> {
        self.state.read().orders.get(order_number).cloned()
    }

    /// Look up by order number, server id or folded client temp id
    pub fn resolve(&self, key: &str) -> Option<Order> {
        self.state.read().resolve(key).cloned()
    }

    /// Server id a client temp id was folded into
    pub fn alias_of(&self, temp_id: &str) -> Option<String> {
        self.state.read().aliases.get(temp_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconcile `incoming` with the cached record of the same order number
    pub fn merge(&self, incoming: Order) -> MergeOutcome {
        self.commit(normalize_order(incoming))
    }

    /// Insert a locally created order before the server confirms it.
    ///
    /// A client temp id is generated when missing and a zero version is
    /// stamped with the current time. No-op when the cache already holds a
    /// newer record for the same order number.
    pub fn upsert_optimistic(&self, mut order: Order) -> MergeOutcome {
        if order.client_temp_id.is_none() {
            order.client_temp_id = Some(shared::util::client_temp_id());
        }
        if order.version == 0 && order.updated_at == 0 {
            let now = shared::util::now_millis();
            if order.created_at == 0 {
                order.created_at = now;
            }
            order = order.with_version(now);
        }
        let outcome = self.merge(order);
        if outcome.changed {
            tracing::debug!(
                order_number = %outcome.result.order_number,
                temp_id = ?outcome.result.client_temp_id,
                "Optimistic order recorded"
            );
        }
        outcome
    }

    /// Snapshot of cached orders, optionally only those owned by `owner_ref`.
    ///
    /// Newest first by `created_at`, then by order number.
    pub fn list(&self, owner_ref: Option<&str>) -> OrderList {
        let mut orders: Vec<Order> = self
            .state
            .read()
            .orders
            .values()
            .filter(|o| owner_ref.is_none_or(|owner| o.is_owned_by(owner)))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.order_number.cmp(&b.order_number))
        });
        OrderList { orders }
    }

    /// Rewrite legacy owner spellings on every cached record.
    ///
    /// Run once at session start over restored state. Returns how many
    /// records changed; those are dispatched like any other mutation.
    pub fn repair_owner_refs(&self) -> usize {
        let repaired = {
            let mut state = self.state.write();
            let mut repaired = Vec::new();
            for order in state.orders.values_mut() {
                if order.normalize_owner_ref() {
                    repaired.push(order.clone());
                }
            }
            if repaired.is_empty() {
                return 0;
            }
            self.queue.lock().pending.extend(repaired.iter().cloned());
            repaired.len()
        };

        tracing::info!(count = repaired, "Repaired legacy owner references");
        self.persist();
        self.drain();
        repaired
    }

    /// Replace the whole cache with restored records without dispatching.
    ///
    /// Returns the number of records loaded.
    pub fn restore(&self, persisted: PersistedOrders) -> usize {
        let mut state = self.state.write();
        *state = StoreState::default();
        for order in persisted.records {
            state.index_identity(&order);
            state.orders.insert(order.order_number.clone(), order);
        }
        for (temp_id, id) in persisted.aliases {
            if let Some(order_number) = state.index.get(&id).cloned() {
                state.index.entry(temp_id.clone()).or_insert(order_number);
            }
            state.aliases.insert(temp_id, id);
        }
        let count = state.orders.len();
        tracing::debug!(count, "Order cache restored");
        count
    }

    /// Drop every cached record (logout)
    pub fn clear(&self) {
        *self.state.write() = StoreState::default();
        self.queue.lock().pending.clear();
        tracing::info!("Order cache cleared");
        self.persist();
    }

    fn commit(&self, incoming: Order) -> MergeOutcome {
        let outcome = {
            let mut state = self.state.write();
            let outcome = state.merge(incoming);
            if !outcome.changed {
                return outcome;
            }
            self.queue.lock().pending.push_back(outcome.result.clone());
            outcome
        };
        self.persist();
        self.drain();
        outcome
    }

    /// Write the current state; failures are logged and memory stays authoritative
    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let _save = self.save_lock.lock();
        let snapshot = self.state.read().snapshot();
        if let Err(e) = persistence.save_orders(&snapshot) {
            tracing::warn!(error = %e, "Failed to persist order cache");
        }
    }

    fn drain(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        let _guard = DrainGuard(&self.queue);
        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.pending.pop_front() {
                    Some(order) => order,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            let invoked = self.registry.dispatch(&next);
            tracing::debug!(order_number = %next.order_number, invoked, "Order dispatched");
        }
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStore")
            .field("orders", &self.len())
            .field("registry", &self.registry)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

/// Releases the drain flag if a listener panics
struct DrainGuard<'a>(&'a Mutex<DispatchQueue>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}
