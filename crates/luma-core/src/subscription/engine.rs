use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::trace;

use crate::store::{EntityStore, Invalidation};
use crate::subscription::{QueryError, QueryResult, QueryShape, QuerySnapshot, QueryStatus};

pub type SubscriptionCallback = Rc<dyn Fn(&QuerySnapshot)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    shape: QueryShape,
    callback: SubscriptionCallback,
    last_delivered: QuerySnapshot,
}

/// A snapshot ready to hand to a subscriber.
///
/// Built while the store is borrowed, invoked after the borrow is released so
/// that callbacks may read or write the database.
pub struct Notification {
    pub id: SubscriptionId,
    pub callback: SubscriptionCallback,
    pub snapshot: QuerySnapshot,
}

impl Notification {
    pub fn deliver(&self) {
        (self.callback)(&self.snapshot);
    }
}

/// Registered queries and the last snapshot each subscriber was given.
#[derive(Default)]
pub struct SubscriptionEngine {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_id: u64,
    status_changed: bool,
}

impl SubscriptionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a query, returning the initial snapshot to deliver.
    pub fn register(
        &mut self,
        shape: QueryShape,
        callback: SubscriptionCallback,
        store: &EntityStore,
        status: &QueryStatus,
    ) -> Result<Notification, QueryError> {
        shape.validate()?;

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let snapshot = QuerySnapshot {
            status: status.clone(),
            result: QueryResult::evaluate(&shape, store),
        };
        self.subscriptions.insert(
            id,
            Subscription {
                shape,
                callback: callback.clone(),
                last_delivered: snapshot.clone(),
            },
        );

        Ok(Notification {
            id,
            callback,
            snapshot,
        })
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Force every subscription to be recomputed on the next collect.
    pub fn mark_status_changed(&mut self) {
        self.status_changed = true;
    }

    /// Recompute the subscriptions touched by `invalidations` against one
    /// store state and return those whose snapshot changed by value.
    pub fn collect(
        &mut self,
        invalidations: &[Invalidation],
        store: &EntityStore,
        status: &QueryStatus,
    ) -> Vec<Notification> {
        let recompute_all = std::mem::take(&mut self.status_changed);
        if invalidations.is_empty() && !recompute_all {
            return Vec::new();
        }

        let mut notifications = Vec::new();
        for (id, subscription) in self.subscriptions.iter_mut() {
            let affected = recompute_all
                || invalidations
                    .iter()
                    .any(|invalidation| subscription.shape.is_affected_by(invalidation));
            if !affected {
                continue;
            }

            let snapshot = QuerySnapshot {
                status: status.clone(),
                result: QueryResult::evaluate(&subscription.shape, store),
            };
            if snapshot == subscription.last_delivered {
                continue;
            }

            trace!(subscription = id.0, items = snapshot.result.len(), "query result changed");
            subscription.last_delivered = snapshot.clone();
            notifications.push(Notification {
                id: *id,
                callback: subscription.callback.clone(),
                snapshot,
            });
        }
        notifications
    }
}
