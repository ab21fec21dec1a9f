//! Reactive database handle.
//!
//! `Database` owns the entity store, the subscription engine and the set of
//! batches awaiting server confirmation. It is a cheap clonable handle over
//! `Rc<RefCell<..>>` and lives on a single thread; subscriber callbacks may
//! clone it and read or write from inside a notification.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::models::{EntityId, EntityType, Record};
use crate::store::EntityStore;
use crate::subscription::{
    QueryError, QueryShape, QuerySnapshot, QueryStatus, SubscriptionEngine, SubscriptionId,
};
use crate::sync::{ChangeEvent, SyncError};
use crate::transaction::{
    self, BatchId, BatchSink, Op, OutboundBatch, RollbackPolicy, TransactionError,
    TransactionReceipt, UndoEntry,
};

/// A locally applied batch the server has not confirmed yet.
struct PendingBatch {
    undo: Vec<UndoEntry>,
}

impl PendingBatch {
    fn touches(&self, id: &EntityId) -> bool {
        self.undo.iter().any(|entry| &entry.id == id)
    }

    fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.undo.iter().map(|entry| &entry.id)
    }
}

struct DatabaseInner {
    store: EntityStore,
    engine: SubscriptionEngine,
    status: QueryStatus,
    policy: RollbackPolicy,
    sink: Option<Box<dyn BatchSink>>,
    pending: BTreeMap<BatchId, PendingBatch>,
    /// Latest remote state of records a pending batch touches, applied once
    /// no pending batch touches them
    parked: HashMap<EntityId, ChangeEvent>,
    /// Applied batches not yet handed to the sink, in apply order
    unsent: VecDeque<OutboundBatch>,
    next_batch: u64,
    flushing: bool,
}

#[derive(Clone)]
pub struct Database {
    inner: Rc<RefCell<DatabaseInner>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `subscribe`. Dropping the handle does not cancel the
/// subscription; call `unsubscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    inner: Weak<RefCell<DatabaseInner>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. Safe to call from inside a callback and more than once.
    pub fn unsubscribe(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow_mut().engine.remove(self.id),
            None => false,
        }
    }
}

/// Clears the flushing flag even if a callback unwinds. No borrow of the
/// database may be alive when it drops.
struct FlushGuard<'a> {
    inner: &'a RefCell<DatabaseInner>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.inner.borrow_mut().flushing = false;
    }
}

impl DatabaseInner {
    fn is_protected(&self, id: &EntityId) -> bool {
        self.pending.values().any(|batch| batch.touches(id))
    }

    /// Apply a remote change, or park it while a local batch touching the
    /// same record is unconfirmed.
    fn receive(&mut self, change: ChangeEvent) {
        if self.is_protected(change.id()) {
            self.parked.insert(change.id().clone(), change);
        } else {
            apply_change(&mut self.store, change);
        }
    }

    /// Apply parked remote state for records no pending batch touches anymore.
    fn settle(&mut self, ids: Vec<EntityId>) {
        for id in ids {
            if self.is_protected(&id) {
                continue;
            }
            if let Some(change) = self.parked.remove(&id) {
                apply_change(&mut self.store, change);
            }
        }
    }

    /// Remove and return the pending batches applied after `batch_id` that
    /// build on its records, directly or through each other, in apply order.
    fn take_dependents(&mut self, batch_id: BatchId, batch: &PendingBatch) -> Vec<PendingBatch> {
        let mut ids: HashSet<EntityId> = batch.ids().cloned().collect();
        let mut dependents = Vec::new();
        for (later_id, later) in self
            .pending
            .range((Bound::Excluded(batch_id), Bound::Unbounded))
        {
            if later.ids().any(|id| ids.contains(id)) {
                ids.extend(later.ids().cloned());
                dependents.push(*later_id);
            }
        }
        dependents
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }
}

fn apply_change(store: &mut EntityStore, change: ChangeEvent) {
    match change {
        ChangeEvent::Put(record) => {
            if store.get(record.entity_type(), record.id().as_str()).as_ref() != Some(&record) {
                store.put(record);
            }
        }
        ChangeEvent::Tombstone { entity_type, id } => {
            store.delete(entity_type, &id);
        }
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_policy(RollbackPolicy::default())
    }

    pub fn with_policy(policy: RollbackPolicy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DatabaseInner {
                store: EntityStore::new(),
                engine: SubscriptionEngine::new(),
                status: QueryStatus::Loading,
                policy,
                sink: None,
                pending: BTreeMap::new(),
                parked: HashMap::new(),
                unsent: VecDeque::new(),
                next_batch: 1,
                flushing: false,
            })),
        }
    }

    /// Route applied batches to the remote. Without a sink the database is
    /// local-only and batches are never tracked as pending.
    pub fn set_sink(&self, sink: Box<dyn BatchSink>) {
        self.inner.borrow_mut().sink = Some(sink);
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.inner.borrow().policy
    }

    // ===== Subscriptions =====

    /// Register a live query. The initial snapshot is delivered before this returns.
    pub fn subscribe<F>(&self, shape: QueryShape, callback: F) -> Result<SubscriptionHandle, QueryError>
    where
        F: Fn(&QuerySnapshot) + 'static,
    {
        let initial = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            inner
                .engine
                .register(shape, Rc::new(callback), &inner.store, &inner.status)?
        };
        debug!(subscription = ?initial.id, "subscribed");

        let handle = SubscriptionHandle {
            id: initial.id,
            inner: Rc::downgrade(&self.inner),
        };
        initial.deliver();
        Ok(handle)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().engine.len()
    }

    // ===== Local writes =====

    /// Validate and apply a batch, notify subscribers, then hand the batch to
    /// the sink. Returns without waiting for the server.
    pub fn transact(&self, ops: Vec<Op>) -> Result<TransactionReceipt, TransactionError> {
        let receipt = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;

            transaction::validate(&inner.store, &ops)?;
            let (undo, created) = transaction::apply(&mut inner.store, &ops);

            let batch_id = BatchId(inner.next_batch);
            inner.next_batch += 1;
            debug!(batch = %batch_id, ops = ops.len(), "applied local batch");

            if inner.sink.is_some() {
                inner.pending.insert(batch_id, PendingBatch { undo });
                inner.unsent.push_back(OutboundBatch { batch_id, ops });
            }

            TransactionReceipt { batch_id, created }
        };

        self.flush();
        Ok(receipt)
    }

    // ===== Remote reconciliation =====

    /// The server accepted a batch. Remote changes parked behind it are
    /// applied once no other pending batch touches their records.
    pub fn acknowledge(&self, batch_id: BatchId) {
        {
            let mut inner = self.inner.borrow_mut();
            let Some(batch) = inner.pending.remove(&batch_id) else {
                return;
            };
            debug!(batch = %batch_id, "batch confirmed");
            inner.settle(batch.ids().cloned().collect());
        }
        self.flush();
    }

    /// The server refused a batch or it could not be delivered. Nothing is retried.
    pub fn reject(&self, batch_id: BatchId, error: &SyncError) {
        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            let Some(batch) = inner.pending.remove(&batch_id) else {
                return;
            };
            let mut touched: Vec<EntityId> = batch.ids().cloned().collect();

            match inner.policy {
                RollbackPolicy::Keep => {
                    warn!(batch = %batch_id, "batch failed, keeping local state: {}", error);
                }
                RollbackPolicy::RollBack => {
                    warn!(batch = %batch_id, "batch failed, rolling back: {}", error);
                    // Later batches captured their undo state on top of this
                    // one, so they are unwound first.
                    let dependents = inner.take_dependents(batch_id, &batch);
                    if !dependents.is_empty() {
                        warn!(
                            batch = %batch_id,
                            dependents = dependents.len(),
                            "rolling back later batches built on the failed one"
                        );
                    }
                    for dependent in dependents.iter().rev() {
                        transaction::roll_back(&mut inner.store, &dependent.undo);
                        touched.extend(dependent.ids().cloned());
                    }
                    transaction::roll_back(&mut inner.store, &batch.undo);
                }
            }
            inner.settle(touched);
        }
        self.flush();
    }

    /// Apply an ordered delta from the remote.
    ///
    /// Changes to records touched by an unconfirmed local batch are parked
    /// instead, so an echo of an older batch cannot overwrite a newer
    /// optimistic write.
    pub fn apply_remote(&self, changes: Vec<ChangeEvent>) {
        {
            let mut inner = self.inner.borrow_mut();
            debug!(changes = changes.len(), "applying remote changes");
            for change in changes {
                inner.receive(change);
            }
        }
        self.flush();
    }

    /// Replace local state with a full remote snapshot and mark the database ready.
    ///
    /// Records touched by a batch still awaiting confirmation are left alone
    /// so that unconfirmed writes survive a reconnect; their snapshot state is
    /// parked until those batches resolve.
    pub fn hydrate(&self, records: Vec<Record>) {
        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;

            let protected = |id: &EntityId| inner.pending.values().any(|b| b.touches(id));
            let incoming: HashSet<EntityId> = records.iter().map(|r| r.id().clone()).collect();

            let mut parked: HashMap<EntityId, ChangeEvent> = inner
                .pending
                .values()
                .flat_map(|batch| batch.undo.iter())
                .filter(|entry| !incoming.contains(&entry.id))
                .map(|entry| {
                    let tombstone = ChangeEvent::Tombstone {
                        entity_type: entry.entity_type,
                        id: entry.id.clone(),
                    };
                    (entry.id.clone(), tombstone)
                })
                .collect();

            let stale: Vec<(EntityType, EntityId)> = inner
                .store
                .records()
                .into_iter()
                .filter(|r| !incoming.contains(r.id()) && !protected(r.id()))
                .map(|r| (r.entity_type(), r.id().clone()))
                .collect();
            for (entity_type, id) in &stale {
                inner.store.delete(*entity_type, id);
            }

            let count = records.len();
            for record in records {
                if protected(record.id()) {
                    parked.insert(record.id().clone(), ChangeEvent::Put(record));
                    continue;
                }
                if inner.store.get(record.entity_type(), record.id().as_str()).as_ref()
                    != Some(&record)
                {
                    inner.store.put(record);
                }
            }

            inner.parked = parked;

            info!(records = count, removed = stale.len(), "hydrated from remote snapshot");
            if inner.status != QueryStatus::Ready {
                inner.status = QueryStatus::Ready;
                inner.engine.mark_status_changed();
            }
        }
        self.flush();
    }

    pub fn set_status(&self, status: QueryStatus) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.status == status {
                return;
            }
            inner.status = status;
            inner.engine.mark_status_changed();
        }
        self.flush();
    }

    // ===== Reads =====

    pub fn status(&self) -> QueryStatus {
        self.inner.borrow().status.clone()
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Record> {
        self.inner.borrow().store.get(entity_type, id)
    }

    /// Read the store directly. `f` must not write to this database.
    pub fn with_store<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        f(&self.inner.borrow().store)
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    // ===== Notification =====

    /// Deliver changed snapshots until a round produces none, then hand
    /// queued batches to the sink. Re-entrant calls return immediately; their
    /// writes are picked up by the next round of the outer call.
    fn flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing {
                return;
            }
            inner.flushing = true;
        }
        let _guard = FlushGuard { inner: &self.inner };

        loop {
            let notifications = {
                let mut inner = self.inner.borrow_mut();
                let inner = &mut *inner;
                let invalidations = inner.store.drain_invalidations();
                inner
                    .engine
                    .collect(&invalidations, &inner.store, &inner.status)
            };
            if notifications.is_empty() {
                break;
            }
            for notification in notifications {
                // An earlier callback in this round may have unsubscribed it.
                if self.inner.borrow().engine.is_active(notification.id) {
                    notification.deliver();
                }
            }
        }

        let unsent: Vec<OutboundBatch> = self.inner.borrow_mut().unsent.drain(..).collect();
        if unsent.is_empty() {
            return;
        }
        let inner = self.inner.borrow();
        if let Some(sink) = &inner.sink {
            for batch in unsent {
                sink.submit(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageFields, InteractionFields, InteractionKind, UserIdentity};
    use crate::subscription::Filter;
    use crate::transaction::interaction_on;
    use std::cell::Cell;

    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Rc<RefCell<Vec<OutboundBatch>>>,
    }

    impl BatchSink for RecordingSink {
        fn submit(&self, batch: OutboundBatch) {
            self.batches.borrow_mut().push(batch);
        }
    }

    fn user(id: &str) -> UserIdentity {
        UserIdentity {
            id: id.to_string(),
            display_name: format!("user {}", id),
            color_tag: "#3B82F6".to_string(),
        }
    }

    fn image_op(created_at: u64) -> Op {
        Op::create_image(ImageFields {
            external_id: format!("ext-{}", created_at),
            url: format!("https://img.example/{}.jpg", created_at),
            alt_text: "Untitled".to_string(),
            created_at,
        })
    }

    fn create_image(db: &Database, created_at: u64) -> EntityId {
        db.transact(vec![image_op(created_at)]).unwrap().created[0].clone()
    }

    fn react(db: &Database, image_id: &EntityId, author: &UserIdentity, emoji: &str) -> EntityId {
        let fields = InteractionFields::authored_by(author, InteractionKind::Reaction, emoji, 10);
        let (id, ops) = interaction_on(image_id, fields);
        db.transact(ops).unwrap();
        id
    }

    /// Subscribe and count callbacks, keeping the latest snapshot.
    fn watch(
        db: &Database,
        shape: QueryShape,
    ) -> (
        SubscriptionHandle,
        Rc<Cell<usize>>,
        Rc<RefCell<Option<QuerySnapshot>>>,
    ) {
        let calls = Rc::new(Cell::new(0));
        let latest = Rc::new(RefCell::new(None));
        let (c, l) = (calls.clone(), latest.clone());
        let handle = db
            .subscribe(shape, move |snapshot| {
                c.set(c.get() + 1);
                *l.borrow_mut() = Some(snapshot.clone());
            })
            .unwrap();
        (handle, calls, latest)
    }

    #[test]
    fn test_read_your_writes_before_confirmation() {
        let db = Database::new();
        let sink = RecordingSink::default();
        db.set_sink(Box::new(sink.clone()));
        let (_handle, calls, latest) = watch(&db, QueryShape::gallery());

        let id = create_image(&db, 1);

        assert!(db.get(EntityType::Image, id.as_str()).is_some());
        assert_eq!(calls.get(), 2);
        assert_eq!(latest.borrow().as_ref().unwrap().result.len(), 1);
        assert_eq!(db.pending_batches(), 1);
        assert_eq!(sink.batches.borrow().len(), 1);
    }

    #[test]
    fn test_every_batch_reaches_sink_and_notifies() {
        let db = Database::new();
        let sink = RecordingSink::default();
        db.set_sink(Box::new(sink.clone()));
        let (_handle, calls, latest) = watch(&db, QueryShape::images());

        create_image(&db, 1);
        create_image(&db, 2);

        assert_eq!(sink.batches.borrow().len(), 2);
        assert_eq!(calls.get(), 3);
        assert_eq!(latest.borrow().as_ref().unwrap().result.len(), 2);
        assert!(!db.inner.borrow().flushing);
    }

    #[test]
    fn test_initial_snapshot_is_synchronous() {
        let db = Database::new();
        create_image(&db, 1);
        let (_handle, calls, latest) = watch(&db, QueryShape::images());
        assert_eq!(calls.get(), 1);
        let snapshot = latest.borrow().clone().unwrap();
        assert_eq!(snapshot.status, QueryStatus::Loading);
        assert_eq!(snapshot.result.len(), 1);
    }

    #[test]
    fn test_malformed_shape_rejected_at_subscribe() {
        let db = Database::new();
        let shape = QueryShape::images().filter(Filter::Author("a".to_string()));
        assert!(db.subscribe(shape, |_| {}).is_err());
        assert_eq!(db.subscription_count(), 0);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let db = Database::new();
        create_image(&db, 1);
        let before = db.with_store(|s| s.records());
        let (_handle, calls, _) = watch(&db, QueryShape::gallery());

        db.transact(vec![Op::delete(EntityType::Interaction, EntityId::from("missing"))])
            .unwrap();

        assert_eq!(db.with_store(|s| s.records()), before);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_rebuilt_link_graph_matches_live() {
        let db = Database::new();
        let alice = user("alice");
        let img1 = create_image(&db, 1);
        let img2 = create_image(&db, 2);
        let r1 = react(&db, &img1, &alice, "🔥");
        react(&db, &img1, &alice, "❤️");
        react(&db, &img2, &alice, "🔥");
        db.transact(vec![Op::delete(EntityType::Interaction, r1)]).unwrap();
        db.transact(vec![Op::delete(EntityType::Image, img2)]).unwrap();

        db.with_store(|s| {
            assert_eq!(s.link_graph(), &s.rebuilt_link_graph());
            assert_eq!(s.link_graph().children_of(img1.as_str()).len(), 1);
        });
    }

    #[test]
    fn test_interaction_on_other_image_does_not_notify() {
        let db = Database::new();
        let alice = user("alice");
        let x = create_image(&db, 1);
        let y = create_image(&db, 2);
        let (_handle, calls, _) = watch(&db, QueryShape::focused_image(x.clone()));

        react(&db, &y, &alice, "🔥");
        assert_eq!(calls.get(), 1);

        react(&db, &x, &alice, "🔥");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_one_callback_per_batch() {
        let db = Database::new();
        let alice = user("alice");
        let (_handle, calls, latest) = watch(&db, QueryShape::gallery());

        let image = image_op(1);
        let image_id = image.target_id().clone();
        let fields = InteractionFields::authored_by(&alice, InteractionKind::Comment, "nice", 2);
        let (_, mut ops) = interaction_on(&image_id, fields);
        ops.insert(0, image);
        db.transact(ops).unwrap();

        assert_eq!(calls.get(), 2);
        let snapshot = latest.borrow().clone().unwrap();
        assert_eq!(snapshot.result.images()[0].interactions.len(), 1);
    }

    #[test]
    fn test_react_then_delete_by_other_author() {
        let db = Database::new();
        let alice = user("alice");
        let bob = user("bob");
        let img1 = create_image(&db, 1);
        let (_focused, focused_calls, focused) = watch(&db, QueryShape::focused_image(img1.clone()));
        let (_feed, _, feed) = watch(&db, QueryShape::activity_feed());

        let i1 = react(&db, &img1, &alice, "🔥");
        assert_eq!(focused_calls.get(), 2);
        {
            let snapshot = focused.borrow().clone().unwrap();
            let node = &snapshot.result.images()[0];
            assert_eq!(node.interactions.len(), 1);
            assert_eq!(node.interactions[0].id, i1);
            assert_eq!(node.interactions[0].author_id, "alice");
            let feed = feed.borrow().clone().unwrap();
            assert_eq!(feed.result.interactions()[0].image.as_ref().map(|i| &i.id), Some(&img1));
        }

        let interaction = db.with_store(|s| s.interaction(i1.as_str()).cloned()).unwrap();
        assert!(!interaction.is_deletable_by(&bob));
        db.transact(vec![Op::delete(EntityType::Interaction, i1)]).unwrap();

        assert_eq!(focused_calls.get(), 3);
        assert!(focused.borrow().as_ref().unwrap().result.images()[0].interactions.is_empty());
        assert!(feed.borrow().as_ref().unwrap().result.is_empty());
    }

    #[test]
    fn test_deleted_image_orphans_interactions() {
        let db = Database::new();
        let alice = user("alice");
        let img = create_image(&db, 1);
        let comment = react(&db, &img, &alice, "❤️");
        let (_feed, _, feed) = watch(&db, QueryShape::activity_feed());

        db.transact(vec![Op::delete(EntityType::Image, img)]).unwrap();

        let snapshot = feed.borrow().clone().unwrap();
        let node = &snapshot.result.interactions()[0];
        assert_eq!(node.interaction.id, comment);
        assert!(node.image.is_none());
        assert!(node.interaction.image_id.is_none());
    }

    #[test]
    fn test_write_from_callback_is_delivered_next_round() {
        let db = Database::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (writer, record) = (db.clone(), seen.clone());
        let _handle = db
            .subscribe(QueryShape::images(), move |snapshot| {
                let count = snapshot.result.len();
                record.borrow_mut().push(count);
                if count == 1 {
                    writer.transact(vec![image_op(2)]).unwrap();
                }
            })
            .unwrap();

        create_image(&db, 1);

        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(db.with_store(|s| s.image_count()), 2);
    }

    #[test]
    fn test_nested_batches_reach_sink_in_apply_order() {
        let db = Database::new();
        let sink = RecordingSink::default();
        db.set_sink(Box::new(sink.clone()));
        let writer = db.clone();
        let _handle = db
            .subscribe(QueryShape::images(), move |snapshot| {
                if snapshot.result.len() == 1 {
                    writer.transact(vec![image_op(2)]).unwrap();
                }
            })
            .unwrap();

        create_image(&db, 1);

        let ids: Vec<u64> = sink.batches.borrow().iter().map(|b| b.batch_id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let db = Database::new();
        let (handle, calls, _) = watch(&db, QueryShape::images());

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        create_image(&db, 1);

        assert_eq!(calls.get(), 1);
        assert_eq!(db.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_inside_callback() {
        let db = Database::new();
        let calls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<SubscriptionHandle>>> = Rc::new(RefCell::new(None));
        let (c, s) = (calls.clone(), slot.clone());
        let handle = db
            .subscribe(QueryShape::images(), move |_| {
                c.set(c.get() + 1);
                if let Some(handle) = s.borrow().as_ref() {
                    handle.unsubscribe();
                }
            })
            .unwrap();
        *slot.borrow_mut() = Some(handle);

        create_image(&db, 1);
        create_image(&db, 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_structural_error_leaves_state_untouched() {
        let db = Database::new();
        let sink = RecordingSink::default();
        db.set_sink(Box::new(sink.clone()));
        let alice = user("alice");
        let (_handle, calls, _) = watch(&db, QueryShape::interactions());

        let fields = InteractionFields::authored_by(&alice, InteractionKind::Reaction, "🔥", 1);
        let (_, ops) = interaction_on(&EntityId::from("no-such-image"), fields);
        let err = db.transact(ops).unwrap_err();

        assert!(matches!(err, TransactionError::MissingImage { index: 1, .. }));
        assert!(db.with_store(|s| s.is_empty()));
        assert_eq!(calls.get(), 1);
        assert!(sink.batches.borrow().is_empty());
    }

    #[test]
    fn test_rejected_batch_kept_by_default() {
        let db = Database::new();
        db.set_sink(Box::new(RecordingSink::default()));
        let receipt = db.transact(vec![image_op(1)]).unwrap();

        db.reject(receipt.batch_id, &SyncError::Unavailable("offline".to_string()));

        assert_eq!(db.with_store(|s| s.image_count()), 1);
        assert_eq!(db.pending_batches(), 0);
    }

    #[test]
    fn test_rejected_batch_rolled_back_when_configured() {
        let db = Database::with_policy(RollbackPolicy::RollBack);
        db.set_sink(Box::new(RecordingSink::default()));
        let alice = user("alice");
        let img = create_image(&db, 1);
        db.acknowledge(BatchId(1));
        let (_handle, calls, latest) = watch(&db, QueryShape::focused_image(img.clone()));

        let fields = InteractionFields::authored_by(&alice, InteractionKind::Reaction, "🔥", 2);
        let (_, ops) = interaction_on(&img, fields);
        let receipt = db.transact(ops).unwrap();
        assert_eq!(calls.get(), 2);

        db.reject(receipt.batch_id, &SyncError::Rejected("nope".to_string()));

        assert_eq!(calls.get(), 3);
        assert!(latest.borrow().as_ref().unwrap().result.images()[0].interactions.is_empty());
        db.with_store(|s| {
            assert_eq!(s.interaction_count(), 0);
            assert_eq!(s.link_graph(), &s.rebuilt_link_graph());
        });
    }

    #[test]
    fn test_overlapping_rejected_batches_roll_back_together() {
        for reverse in [false, true] {
            let db = Database::with_policy(RollbackPolicy::RollBack);
            db.set_sink(Box::new(RecordingSink::default()));
            let alice = user("alice");
            let img = create_image(&db, 1);
            db.acknowledge(BatchId(1));
            let (_handle, _, latest) = watch(&db, QueryShape::focused_image(img.clone()));

            let i1 = react(&db, &img, &alice, "🔥");
            db.transact(vec![Op::delete(EntityType::Interaction, i1.clone())])
                .unwrap();

            let offline = SyncError::Unavailable("offline".to_string());
            let order = if reverse { [3, 2] } else { [2, 3] };
            for batch_id in order {
                db.reject(BatchId(batch_id), &offline);
            }

            assert!(db.get(EntityType::Interaction, i1.as_str()).is_none());
            assert_eq!(db.pending_batches(), 0);
            assert!(latest.borrow().as_ref().unwrap().result.images()[0].interactions.is_empty());
            db.with_store(|s| assert_eq!(s.link_graph(), &s.rebuilt_link_graph()));
        }
    }

    #[test]
    fn test_rollback_leaves_unrelated_batches_pending() {
        let db = Database::with_policy(RollbackPolicy::RollBack);
        db.set_sink(Box::new(RecordingSink::default()));
        let first = create_image(&db, 1);
        let second = create_image(&db, 2);

        db.reject(BatchId(1), &SyncError::Rejected("nope".to_string()));

        assert!(db.get(EntityType::Image, first.as_str()).is_none());
        assert!(db.get(EntityType::Image, second.as_str()).is_some());
        assert_eq!(db.pending_batches(), 1);
    }

    #[test]
    fn test_acknowledge_unknown_batch_is_ignored() {
        let db = Database::new();
        db.acknowledge(BatchId(42));
        db.reject(BatchId(42), &SyncError::Disconnected);
        assert_eq!(db.pending_batches(), 0);
    }

    #[test]
    fn test_echo_of_own_write_does_not_notify() {
        let db = Database::new();
        let id = create_image(&db, 1);
        let (_handle, calls, _) = watch(&db, QueryShape::gallery());

        let record = db.get(EntityType::Image, id.as_str()).unwrap();
        db.apply_remote(vec![ChangeEvent::Put(record)]);

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_remote_changes_apply_in_order() {
        let db = Database::new();
        let (_handle, _, latest) = watch(&db, QueryShape::images());
        let remote = Database::new();
        let id = create_image(&remote, 1);
        let record = remote.get(EntityType::Image, id.as_str()).unwrap();

        db.apply_remote(vec![
            ChangeEvent::Put(record),
            ChangeEvent::Tombstone {
                entity_type: EntityType::Image,
                id: id.clone(),
            },
        ]);

        assert!(db.get(EntityType::Image, id.as_str()).is_none());
        assert!(latest.borrow().as_ref().unwrap().result.is_empty());
    }

    #[test]
    fn test_older_echo_does_not_undo_pending_delete() {
        let db = Database::new();
        db.set_sink(Box::new(RecordingSink::default()));
        let alice = user("alice");
        let img = create_image(&db, 1);
        db.acknowledge(BatchId(1));

        let i1 = react(&db, &img, &alice, "🔥");
        let echo = db.get(EntityType::Interaction, i1.as_str()).unwrap();
        db.transact(vec![Op::delete(EntityType::Interaction, i1.clone())])
            .unwrap();
        let (_handle, calls, latest) = watch(&db, QueryShape::focused_image(img.clone()));

        db.apply_remote(vec![ChangeEvent::Put(echo)]);
        db.acknowledge(BatchId(2));

        assert!(db.get(EntityType::Interaction, i1.as_str()).is_none());
        assert_eq!(calls.get(), 1);

        db.apply_remote(vec![ChangeEvent::Tombstone {
            entity_type: EntityType::Interaction,
            id: i1.clone(),
        }]);
        db.acknowledge(BatchId(3));

        assert!(db.get(EntityType::Interaction, i1.as_str()).is_none());
        assert_eq!(calls.get(), 1);
        assert!(latest.borrow().as_ref().unwrap().result.images()[0].interactions.is_empty());
        assert_eq!(db.pending_batches(), 0);
        assert!(db.inner.borrow().parked.is_empty());
    }

    #[test]
    fn test_parked_remote_change_applies_once_batch_confirmed() {
        let db = Database::new();
        db.set_sink(Box::new(RecordingSink::default()));
        let alice = user("alice");
        let img = create_image(&db, 1);
        db.acknowledge(BatchId(1));
        let i1 = react(&db, &img, &alice, "🔥");
        let (_handle, calls, latest) = watch(&db, QueryShape::focused_image(img.clone()));

        // Our echo, then another session removes the reaction.
        let echo = db.get(EntityType::Interaction, i1.as_str()).unwrap();
        db.apply_remote(vec![
            ChangeEvent::Put(echo),
            ChangeEvent::Tombstone {
                entity_type: EntityType::Interaction,
                id: i1.clone(),
            },
        ]);
        assert!(db.get(EntityType::Interaction, i1.as_str()).is_some());
        assert_eq!(calls.get(), 1);

        db.acknowledge(BatchId(2));

        assert!(db.get(EntityType::Interaction, i1.as_str()).is_none());
        assert_eq!(calls.get(), 2);
        assert!(latest.borrow().as_ref().unwrap().result.images()[0].interactions.is_empty());
    }

    #[test]
    fn test_status_change_notifies_once() {
        let db = Database::new();
        let (_handle, calls, latest) = watch(&db, QueryShape::images());

        db.set_status(QueryStatus::Error("stream closed".to_string()));
        db.set_status(QueryStatus::Error("stream closed".to_string()));

        assert_eq!(calls.get(), 2);
        assert_eq!(
            latest.borrow().as_ref().unwrap().status,
            QueryStatus::Error("stream closed".to_string())
        );
    }

    #[test]
    fn test_hydrate_replaces_state_but_keeps_pending_writes() {
        let remote = Database::new();
        let confirmed = create_image(&remote, 1);
        let snapshot = remote.with_store(|s| s.records());

        let db = Database::new();
        db.set_sink(Box::new(RecordingSink::default()));
        let stale = create_image(&db, 2);
        db.acknowledge(BatchId(1));
        let unconfirmed = create_image(&db, 3);
        let (_handle, calls, latest) = watch(&db, QueryShape::images());

        db.hydrate(snapshot);

        assert_eq!(calls.get(), 2);
        assert_eq!(db.status(), QueryStatus::Ready);
        assert_eq!(latest.borrow().as_ref().unwrap().status, QueryStatus::Ready);
        assert!(db.get(EntityType::Image, confirmed.as_str()).is_some());
        assert!(db.get(EntityType::Image, unconfirmed.as_str()).is_some());
        assert!(db.get(EntityType::Image, stale.as_str()).is_none());
    }
}
