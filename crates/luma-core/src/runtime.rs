use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::database::Database;
use crate::identity::IdentityStore;
use crate::models::{
    now_millis, EntityId, EntityType, InteractionFields, InteractionKind, UserIdentity,
};
use crate::pagination::{ingest_ops, FetchRequestId, PaginationCoordinator, PaginationState};
use crate::source::{ImageSource, PhotoCandidate};
use crate::subscription::QueryStatus;
use crate::sync::{DataChange, RemoteChannel, SyncCommand, SyncWorker};
use crate::transaction::{interaction_on, BatchSink, Op, OutboundBatch, TransactionError};

#[derive(Clone)]
pub struct CoreHandle {
    command_tx: Sender<SyncCommand>,
}

impl CoreHandle {
    pub(crate) fn new(command_tx: Sender<SyncCommand>) -> Self {
        Self { command_tx }
    }

    pub fn send(&self, command: SyncCommand) -> Result<(), mpsc::SendError<SyncCommand>> {
        self.command_tx.send(command)
    }
}

impl BatchSink for CoreHandle {
    fn submit(&self, batch: OutboundBatch) {
        let batch_id = batch.batch_id;
        if self.send(SyncCommand::Submit(batch)).is_err() {
            warn!(batch = %batch_id, "sync worker is gone; batch not sent");
        }
    }
}

/// Owns the database, the identity and the sync worker thread.
///
/// Lives on the thread that renders; `process_pending` must be called from
/// that thread to apply whatever the worker has reported.
pub struct CoreRuntime {
    config: CoreConfig,
    db: Database,
    identity: UserIdentity,
    pagination: PaginationCoordinator,
    seed_in_flight: Option<FetchRequestId>,
    data_rx: Receiver<DataChange>,
    handle: CoreHandle,
    worker_handle: Option<JoinHandle<()>>,
}

impl CoreRuntime {
    pub fn new(
        config: CoreConfig,
        remote: Arc<dyn RemoteChannel>,
        source: Arc<dyn ImageSource>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;
        let identity = IdentityStore::load_or_create(&config.data_dir)
            .context("Failed to load identity")?
            .identity()
            .clone();

        let (command_tx, command_rx) = mpsc::channel::<SyncCommand>();
        let (data_tx, data_rx) = mpsc::channel::<DataChange>();
        let handle = CoreHandle::new(command_tx);

        let db = Database::with_policy(config.rollback_policy());
        db.set_sink(Box::new(handle.clone()));

        let worker = SyncWorker::new(remote, source, data_tx, command_rx);
        let worker_handle = std::thread::Builder::new()
            .name("luma-sync".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn sync worker")?;

        info!(user = %identity.id, name = %identity.display_name, "core runtime started");

        Ok(Self {
            pagination: PaginationCoordinator::new(config.page_size, config.fetch_cooldown()),
            config,
            db,
            identity,
            seed_in_flight: None,
            data_rx,
            handle,
            worker_handle: Some(worker_handle),
        })
    }

    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    pub fn database(&self) -> Database {
        self.db.clone()
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pagination_state(&mut self) -> PaginationState {
        self.pagination.poll(Instant::now())
    }

    pub fn is_seeding(&self) -> bool {
        self.seed_in_flight.is_some()
    }

    /// Apply everything the worker has reported so far. Returns the number of
    /// changes handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(change) = self.data_rx.try_recv() {
            self.handle_change(change);
            handled += 1;
        }
        handled
    }

    fn handle_change(&mut self, change: DataChange) {
        match change {
            DataChange::Snapshot(records) => self.db.hydrate(records),
            DataChange::Changes(changes) => self.db.apply_remote(changes),
            DataChange::BatchAcked(batch_id) => self.db.acknowledge(batch_id),
            DataChange::BatchFailed { batch_id, error } => self.db.reject(batch_id, &error),
            DataChange::ImagesFetched { request_id, photos } => {
                self.finish_fetch(request_id, photos);
            }
            DataChange::FetchFailed { request_id, error } => {
                warn!(request = request_id.0, "image fetch failed: {}", error);
                self.finish_fetch(request_id, Vec::new());
            }
            DataChange::ConnectionFailed { error } => {
                warn!("remote connection failed: {}", error);
                self.db.set_status(QueryStatus::Error(error.to_string()));
            }
        }
    }

    fn finish_fetch(&mut self, request_id: FetchRequestId, photos: Vec<PhotoCandidate>) {
        if self.seed_in_flight == Some(request_id) {
            self.seed_in_flight = None;
        } else if !self.pagination.finish(request_id, Instant::now()) {
            debug!(request = request_id.0, "ignoring stale fetch result");
            return;
        }

        if photos.is_empty() {
            return;
        }
        let count = photos.len();
        match self.db.transact(ingest_ops(photos, now_millis())) {
            Ok(_) => info!(images = count, "ingested fetched images"),
            Err(e) => warn!("Failed to ingest fetched images: {}", e),
        }
    }

    // ===== User actions =====

    pub fn react(&self, image_id: &EntityId, emoji: &str) -> Result<EntityId, TransactionError> {
        self.interact(image_id, InteractionKind::Reaction, emoji)
    }

    pub fn comment(&self, image_id: &EntityId, text: &str) -> Result<EntityId, TransactionError> {
        self.interact(image_id, InteractionKind::Comment, text.trim())
    }

    fn interact(
        &self,
        image_id: &EntityId,
        kind: InteractionKind,
        content: &str,
    ) -> Result<EntityId, TransactionError> {
        let fields = InteractionFields::authored_by(&self.identity, kind, content, now_millis());
        let (id, ops) = interaction_on(image_id, fields);
        self.db.transact(ops)?;
        Ok(id)
    }

    /// Delete an interaction. Not restricted to the author; see
    /// `Interaction::is_deletable_by` for the presentation rule.
    pub fn delete_interaction(&self, id: &EntityId) -> Result<(), TransactionError> {
        self.db
            .transact(vec![Op::delete(EntityType::Interaction, id.clone())])
            .map(|_| ())
    }

    /// Proximity signal from the end of the gallery. Returns true when a page fetch started.
    pub fn load_more(&mut self, now: Instant) -> bool {
        let loaded = self.db.with_store(|store| store.image_count());
        let Some(request) = self.pagination.on_proximity(now, loaded) else {
            return false;
        };

        let command = SyncCommand::FetchImages {
            request_id: request.request_id,
            count: request.count,
        };
        if self.handle.send(command).is_err() {
            warn!("sync worker is gone; page fetch not started");
            self.pagination.finish(request.request_id, now);
            return false;
        }
        true
    }

    /// Fetch `seed_count` images regardless of pagination. At most one seed runs at a time.
    pub fn seed(&mut self) -> bool {
        if self.seed_in_flight.is_some() {
            return false;
        }

        let request_id = self.pagination.allocate_request_id();
        let command = SyncCommand::FetchImages {
            request_id,
            count: self.config.seed_count,
        };
        if self.handle.send(command).is_err() {
            warn!("sync worker is gone; seed not started");
            return false;
        }
        self.seed_in_flight = Some(request_id);
        true
    }

    pub fn shutdown(&mut self) {
        let _ = self.handle.send(SyncCommand::Shutdown);
        if let Some(worker_handle) = self.worker_handle.take() {
            let _ = worker_handle.join();
        }
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticImageSource;
    use crate::subscription::QueryShape;
    use crate::sync::MemoryHub;
    use async_trait::async_trait;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct CountingSource {
        inner: StaticImageSource,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ImageSource for CountingSource {
        async fn fetch_random(&self, count: usize) -> anyhow::Result<Vec<PhotoCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_random(count).await
        }
    }

    fn start(hub: &MemoryHub, rollback: bool) -> (TempDir, CoreRuntime) {
        let dir = tempdir().unwrap();
        let mut config = CoreConfig::new(dir.path());
        config.rollback_on_failure = rollback;
        let runtime = CoreRuntime::new(
            config,
            Arc::new(hub.clone()),
            Arc::new(StaticImageSource::placeholder(4)),
        )
        .unwrap();
        (dir, runtime)
    }

    /// Drain worker results until `done` holds or a few seconds pass.
    fn wait_until(runtime: &mut CoreRuntime, done: impl Fn(&CoreRuntime) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            runtime.process_pending();
            if done(runtime) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn images(runtime: &CoreRuntime) -> usize {
        runtime.db.with_store(|s| s.image_count())
    }

    fn interactions(runtime: &CoreRuntime) -> usize {
        runtime.db.with_store(|s| s.interaction_count())
    }

    fn settled(runtime: &CoreRuntime) -> bool {
        runtime.db.pending_batches() == 0
    }

    #[test]
    fn test_hydrates_and_becomes_ready() {
        let hub = MemoryHub::new();
        let (_dir, mut runtime) = start(&hub, false);
        assert!(wait_until(&mut runtime, |r| r.db.status() == QueryStatus::Ready));
        assert_eq!(images(&runtime), 0);
    }

    #[test]
    fn test_two_sessions_see_each_others_writes() {
        let hub = MemoryHub::new();
        let (_dir_a, mut alice) = start(&hub, false);
        let (_dir_b, mut bob) = start(&hub, false);
        assert!(wait_until(&mut alice, |r| r.db.status() == QueryStatus::Ready));
        assert!(wait_until(&mut bob, |r| r.db.status() == QueryStatus::Ready));

        assert!(alice.seed());
        assert!(!alice.seed());
        assert!(wait_until(&mut alice, |r| images(r) == 10 && settled(r)));
        assert!(wait_until(&mut bob, |r| images(r) == 10));

        let image_id = bob.db.with_store(|s| s.images().next().map(|i| i.id.clone())).unwrap();
        let reaction = bob.react(&image_id, "🔥").unwrap();
        assert_eq!(interactions(&bob), 1);
        assert!(wait_until(&mut alice, |r| r
            .db
            .with_store(|s| s.interactions_of(image_id.as_str()).len() == 1)));

        alice.delete_interaction(&reaction).unwrap();
        assert!(wait_until(&mut bob, |r| interactions(r) == 0));
        assert!(wait_until(&mut alice, settled));
    }

    #[test]
    fn test_subscription_sees_remote_writes() {
        let hub = MemoryHub::new();
        let (_dir_a, mut alice) = start(&hub, false);
        let (_dir_b, mut bob) = start(&hub, false);
        assert!(wait_until(&mut alice, |r| r.db.status() == QueryStatus::Ready));

        let feed_len = Rc::new(Cell::new(0));
        let seen = feed_len.clone();
        let _feed = alice
            .database()
            .subscribe(QueryShape::activity_feed(), move |snapshot| {
                seen.set(snapshot.result.len())
            })
            .unwrap();

        bob.seed();
        assert!(wait_until(&mut bob, |r| images(r) == 10 && settled(r)));
        let image_id = bob.db.with_store(|s| s.images().next().map(|i| i.id.clone())).unwrap();
        bob.comment(&image_id, "  lovely light  ").unwrap();

        assert!(wait_until(&mut alice, |_| feed_len.get() == 1));
        let comment = alice
            .db
            .with_store(|s| s.interactions().next().cloned())
            .unwrap();
        assert_eq!(comment.content, "lovely light");
        assert_eq!(comment.author_id, bob.identity().id);
    }

    #[test]
    fn test_two_proximity_signals_fetch_once() {
        let hub = MemoryHub::new();
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: StaticImageSource::placeholder(4),
            calls: calls.clone(),
        };
        let mut runtime =
            CoreRuntime::new(CoreConfig::new(dir.path()), Arc::new(hub), Arc::new(source)).unwrap();

        let now = Instant::now();
        assert!(!runtime.load_more(now));

        runtime.seed();
        assert!(wait_until(&mut runtime, |r| images(r) == 10));

        let now = Instant::now();
        assert!(runtime.load_more(now));
        assert!(!runtime.load_more(now + Duration::from_millis(5)));
        assert_eq!(runtime.pagination_state(), PaginationState::Fetching);
        assert!(wait_until(&mut runtime, |r| images(r) == 16));
        assert!(!runtime.load_more(Instant::now()));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_batch_kept_by_default() {
        let hub = MemoryHub::new();
        let (_dir, mut runtime) = start(&hub, false);
        runtime.seed();
        assert!(wait_until(&mut runtime, |r| images(r) == 10 && settled(r)));

        hub.set_available(false);
        let image_id = runtime.db.with_store(|s| s.images().next().map(|i| i.id.clone())).unwrap();
        runtime.react(&image_id, "❤️").unwrap();
        assert!(wait_until(&mut runtime, settled));

        assert_eq!(interactions(&runtime), 1);
        assert!(hub.records().iter().all(|r| r.entity_type() == EntityType::Image));
    }

    #[test]
    fn test_failed_batch_rolled_back_when_configured() {
        let hub = MemoryHub::new();
        let (_dir, mut runtime) = start(&hub, true);
        runtime.seed();
        assert!(wait_until(&mut runtime, |r| images(r) == 10 && settled(r)));

        hub.set_available(false);
        let image_id = runtime.db.with_store(|s| s.images().next().map(|i| i.id.clone())).unwrap();
        runtime.react(&image_id, "❤️").unwrap();
        assert_eq!(interactions(&runtime), 1);
        assert!(wait_until(&mut runtime, settled));

        assert_eq!(interactions(&runtime), 0);
    }

    #[test]
    fn test_blank_comment_rejected_locally() {
        let hub = MemoryHub::new();
        let (_dir, mut runtime) = start(&hub, false);
        runtime.seed();
        assert!(wait_until(&mut runtime, |r| images(r) == 10));
        let image_id = runtime.db.with_store(|s| s.images().next().map(|i| i.id.clone())).unwrap();

        let err = runtime.comment(&image_id, "   ").unwrap_err();
        assert!(matches!(err, TransactionError::BlankContent { .. }));
        assert_eq!(interactions(&runtime), 0);
    }

    #[test]
    fn test_unreachable_remote_sets_error_status() {
        let hub = MemoryHub::new();
        hub.set_available(false);
        let (_dir, mut runtime) = start(&hub, false);

        assert!(wait_until(&mut runtime, |r| matches!(r.db.status(), QueryStatus::Error(_))));
    }

    #[test]
    fn test_identity_survives_restart() {
        let hub = MemoryHub::new();
        let dir = tempdir().unwrap();
        let source: Arc<dyn ImageSource> = Arc::new(StaticImageSource::placeholder(1));

        let first = CoreRuntime::new(CoreConfig::new(dir.path()), Arc::new(hub.clone()), source.clone())
            .unwrap()
            .identity()
            .clone();
        let second = CoreRuntime::new(CoreConfig::new(dir.path()), Arc::new(hub), source)
            .unwrap()
            .identity()
            .clone();

        assert_eq!(first, second);
    }
}
