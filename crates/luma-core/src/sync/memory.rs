//! In-process stand-in for the hosted realtime database.
//!
//! Holds the authoritative state in an `EntityStore`, validates and applies
//! submitted batches in arrival order, and broadcasts the resulting changes to
//! every open stream, the submitting session's included.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::debug;

use crate::models::Record;
use crate::store::EntityStore;
use crate::sync::{ChangeEvent, ChangeStream, InboundMessage, RemoteChannel, SyncError};
use crate::transaction::{self, OutboundBatch};

struct HubState {
    store: EntityStore,
    streams: Vec<UnboundedSender<InboundMessage>>,
    available: bool,
    accepted_batches: u64,
}

#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                store: EntityStore::new(),
                streams: Vec::new(),
                available: true,
                accepted_batches: 0,
            })),
        }
    }

    /// Simulate an outage: while unavailable, submits and subscribes fail.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn records(&self) -> Vec<Record> {
        self.state.lock().store.records()
    }

    pub fn accepted_batches(&self) -> u64 {
        self.state.lock().accepted_batches
    }

    pub fn open_streams(&self) -> usize {
        let mut state = self.state.lock();
        state.streams.retain(|tx| !tx.is_closed());
        state.streams.len()
    }

    /// Validate and apply a batch, returning the changes it produced.
    fn accept(&self, batch: &OutboundBatch) -> Result<Vec<ChangeEvent>, SyncError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(SyncError::Unavailable("hub offline".to_string()));
        }

        transaction::validate(&state.store, &batch.ops)
            .map_err(|e| SyncError::Rejected(e.to_string()))?;
        let (undo, _) = transaction::apply(&mut state.store, &batch.ops);
        state.store.drain_invalidations();
        state.accepted_batches += 1;

        let changes: Vec<ChangeEvent> = undo
            .iter()
            .map(|entry| match state.store.get(entry.entity_type, entry.id.as_str()) {
                Some(record) => ChangeEvent::Put(record),
                None => ChangeEvent::Tombstone {
                    entity_type: entry.entity_type,
                    id: entry.id.clone(),
                },
            })
            .collect();

        if !changes.is_empty() {
            let message = InboundMessage::Changes(changes.clone());
            state.streams.retain(|tx| tx.send(message.clone()).is_ok());
        }
        debug!(batch = %batch.batch_id, changes = changes.len(), "hub accepted batch");
        Ok(changes)
    }
}

#[async_trait]
impl RemoteChannel for MemoryHub {
    async fn submit(&self, batch: &OutboundBatch) -> Result<(), SyncError> {
        self.accept(batch).map(|_| ())
    }

    async fn subscribe(&self) -> Result<ChangeStream, SyncError> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(SyncError::Unavailable("hub offline".to_string()));
        }
        let (tx, rx) = unbounded_channel();
        tx.send(InboundMessage::Snapshot(state.store.records()))
            .map_err(|_| SyncError::Disconnected)?;
        state.streams.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, EntityType, ImageFields};
    use crate::transaction::{BatchId, Op};

    fn image_batch(batch_id: u64) -> (EntityId, OutboundBatch) {
        let op = Op::create_image(ImageFields {
            external_id: "ext".to_string(),
            url: "https://img.example/a.jpg".to_string(),
            alt_text: "Untitled".to_string(),
            created_at: 1,
        });
        let id = op.target_id().clone();
        (
            id,
            OutboundBatch {
                batch_id: BatchId(batch_id),
                ops: vec![op],
            },
        )
    }

    #[tokio::test]
    async fn test_subscribe_starts_with_snapshot() {
        let hub = MemoryHub::new();
        let (id, batch) = image_batch(1);
        hub.submit(&batch).await.unwrap();

        let mut stream = hub.subscribe().await.unwrap();
        match stream.recv().await {
            Some(InboundMessage::Snapshot(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].id(), &id);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_broadcasts_to_every_stream() {
        let hub = MemoryHub::new();
        let mut first = hub.subscribe().await.unwrap();
        let mut second = hub.subscribe().await.unwrap();
        first.recv().await.unwrap();
        second.recv().await.unwrap();

        let (id, batch) = image_batch(1);
        hub.submit(&batch).await.unwrap();

        for stream in [&mut first, &mut second] {
            match stream.recv().await {
                Some(InboundMessage::Changes(changes)) => {
                    assert_eq!(changes.len(), 1);
                    assert_eq!(changes[0].id(), &id);
                }
                other => panic!("expected changes, got {:?}", other),
            }
        }
        assert_eq!(hub.accepted_batches(), 1);
    }

    #[tokio::test]
    async fn test_delete_broadcasts_tombstone() {
        let hub = MemoryHub::new();
        let (id, batch) = image_batch(1);
        hub.submit(&batch).await.unwrap();
        let mut stream = hub.subscribe().await.unwrap();
        stream.recv().await.unwrap();

        let delete = OutboundBatch {
            batch_id: BatchId(2),
            ops: vec![Op::delete(EntityType::Image, id.clone())],
        };
        hub.submit(&delete).await.unwrap();

        match stream.recv().await {
            Some(InboundMessage::Changes(changes)) => {
                assert_eq!(
                    changes,
                    vec![ChangeEvent::Tombstone {
                        entity_type: EntityType::Image,
                        id
                    }]
                );
            }
            other => panic!("expected tombstone, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unavailable_hub_fails_transiently() {
        let hub = MemoryHub::new();
        hub.set_available(false);
        let (_, batch) = image_batch(1);

        let err = hub.submit(&batch).await.unwrap_err();
        assert!(err.is_transient());
        assert!(hub.subscribe().await.is_err());
        assert!(hub.records().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_batch_is_rejected() {
        let hub = MemoryHub::new();
        let batch = OutboundBatch {
            batch_id: BatchId(1),
            ops: vec![Op::link(EntityId::from("ghost"), EntityId::from("i1"))],
        };
        let err = hub.submit(&batch).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
        assert!(!err.is_transient());
    }
}
