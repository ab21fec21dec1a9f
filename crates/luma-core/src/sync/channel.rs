//! Contract of the hosted realtime database, as the core relies on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::{EntityId, EntityType, Record};
use crate::transaction::OutboundBatch;

/// One inbound change, applied to the store in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "data", rename_all = "camelCase")]
pub enum ChangeEvent {
    Put(Record),
    #[serde(rename_all = "camelCase")]
    Tombstone { entity_type: EntityType, id: EntityId },
}

impl ChangeEvent {
    pub fn entity_type(&self) -> EntityType {
        match self {
            ChangeEvent::Put(record) => record.entity_type(),
            ChangeEvent::Tombstone { entity_type, .. } => *entity_type,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            ChangeEvent::Put(record) => record.id(),
            ChangeEvent::Tombstone { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Full authoritative state; always the first message on a stream.
    Snapshot(Vec<Record>),
    /// Ordered delta since the previous message.
    Changes(Vec<ChangeEvent>),
}

/// Inbound stream in the channel's total delivery order.
pub type ChangeStream = UnboundedReceiver<InboundMessage>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("batch rejected by remote: {0}")]
    Rejected(String),
    #[error("sync worker disconnected")]
    Disconnected,
}

impl SyncError {
    /// Transient errors may succeed later; rejections will not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, SyncError::Rejected(_))
    }
}

#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Send one batch; resolves when the remote acknowledges or refuses it.
    /// Changes produced by an accepted batch are queued on every open stream
    /// before this resolves.
    async fn submit(&self, batch: &OutboundBatch) -> Result<(), SyncError>;

    /// Open the inbound change stream, starting with a snapshot.
    async fn subscribe(&self) -> Result<ChangeStream, SyncError>;
}
