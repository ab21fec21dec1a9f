//! Optimistic transaction batches.
//!
//! A batch is validated in full against the store plus the effects of its own
//! earlier ops before anything is written, so a malformed op aborts the batch
//! with no partial mutation. Applying a validated batch cannot fail. While
//! applying, the prior state of every touched record is kept so a batch the
//! server rejects can be rolled back when the policy asks for it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::models::{
    EntityId, EntityType, Fields, ImageFields, InteractionFields, Record,
};
use crate::store::EntityStore;

/// Local sequence number of a submitted batch, used to route acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    /// Insert a new entity; the id must be unused.
    Create { id: EntityId, fields: Fields },
    /// Idempotent upsert: creates when absent, accepted when identical.
    Update { id: EntityId, fields: Fields },
    /// Remove an entity; a missing id is a no-op.
    Delete {
        #[serde(rename = "entityType")]
        entity_type: EntityType,
        id: EntityId,
    },
    /// Link an interaction to the image it was created on.
    #[serde(rename_all = "camelCase")]
    Link {
        image_id: EntityId,
        interaction_id: EntityId,
    },
}

impl Op {
    /// Create op for a new image with a freshly generated id.
    pub fn create_image(fields: ImageFields) -> Self {
        Op::Create {
            id: EntityId::generate(),
            fields: Fields::Image(fields),
        }
    }

    /// Create op for a new interaction with a freshly generated id.
    pub fn create_interaction(fields: InteractionFields) -> Self {
        Op::Create {
            id: EntityId::generate(),
            fields: Fields::Interaction(fields),
        }
    }

    pub fn link(image_id: EntityId, interaction_id: EntityId) -> Self {
        Op::Link {
            image_id,
            interaction_id,
        }
    }

    pub fn delete(entity_type: EntityType, id: EntityId) -> Self {
        Op::Delete { entity_type, id }
    }

    /// Id of the entity the op writes (the interaction, for a link).
    pub fn target_id(&self) -> &EntityId {
        match self {
            Op::Create { id, .. } | Op::Update { id, .. } | Op::Delete { id, .. } => id,
            Op::Link { interaction_id, .. } => interaction_id,
        }
    }
}

/// Ops creating an interaction and linking it to `image_id`, plus the new id.
pub fn interaction_on(image_id: &EntityId, fields: InteractionFields) -> (EntityId, Vec<Op>) {
    let create = Op::create_interaction(fields);
    let id = create.target_id().clone();
    (id.clone(), vec![create, Op::link(image_id.clone(), id)])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundBatch {
    pub batch_id: BatchId,
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub batch_id: BatchId,
    /// Ids introduced by create/update ops in this batch, in op order.
    pub created: Vec<EntityId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction contains no ops")]
    EmptyBatch,
    #[error("op {index}: entity id must not be empty")]
    EmptyId { index: usize },
    #[error("op {index}: {entity_type} {id} already exists")]
    AlreadyExists {
        index: usize,
        entity_type: EntityType,
        id: EntityId,
    },
    #[error("op {index}: {id} is a {existing}, not a {requested}")]
    TypeMismatch {
        index: usize,
        id: EntityId,
        existing: EntityType,
        requested: EntityType,
    },
    #[error("op {index}: fields of {id} are write-once")]
    ImmutableField { index: usize, id: EntityId },
    #[error("op {index}: interaction {id} has blank content")]
    BlankContent { index: usize, id: EntityId },
    #[error("op {index}: image {id} does not exist")]
    MissingImage { index: usize, id: EntityId },
    #[error("op {index}: interaction {id} does not exist")]
    MissingInteraction { index: usize, id: EntityId },
    #[error("op {index}: interaction {interaction_id} is already linked to {existing}")]
    LinkConflict {
        index: usize,
        interaction_id: EntityId,
        existing: EntityId,
    },
}

/// What to do with local state when the server rejects a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RollbackPolicy {
    /// Keep the optimistic state; the UI shows stale but consistent data.
    #[default]
    Keep,
    /// Restore the records the batch touched to their pre-batch state.
    RollBack,
}

impl RollbackPolicy {
    pub fn from_flag(rollback_on_failure: bool) -> Self {
        if rollback_on_failure {
            RollbackPolicy::RollBack
        } else {
            RollbackPolicy::Keep
        }
    }
}

/// Outbound half of the remote channel as seen by the writer. Must not block.
pub trait BatchSink {
    fn submit(&self, batch: OutboundBatch);
}

/// Prior state of one record, captured on its first write in a batch.
#[derive(Debug, Clone)]
pub(crate) struct UndoEntry {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub prior: Option<Record>,
}

/// Store state as seen part-way through a batch.
struct Staged<'a> {
    store: &'a EntityStore,
    overlay: HashMap<EntityId, Option<Record>>,
}

impl<'a> Staged<'a> {
    fn new(store: &'a EntityStore) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
        }
    }

    fn lookup(&self, id: &EntityId) -> Option<Record> {
        if let Some(staged) = self.overlay.get(id) {
            return staged.clone();
        }
        self.store
            .get(EntityType::Image, id.as_str())
            .or_else(|| self.store.get(EntityType::Interaction, id.as_str()))
    }

    fn lookup_typed(&self, entity_type: EntityType, id: &EntityId) -> Option<Record> {
        self.lookup(id).filter(|r| r.entity_type() == entity_type)
    }

    fn stage(&mut self, id: EntityId, record: Option<Record>) {
        self.overlay.insert(id, record);
    }

    /// Interactions currently linked to `image_id`, staged view.
    fn children_of(&self, image_id: &EntityId) -> Vec<EntityId> {
        let mut children: HashSet<EntityId> = self
            .store
            .link_graph()
            .children_of(image_id.as_str())
            .iter()
            .cloned()
            .collect();
        for (id, staged) in &self.overlay {
            if staged.as_ref().and_then(|r| r.image_link()) == Some(image_id) {
                children.insert(id.clone());
            } else {
                children.remove(id);
            }
        }
        children.into_iter().collect()
    }
}

fn check_content(index: usize, id: &EntityId, fields: &Fields) -> Result<(), TransactionError> {
    if let Fields::Interaction(fields) = fields {
        if fields.content.trim().is_empty() {
            return Err(TransactionError::BlankContent {
                index,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

/// Check a whole batch without mutating anything.
pub(crate) fn validate(store: &EntityStore, ops: &[Op]) -> Result<(), TransactionError> {
    if ops.is_empty() {
        return Err(TransactionError::EmptyBatch);
    }

    let mut staged = Staged::new(store);
    for (index, op) in ops.iter().enumerate() {
        if op.target_id().is_empty() {
            return Err(TransactionError::EmptyId { index });
        }

        match op {
            Op::Create { id, fields } => {
                if let Some(existing) = staged.lookup(id) {
                    return Err(TransactionError::AlreadyExists {
                        index,
                        entity_type: existing.entity_type(),
                        id: id.clone(),
                    });
                }
                check_content(index, id, fields)?;
                staged.stage(id.clone(), Some(Record::from_fields(id.clone(), fields.clone())));
            }
            Op::Update { id, fields } => match staged.lookup(id) {
                Some(existing) => {
                    if existing.entity_type() != fields.entity_type() {
                        return Err(TransactionError::TypeMismatch {
                            index,
                            id: id.clone(),
                            existing: existing.entity_type(),
                            requested: fields.entity_type(),
                        });
                    }
                    if &existing.fields() != fields {
                        return Err(TransactionError::ImmutableField {
                            index,
                            id: id.clone(),
                        });
                    }
                }
                None => {
                    check_content(index, id, fields)?;
                    staged.stage(id.clone(), Some(Record::from_fields(id.clone(), fields.clone())));
                }
            },
            Op::Delete { entity_type, id } => {
                if staged.lookup_typed(*entity_type, id).is_none() {
                    continue;
                }
                if *entity_type == EntityType::Image {
                    for child in staged.children_of(id) {
                        if let Some(Record::Interaction(mut interaction)) =
                            staged.lookup_typed(EntityType::Interaction, &child)
                        {
                            interaction.image_id = None;
                            staged.stage(child, Some(Record::Interaction(interaction)));
                        }
                    }
                }
                staged.stage(id.clone(), None);
            }
            Op::Link {
                image_id,
                interaction_id,
            } => {
                if image_id.is_empty() {
                    return Err(TransactionError::EmptyId { index });
                }
                if staged.lookup_typed(EntityType::Image, image_id).is_none() {
                    return Err(TransactionError::MissingImage {
                        index,
                        id: image_id.clone(),
                    });
                }
                let Some(Record::Interaction(mut interaction)) =
                    staged.lookup_typed(EntityType::Interaction, interaction_id)
                else {
                    return Err(TransactionError::MissingInteraction {
                        index,
                        id: interaction_id.clone(),
                    });
                };
                match &interaction.image_id {
                    Some(existing) if existing != image_id => {
                        return Err(TransactionError::LinkConflict {
                            index,
                            interaction_id: interaction_id.clone(),
                            existing: existing.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        interaction.image_id = Some(image_id.clone());
                        staged.stage(interaction_id.clone(), Some(Record::Interaction(interaction)));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Write a validated batch to the store, returning the undo log and created ids.
pub(crate) fn apply(store: &mut EntityStore, ops: &[Op]) -> (Vec<UndoEntry>, Vec<EntityId>) {
    let mut undo: Vec<UndoEntry> = Vec::new();
    let mut touched: HashSet<EntityId> = HashSet::new();
    let mut created = Vec::new();

    let mut capture = |store: &EntityStore, entity_type: EntityType, id: &EntityId| {
        if touched.insert(id.clone()) {
            undo.push(UndoEntry {
                entity_type,
                id: id.clone(),
                prior: store.get(entity_type, id.as_str()),
            });
        }
    };

    for op in ops {
        match op {
            Op::Create { id, fields } => {
                capture(store, fields.entity_type(), id);
                store.put(Record::from_fields(id.clone(), fields.clone()));
                created.push(id.clone());
            }
            Op::Update { id, fields } => {
                if store.contains(fields.entity_type(), id.as_str()) {
                    continue;
                }
                capture(store, fields.entity_type(), id);
                store.put(Record::from_fields(id.clone(), fields.clone()));
                created.push(id.clone());
            }
            Op::Delete { entity_type, id } => {
                if !store.contains(*entity_type, id.as_str()) {
                    continue;
                }
                capture(store, *entity_type, id);
                if *entity_type == EntityType::Image {
                    let children: Vec<EntityId> = store
                        .link_graph()
                        .children_of(id.as_str())
                        .iter()
                        .cloned()
                        .collect();
                    for child in &children {
                        capture(store, EntityType::Interaction, child);
                    }
                }
                store.delete(*entity_type, id);
            }
            Op::Link {
                image_id,
                interaction_id,
            } => {
                let already_linked = store
                    .interaction(interaction_id.as_str())
                    .and_then(|i| i.image_id.as_ref())
                    == Some(image_id);
                if already_linked {
                    continue;
                }
                capture(store, EntityType::Interaction, interaction_id);
                store.set_link(interaction_id, image_id);
            }
        }
    }

    (undo, created)
}

/// Restore the records captured in `undo`, newest capture first.
pub(crate) fn roll_back(store: &mut EntityStore, undo: &[UndoEntry]) {
    for entry in undo.iter().rev() {
        match &entry.prior {
            Some(record) => {
                store.put(record.clone());
            }
            None => {
                store.delete(entry.entity_type, &entry.id);
            }
        }
    }
}
