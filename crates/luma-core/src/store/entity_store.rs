use std::collections::{BTreeSet, HashMap};

use crate::models::{EntityId, EntityType, Fields, Image, Interaction, Record};
use crate::store::LinkGraph;

/// Change signal queued by every mutating store call and drained by the
/// subscription engine once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub entity_type: EntityType,
    pub id: EntityId,
    /// Images whose interaction set may have changed (link targets before and after).
    pub image_ids: BTreeSet<EntityId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("fields for {found} cannot be stored as {expected} {id}")]
    TypeMismatch {
        expected: EntityType,
        found: EntityType,
        id: EntityId,
    },
}

/// Normalized in-memory table of images and interactions, keyed by id.
///
/// Source of truth for every read. Mutated only through `put`/`delete`
/// (and `set_link`, which is a `put` of the interaction's link field), from
/// both the optimistic write path and remote reconciliation.
#[derive(Debug, Default)]
pub struct EntityStore {
    images: HashMap<EntityId, Image>,
    interactions: HashMap<EntityId, Interaction>,
    links: LinkGraph,
    pending: Vec<Invalidation>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Mutations =====

    /// Insert or replace a record. Returns the previous record with that id.
    pub fn put(&mut self, record: Record) -> Option<Record> {
        match record {
            Record::Image(image) => {
                let id = image.id.clone();
                let previous = self.images.insert(id.clone(), image);
                self.invalidate(EntityType::Image, id.clone(), [id]);
                previous.map(Record::Image)
            }
            Record::Interaction(interaction) => {
                let id = interaction.id.clone();
                let new_link = interaction.image_id.clone();
                let previous = self.interactions.insert(id.clone(), interaction);
                let old_link = previous.as_ref().and_then(|p| p.image_id.clone());

                if old_link != new_link {
                    if let Some(old) = &old_link {
                        self.links.unlink(old, &id);
                    }
                    if let Some(new) = &new_link {
                        self.links.link(new, &id);
                    }
                }

                self.invalidate(
                    EntityType::Interaction,
                    id,
                    old_link.into_iter().chain(new_link),
                );
                previous.map(Record::Interaction)
            }
        }
    }

    /// Insert or replace from a field payload. An existing interaction keeps its link.
    pub fn put_fields(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
        fields: Fields,
    ) -> Result<Option<Record>, StoreError> {
        if fields.entity_type() != entity_type {
            return Err(StoreError::TypeMismatch {
                expected: entity_type,
                found: fields.entity_type(),
                id,
            });
        }

        let mut record = Record::from_fields(id, fields);
        if let Record::Interaction(interaction) = &mut record {
            interaction.image_id = self
                .interactions
                .get(&interaction.id)
                .and_then(|existing| existing.image_id.clone());
        }
        Ok(self.put(record))
    }

    /// Point an interaction at an image. Returns false if the interaction is unknown.
    pub fn set_link(&mut self, interaction_id: &EntityId, image_id: &EntityId) -> bool {
        let Some(existing) = self.interactions.get(interaction_id) else {
            return false;
        };
        if existing.image_id.as_ref() == Some(image_id) {
            return true;
        }
        let mut updated = existing.clone();
        updated.image_id = Some(image_id.clone());
        self.put(Record::Interaction(updated));
        true
    }

    /// Remove a record and clean up its links. Deleting a missing id changes nothing.
    ///
    /// Deleting an image unlinks its interactions; they stay in the store and
    /// remain visible in the global feed.
    pub fn delete(&mut self, entity_type: EntityType, id: &EntityId) -> Option<Record> {
        match entity_type {
            EntityType::Interaction => {
                let removed = self.interactions.remove(id)?;
                if let Some(image_id) = &removed.image_id {
                    self.links.unlink(image_id, id);
                }
                self.invalidate(
                    EntityType::Interaction,
                    id.clone(),
                    removed.image_id.clone(),
                );
                Some(Record::Interaction(removed))
            }
            EntityType::Image => {
                let removed = self.images.remove(id)?;
                for child in self.links.remove_image(id) {
                    if let Some(interaction) = self.interactions.get_mut(&child) {
                        interaction.image_id = None;
                    }
                    self.invalidate(EntityType::Interaction, child, [id.clone()]);
                }
                self.invalidate(EntityType::Image, id.clone(), [id.clone()]);
                Some(Record::Image(removed))
            }
        }
    }

    fn invalidate(
        &mut self,
        entity_type: EntityType,
        id: EntityId,
        image_ids: impl IntoIterator<Item = EntityId>,
    ) {
        self.pending.push(Invalidation {
            entity_type,
            id,
            image_ids: image_ids.into_iter().collect(),
        });
    }

    /// Take every invalidation queued since the last drain.
    pub fn drain_invalidations(&mut self) -> Vec<Invalidation> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending_invalidations(&self) -> bool {
        !self.pending.is_empty()
    }

    // ===== Reads =====

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Record> {
        match entity_type {
            EntityType::Image => self.images.get(id).cloned().map(Record::Image),
            EntityType::Interaction => self.interactions.get(id).cloned().map(Record::Interaction),
        }
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        match entity_type {
            EntityType::Image => self.images.contains_key(id),
            EntityType::Interaction => self.interactions.contains_key(id),
        }
    }

    pub fn image(&self, id: &str) -> Option<&Image> {
        self.images.get(id)
    }

    pub fn interaction(&self, id: &str) -> Option<&Interaction> {
        self.interactions.get(id)
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }

    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.values()
    }

    /// Interactions linked to `image_id`, in id order.
    pub fn interactions_of(&self, image_id: &str) -> Vec<&Interaction> {
        self.links
            .children_of(image_id)
            .iter()
            .filter_map(|id| self.interactions.get(id))
            .collect()
    }

    pub fn link_graph(&self) -> &LinkGraph {
        &self.links
    }

    /// Link graph derived from a full scan, for consistency checks.
    pub fn rebuilt_link_graph(&self) -> LinkGraph {
        LinkGraph::rebuild(self.interactions.values())
    }

    /// Every record, images first, each group in id order.
    pub fn records(&self) -> Vec<Record> {
        let mut images: Vec<&Image> = self.images.values().collect();
        images.sort_by(|a, b| a.id.cmp(&b.id));
        let mut interactions: Vec<&Interaction> = self.interactions.values().collect();
        interactions.sort_by(|a, b| a.id.cmp(&b.id));

        images
            .into_iter()
            .cloned()
            .map(Record::Image)
            .chain(interactions.into_iter().cloned().map(Record::Interaction))
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.interactions.is_empty()
    }
}
