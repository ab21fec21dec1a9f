//! Image -> interactions adjacency index.
//!
//! The graph is a denormalized view of the `image_id` stored on each
//! interaction, never independent state: `LinkGraph::rebuild` over a full
//! scan of the interactions must produce a graph equal to the live one.

use std::collections::{BTreeSet, HashMap};

use crate::models::{EntityId, Interaction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkGraph {
    children: HashMap<EntityId, BTreeSet<EntityId>>,
}

static NO_CHILDREN: BTreeSet<EntityId> = BTreeSet::new();

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the graph from the interactions alone.
    pub fn rebuild<'a>(interactions: impl IntoIterator<Item = &'a Interaction>) -> Self {
        let mut graph = Self::new();
        for interaction in interactions {
            if let Some(image_id) = &interaction.image_id {
                graph.link(image_id, &interaction.id);
            }
        }
        graph
    }

    pub fn link(&mut self, image_id: &EntityId, interaction_id: &EntityId) {
        self.children
            .entry(image_id.clone())
            .or_default()
            .insert(interaction_id.clone());
    }

    pub fn unlink(&mut self, image_id: &EntityId, interaction_id: &EntityId) {
        if let Some(children) = self.children.get_mut(image_id) {
            children.remove(interaction_id);
            if children.is_empty() {
                self.children.remove(image_id);
            }
        }
    }

    /// Drop every edge of `image_id`, returning the interactions that were linked.
    pub fn remove_image(&mut self, image_id: &EntityId) -> BTreeSet<EntityId> {
        self.children.remove(image_id).unwrap_or_default()
    }

    pub fn children_of(&self, image_id: &str) -> &BTreeSet<EntityId> {
        self.children.get(image_id).unwrap_or(&NO_CHILDREN)
    }

    pub fn has_children(&self, image_id: &str) -> bool {
        self.children.contains_key(image_id)
    }

    pub fn edge_count(&self) -> usize {
        self.children.values().map(BTreeSet::len).sum()
    }
}
