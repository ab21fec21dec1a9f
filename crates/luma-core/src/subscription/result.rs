use serde::Serialize;

use crate::models::{Image, Interaction};
use crate::store::EntityStore;
use crate::subscription::{QueryShape, Relation};

/// An image and, when the query includes the relation, its interactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageNode {
    pub image: Image,
    /// Empty unless the query includes `Relation::Interactions`.
    pub interactions: Vec<Interaction>,
}

/// An interaction and, when the query includes the relation, its image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionNode {
    pub interaction: Interaction,
    /// None when the relation is not included or the interaction is unlinked.
    pub image: Option<Image>,
}

/// Computed result of a query.
///
/// Lists are kept in id order so that two results with the same members
/// compare equal. That order carries no meaning; callers sort snapshots
/// themselves (see `store::views`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entityType", content = "items", rename_all = "camelCase")]
pub enum QueryResult {
    Images(Vec<ImageNode>),
    Interactions(Vec<InteractionNode>),
}

impl QueryResult {
    pub fn evaluate(shape: &QueryShape, store: &EntityStore) -> Self {
        match shape.entity_type {
            crate::models::EntityType::Image => {
                let mut nodes: Vec<ImageNode> = store
                    .images()
                    .filter(|image| shape.matches_image(image))
                    .map(|image| ImageNode {
                        image: image.clone(),
                        interactions: if shape.include == Some(Relation::Interactions) {
                            store
                                .interactions_of(image.id.as_str())
                                .into_iter()
                                .cloned()
                                .collect()
                        } else {
                            Vec::new()
                        },
                    })
                    .collect();
                nodes.sort_by(|a, b| a.image.id.cmp(&b.image.id));
                QueryResult::Images(nodes)
            }
            crate::models::EntityType::Interaction => {
                let mut nodes: Vec<InteractionNode> = store
                    .interactions()
                    .filter(|interaction| shape.matches_interaction(interaction))
                    .map(|interaction| InteractionNode {
                        interaction: interaction.clone(),
                        image: if shape.include == Some(Relation::Image) {
                            interaction
                                .image_id
                                .as_ref()
                                .and_then(|id| store.image(id.as_str()))
                                .cloned()
                        } else {
                            None
                        },
                    })
                    .collect();
                nodes.sort_by(|a, b| a.interaction.id.cmp(&b.interaction.id));
                QueryResult::Interactions(nodes)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::Images(nodes) => nodes.len(),
            QueryResult::Interactions(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> &[ImageNode] {
        match self {
            QueryResult::Images(nodes) => nodes,
            QueryResult::Interactions(_) => &[],
        }
    }

    pub fn interactions(&self) -> &[InteractionNode] {
        match self {
            QueryResult::Images(_) => &[],
            QueryResult::Interactions(nodes) => nodes,
        }
    }
}

/// Loading/error status carried with every delivered snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum QueryStatus {
    /// Initial state from the remote channel has not arrived yet
    Loading,
    Ready,
    /// The remote channel reported an error; local data may be stale
    Error(String),
}

impl QueryStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryStatus::Loading)
    }
}

/// What a subscriber receives: the result plus its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySnapshot {
    pub status: QueryStatus,
    pub result: QueryResult,
}
