use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{EntityId, EntityType, Image, Interaction, InteractionKind};
use crate::store::Invalidation;

/// Predicate narrowing the entities a query selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "camelCase")]
pub enum Filter {
    /// Entity id equals the value (images or interactions)
    Id(EntityId),
    /// Interaction author id equals the value
    Author(String),
    /// Interaction kind equals the value
    Kind(InteractionKind),
    /// Interaction is linked to the given image
    LinkedTo(EntityId),
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Id(id) => write!(f, "id = {}", id),
            Filter::Author(author) => write!(f, "author = {}", author),
            Filter::Kind(kind) => write!(f, "kind = {}", kind),
            Filter::LinkedTo(id) => write!(f, "linked to {}", id),
        }
    }
}

/// Nested relation materialized alongside each matched entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    /// Interactions of each matched image
    Interactions,
    /// Image of each matched interaction
    Image,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("filter `{filter}` does not apply to {entity_type} queries")]
    FilterNotApplicable {
        filter: Filter,
        entity_type: EntityType,
    },
    #[error("relation {relation:?} cannot be included in {entity_type} queries")]
    RelationNotApplicable {
        relation: Relation,
        entity_type: EntityType,
    },
    #[error("filter value must not be empty")]
    EmptyFilterValue,
}

/// Declarative description of what a subscription observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryShape {
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Relation>,
}

impl QueryShape {
    pub fn images() -> Self {
        Self {
            entity_type: EntityType::Image,
            filter: None,
            include: None,
        }
    }

    pub fn interactions() -> Self {
        Self {
            entity_type: EntityType::Interaction,
            filter: None,
            include: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include(mut self, relation: Relation) -> Self {
        self.include = Some(relation);
        self
    }

    /// Gallery grid: every image with its interactions.
    pub fn gallery() -> Self {
        Self::images().include(Relation::Interactions)
    }

    /// Focused view: one image with its interactions.
    pub fn focused_image(image_id: impl Into<EntityId>) -> Self {
        Self::images()
            .filter(Filter::Id(image_id.into()))
            .include(Relation::Interactions)
    }

    /// Activity feed: every interaction with the image it was left on.
    pub fn activity_feed() -> Self {
        Self::interactions().include(Relation::Image)
    }

    /// Reject shapes that can never be evaluated.
    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(filter) = &self.filter {
            let applicable = match (self.entity_type, filter) {
                (_, Filter::Id(_)) => true,
                (EntityType::Interaction, _) => true,
                (EntityType::Image, _) => false,
            };
            if !applicable {
                return Err(QueryError::FilterNotApplicable {
                    filter: filter.clone(),
                    entity_type: self.entity_type,
                });
            }
            let empty = match filter {
                Filter::Id(id) | Filter::LinkedTo(id) => id.is_empty(),
                Filter::Author(author) => author.trim().is_empty(),
                Filter::Kind(_) => false,
            };
            if empty {
                return Err(QueryError::EmptyFilterValue);
            }
        }

        if let Some(relation) = self.include {
            let applicable = matches!(
                (self.entity_type, relation),
                (EntityType::Image, Relation::Interactions)
                    | (EntityType::Interaction, Relation::Image)
            );
            if !applicable {
                return Err(QueryError::RelationNotApplicable {
                    relation,
                    entity_type: self.entity_type,
                });
            }
        }

        Ok(())
    }

    pub(crate) fn matches_image(&self, image: &Image) -> bool {
        match &self.filter {
            None => true,
            Some(Filter::Id(id)) => &image.id == id,
            Some(_) => false,
        }
    }

    pub(crate) fn matches_interaction(&self, interaction: &Interaction) -> bool {
        match &self.filter {
            None => true,
            Some(Filter::Id(id)) => &interaction.id == id,
            Some(Filter::Author(author)) => &interaction.author_id == author,
            Some(Filter::Kind(kind)) => interaction.kind == *kind,
            Some(Filter::LinkedTo(image_id)) => interaction.image_id.as_ref() == Some(image_id),
        }
    }

    /// Conservative check: false only when the change cannot alter this query's result.
    pub(crate) fn is_affected_by(&self, invalidation: &Invalidation) -> bool {
        match (self.entity_type, invalidation.entity_type) {
            (EntityType::Image, EntityType::Image) => match &self.filter {
                Some(Filter::Id(id)) => &invalidation.id == id,
                _ => true,
            },
            (EntityType::Image, EntityType::Interaction) => {
                if self.include != Some(Relation::Interactions) {
                    return false;
                }
                match &self.filter {
                    Some(Filter::Id(id)) => invalidation.image_ids.contains(id),
                    _ => !invalidation.image_ids.is_empty(),
                }
            }
            (EntityType::Interaction, EntityType::Interaction) => match &self.filter {
                Some(Filter::Id(id)) => &invalidation.id == id,
                Some(Filter::LinkedTo(image_id)) => invalidation.image_ids.contains(image_id),
                _ => true,
            },
            (EntityType::Interaction, EntityType::Image) => {
                if self.include != Some(Relation::Image) {
                    return false;
                }
                match &self.filter {
                    Some(Filter::LinkedTo(image_id)) => &invalidation.id == image_id,
                    _ => true,
                }
            }
        }
    }
}
