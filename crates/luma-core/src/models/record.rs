use serde::{Deserialize, Serialize};
use std::fmt;

use super::{EntityId, Image, ImageFields, Interaction, InteractionFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Image,
    Interaction,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Image => f.write_str("image"),
            EntityType::Interaction => f.write_str("interaction"),
        }
    }
}

/// A typed, identified record held by the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Image(Image),
    Interaction(Interaction),
}

impl Record {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Record::Image(_) => EntityType::Image,
            Record::Interaction(_) => EntityType::Interaction,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Record::Image(image) => &image.id,
            Record::Interaction(interaction) => &interaction.id,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            Record::Image(image) => image.created_at,
            Record::Interaction(interaction) => interaction.created_at,
        }
    }

    /// Link target stored on the record, if any.
    pub fn image_link(&self) -> Option<&EntityId> {
        match self {
            Record::Image(_) => None,
            Record::Interaction(interaction) => interaction.image_id.as_ref(),
        }
    }

    pub fn from_fields(id: EntityId, fields: Fields) -> Self {
        match fields {
            Fields::Image(fields) => Record::Image(Image::from_fields(id, fields)),
            Fields::Interaction(fields) => {
                Record::Interaction(Interaction::from_fields(id, fields))
            }
        }
    }

    pub fn fields(&self) -> Fields {
        match self {
            Record::Image(image) => Fields::Image(image.fields()),
            Record::Interaction(interaction) => Fields::Interaction(interaction.fields()),
        }
    }
}

/// Field payload of a create/update op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Fields {
    Image(ImageFields),
    Interaction(InteractionFields),
}

impl Fields {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Fields::Image(_) => EntityType::Image,
            Fields::Interaction(_) => EntityType::Interaction,
        }
    }
}
