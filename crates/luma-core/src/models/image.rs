use serde::{Deserialize, Serialize};

use super::EntityId;

/// A photo ingested from the external image source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: EntityId,
    /// Id assigned by the photo source. Not unique across fetches.
    pub external_id: String,
    pub url: String,
    pub alt_text: String,
    pub created_at: u64,
}

/// Writable fields of an image, everything except the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFields {
    pub external_id: String,
    pub url: String,
    pub alt_text: String,
    pub created_at: u64,
}

impl Image {
    pub fn from_fields(id: EntityId, fields: ImageFields) -> Self {
        Self {
            id,
            external_id: fields.external_id,
            url: fields.url,
            alt_text: fields.alt_text,
            created_at: fields.created_at,
        }
    }

    pub fn fields(&self) -> ImageFields {
        ImageFields {
            external_id: self.external_id.clone(),
            url: self.url.clone(),
            alt_text: self.alt_text.clone(),
            created_at: self.created_at,
        }
    }
}
