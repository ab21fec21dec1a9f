use serde::{Deserialize, Serialize};
use std::fmt;

use super::{EntityId, UserIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    /// Emoji reaction. Older clients wrote this as "emoji".
    #[serde(alias = "emoji")]
    Reaction,
    Comment,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKind::Reaction => f.write_str("reaction"),
            InteractionKind::Comment => f.write_str("comment"),
        }
    }
}

/// A reaction or comment left by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: EntityId,
    pub kind: InteractionKind,
    pub content: String,
    pub created_at: u64,
    pub author_id: String,
    pub author_name: String,
    pub author_color: String,
    /// Image this interaction was created on. Set at most once, never retargeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<EntityId>,
}

/// Writable fields of an interaction. The image link is established by a
/// separate link op, so it is not part of the fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionFields {
    pub kind: InteractionKind,
    pub content: String,
    pub created_at: u64,
    pub author_id: String,
    pub author_name: String,
    pub author_color: String,
}

impl InteractionFields {
    /// Fields for an interaction authored by `author`, stamped with `created_at`.
    pub fn authored_by(
        author: &UserIdentity,
        kind: InteractionKind,
        content: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            created_at,
            author_id: author.id.clone(),
            author_name: author.display_name.clone(),
            author_color: author.color_tag.clone(),
        }
    }
}

impl Interaction {
    pub fn from_fields(id: EntityId, fields: InteractionFields) -> Self {
        Self {
            id,
            kind: fields.kind,
            content: fields.content,
            created_at: fields.created_at,
            author_id: fields.author_id,
            author_name: fields.author_name,
            author_color: fields.author_color,
            image_id: None,
        }
    }

    pub fn fields(&self) -> InteractionFields {
        InteractionFields {
            kind: self.kind,
            content: self.content.clone(),
            created_at: self.created_at,
            author_id: self.author_id.clone(),
            author_name: self.author_name.clone(),
            author_color: self.author_color.clone(),
        }
    }

    /// Whether the presentation layer should offer a delete action to `user`.
    /// The store itself accepts deletes from anyone.
    pub fn is_deletable_by(&self, user: &UserIdentity) -> bool {
        self.author_id == user.id
    }

    pub fn is_reaction(&self) -> bool {
        self.kind == InteractionKind::Reaction
    }
}
