pub mod entity_id;
pub mod identity;
pub mod image;
pub mod interaction;
pub mod record;

pub use entity_id::EntityId;
pub use identity::UserIdentity;
pub use image::{Image, ImageFields};
pub use interaction::{Interaction, InteractionFields, InteractionKind};
pub use record::{EntityType, Fields, Record};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, the unit of every `created_at`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
