use serde::{Deserialize, Serialize};

/// Anonymous participant identity.
///
/// Generated once per local profile and never mutated. It is not synchronized
/// as an entity; it rides along on every interaction the user creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(alias = "color")]
    pub color_tag: String,
}
