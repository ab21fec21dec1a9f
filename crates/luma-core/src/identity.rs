use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::{IDENTITY_COLORS, IDENTITY_NAMES, IDENTITY_STORAGE_NAME};
use crate::models::UserIdentity;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to read identity from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse identity in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to save identity to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Random anonymous participant.
pub fn generate_identity() -> UserIdentity {
    let mut rng = rand::thread_rng();
    UserIdentity {
        id: Uuid::new_v4().to_string(),
        display_name: IDENTITY_NAMES
            .choose(&mut rng)
            .copied()
            .unwrap_or(IDENTITY_NAMES[0])
            .to_string(),
        color_tag: IDENTITY_COLORS
            .choose(&mut rng)
            .copied()
            .unwrap_or(IDENTITY_COLORS[0])
            .to_string(),
    }
}

/// On-disk profile. Only the identity is persisted; everything else about
/// the session is rebuilt from the remote on start.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedProfile {
    user: Option<UserIdentity>,
}

/// Identity persisted under `<data_dir>/gallery-storage.json`.
pub struct IdentityStore {
    path: PathBuf,
    identity: UserIdentity,
}

impl IdentityStore {
    pub fn storage_path(data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.json", IDENTITY_STORAGE_NAME))
    }

    pub fn load_or_create(data_dir: &Path) -> Result<Self, IdentityError> {
        Self::load_or_create_with(&Self::storage_path(data_dir), generate_identity)
    }

    /// Load the identity at `path`, calling `generate` and saving its result
    /// only when no identity has been stored yet.
    pub fn load_or_create_with(
        path: &Path,
        generate: impl FnOnce() -> UserIdentity,
    ) -> Result<Self, IdentityError> {
        if let Some(identity) = Self::load(path)? {
            debug!(user = %identity.id, "loaded identity");
            return Ok(Self {
                path: path.to_path_buf(),
                identity,
            });
        }

        let identity = generate();
        Self::save(path, &identity)?;
        info!(user = %identity.id, name = %identity.display_name, "created identity");
        Ok(Self {
            path: path.to_path_buf(),
            identity,
        })
    }

    fn load(path: &Path) -> Result<Option<UserIdentity>, IdentityError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let profile: PersistedProfile =
                    serde_json::from_str(&contents).map_err(|source| IdentityError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Ok(profile.user)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn save(path: &Path, identity: &UserIdentity) -> Result<(), IdentityError> {
        let write_error = |source| IdentityError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let profile = PersistedProfile {
            user: Some(identity.clone()),
        };
        let json = serde_json::to_string_pretty(&profile).map_err(|e| IdentityError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        fs::write(path, json).map_err(write_error)
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
