//! External photo sources feeding the gallery.

pub mod fixture;
pub mod unsplash;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use fixture::StaticImageSource;
pub use unsplash::UnsplashSource;

/// A photo as returned by the source, before it becomes an image entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoCandidate {
    pub external_id: String,
    pub url: String,
    pub alt_text: String,
}

/// No ordering or uniqueness is assumed across calls.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_random(&self, count: usize) -> anyhow::Result<Vec<PhotoCandidate>>;
}
