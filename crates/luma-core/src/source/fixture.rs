use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::source::{ImageSource, PhotoCandidate};

/// Offline source that cycles through a fixed list of photos.
///
/// Successive calls continue where the previous one stopped, so long sessions
/// see the same external ids again, as they would from a random API.
pub struct StaticImageSource {
    photos: Vec<PhotoCandidate>,
    cursor: Mutex<usize>,
}

impl StaticImageSource {
    pub fn new(photos: Vec<PhotoCandidate>) -> Self {
        Self {
            photos,
            cursor: Mutex::new(0),
        }
    }

    /// A small built-in catalog of placeholder photos.
    pub fn placeholder(size: usize) -> Self {
        let photos = (0..size.max(1))
            .map(|n| PhotoCandidate {
                external_id: format!("placeholder-{}", n),
                url: format!("https://picsum.photos/seed/luma-{}/1080/720", n),
                alt_text: format!("Placeholder photo {}", n + 1),
            })
            .collect();
        Self::new(photos)
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn fetch_random(&self, count: usize) -> Result<Vec<PhotoCandidate>> {
        if self.photos.is_empty() {
            anyhow::bail!("static image source has no photos");
        }
        let mut cursor = self.cursor.lock();
        let batch = (0..count)
            .map(|i| self.photos[(*cursor + i) % self.photos.len()].clone())
            .collect();
        *cursor = (*cursor + count) % self.photos.len();
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycles_through_catalog() {
        let source = StaticImageSource::placeholder(3);
        let first = source.fetch_random(2).await.unwrap();
        let second = source.fetch_random(2).await.unwrap();

        assert_eq!(first[0].external_id, "placeholder-0");
        assert_eq!(first[1].external_id, "placeholder-1");
        assert_eq!(second[0].external_id, "placeholder-2");
        assert_eq!(second[1].external_id, "placeholder-0");
    }

    #[tokio::test]
    async fn test_empty_catalog_fails() {
        let source = StaticImageSource::new(Vec::new());
        assert!(source.fetch_random(1).await.is_err());
    }
}
