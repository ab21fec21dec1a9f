use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::constants::{DEFAULT_ALT_TEXT, UNSPLASH_API_BASE};
use crate::source::{ImageSource, PhotoCandidate};

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    id: String,
    urls: UnsplashUrls,
    alt_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    regular: String,
}

impl From<UnsplashPhoto> for PhotoCandidate {
    fn from(photo: UnsplashPhoto) -> Self {
        Self {
            external_id: photo.id,
            url: photo.urls.regular,
            alt_text: photo
                .alt_description
                .filter(|alt| !alt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ALT_TEXT.to_string()),
        }
    }
}

/// Unsplash random-photo API client
pub struct UnsplashSource {
    access_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl UnsplashSource {
    pub fn new(access_key: String) -> Self {
        Self::with_api_base(access_key, UNSPLASH_API_BASE.to_string())
    }

    pub fn with_api_base(access_key: String, api_base: String) -> Self {
        Self {
            access_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn random_url(&self, count: usize) -> String {
        format!(
            "{}/photos/random?count={}&client_id={}",
            self.api_base, count, self.access_key
        )
    }
}

/// Decode a `/photos/random` response body.
pub fn parse_random_photos(body: &str) -> Result<Vec<PhotoCandidate>> {
    let photos: Vec<UnsplashPhoto> =
        serde_json::from_str(body).context("Failed to parse Unsplash photos response")?;
    Ok(photos.into_iter().map(PhotoCandidate::from).collect())
}

#[async_trait]
impl ImageSource for UnsplashSource {
    async fn fetch_random(&self, count: usize) -> Result<Vec<PhotoCandidate>> {
        let response = self
            .client
            .get(self.random_url(count))
            .send()
            .await
            .context("Failed to send request to Unsplash API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Unsplash API error ({}): {}", status, error_text);
        }

        let body = response
            .text()
            .await
            .context("Failed to read Unsplash response body")?;
        parse_random_photos(&body)
    }
}
