//! Cover Art Archive client.
//!
//! Fetches release-group front covers for albums that ended up with no local
//! artwork. No API key required.
use thiserror::Error;

const BASE_URL: &str = "https://coverartarchive.org";

#[derive(Error, Debug)]
pub enum CoverArtError {
    #[error("network error: {0}")]
    Network(String),
    #[error("no cover art for release group {0}")]
    NotFound(String),
}

/// Downloaded cover image.
#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime_type: String,
}

pub struct CoverArtClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CoverArtClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the 500px front cover for a release group.
    pub async fn front_cover(&self, release_group_id: &str) -> Result<CoverArt, CoverArtError> {
        let url = format!(
            "{}/release-group/{}/front-500",
            self.base_url, release_group_id
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoverArtError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoverArtError::NotFound(release_group_id.to_string()));
        }
        if !status.is_success() {
            return Err(CoverArtError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| CoverArtError::Network(e.to_string()))?
            .to_vec();

        Ok(CoverArt { data, mime_type })
    }
}

impl Default for CoverArtClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let client = CoverArtClient::new();
        assert_eq!(client.base_url, "https://coverartarchive.org");
    }
}
