//! Client for the public skin texture host

use crate::validate::validate_skin_hash;
use crate::{Error, Result};
use log::debug;
use std::time::Duration;

/// Default texture host base URL; the hash is appended as the last path segment.
pub const DEFAULT_TEXTURE_HOST: &str = "https://textures.minecraft.net/texture/";

/// Downloads skin images by texture hash.
#[derive(Debug, Clone)]
pub struct TextureHost {
    client: reqwest::Client,
    base_url: String,
}

impl TextureHost {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_TEXTURE_HOST, timeout)
    }

    /// Use a different host, e.g. a mirror or a local test server.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mcskin-render/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// URL of the skin image for `hash`.
    pub fn skin_url(&self, hash: &str) -> Result<String> {
        let hash = validate_skin_hash(hash)?;
        Ok(format!("{}{}", self.base_url, hash.to_ascii_lowercase()))
    }

    /// Fetch the encoded skin image for `hash`.
    pub async fn fetch_skin(&self, hash: &str) -> Result<Vec<u8>> {
        let url = self.skin_url(hash)?;
        debug!("fetching skin {}", url);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(hash.to_string()));
        }
        if !status.is_success() {
            return Err(Error::TextureHost(format!("{} returned HTTP {}", url, status)));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::TextureHost(format!("{} returned an empty body", url)));
        }
        Ok(bytes.to_vec())
    }
}
