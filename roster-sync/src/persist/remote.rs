//! Remote mirror in an object store bucket.
//!
//! Speaks the Supabase Storage REST shape:
//! ```text
//! GET  {base}/storage/v1/object/{bucket}/{key}            → download
//! POST {base}/storage/v1/object/{bucket}/{key}            → upload
//!      x-upsert: true                                       (overwrite)
//! ```
//! Both requests carry the service key as `apikey` and as a bearer token.
//! Every call is bounded by [`RemoteConfig::timeout`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use roster_core::Collection;

use super::{decode, encode, PersistError, SnapshotStore};

/// Remote mirror configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Service or anon key
    pub api_key: String,
    /// Storage bucket
    pub bucket: String,
    /// Object key of the snapshot inside the bucket
    pub object_key: String,
    /// Upper bound for a single request
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            bucket: "roster".to_string(),
            object_key: "data-mirror.json".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct RemoteMirror {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteMirror {
    pub fn new(config: RemoteConfig) -> Result<Self, PersistError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn object_url(&self) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.bucket,
            self.config.object_key
        )
    }

    fn transport_error(&self, e: reqwest::Error) -> PersistError {
        if e.is_timeout() {
            PersistError::Timeout(self.config.timeout)
        } else {
            PersistError::Http(e)
        }
    }

    async fn rejected(&self, response: reqwest::Response) -> PersistError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        PersistError::Rejected { status, body }
    }
}

/// Supabase reports a missing object either as a plain 404 or as a 400
/// whose body names `not_found`.
fn is_missing_object(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST
            && (body.contains("not_found") || body.contains("Object not found")))
}

#[async_trait]
impl SnapshotStore for RemoteMirror {
    async fn load(&self) -> Result<Option<Collection>, PersistError> {
        let response = self
            .client
            .get(self.object_url())
            .bearer_auth(&self.config.api_key)
            .header("apikey", &self.config.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_missing_object(status, &body) {
                log::info!("No remote snapshot at {}", self.object_url());
                return Ok(None);
            }
            return Err(PersistError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        decode(&text).map(Some)
    }

    async fn save(&self, snapshot: &Collection) -> Result<(), PersistError> {
        let text = encode(snapshot)?;
        let response = self
            .client
            .post(self.object_url())
            .bearer_auth(&self.config.api_key)
            .header("apikey", &self.config.api_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(text)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.rejected(response).await);
        }
        log::debug!("Remote mirror updated at {}", self.object_url());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("remote mirror {}", self.object_url())
    }
}
