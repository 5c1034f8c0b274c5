//! HTTP document-store repository
//!
//! Stores one JSON document per key:
//!
//! - `GET  {base_url}/{runs}/{run_id}` reads a run (404 means absent)
//! - `PUT  {base_url}/{runs}/{run_id}` replaces it
//! - `GET  {base_url}/{runs}?user_id=...` lists a user's run documents
//! - `GET|PUT  {base_url}/{rotation}/{user_id}/{profile_id}` for rotation cursors
//!
//! Every id is its own percent-encoded path segment. Requests carry
//! `Authorization: Bearer <api_key>` when a key is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::{Result, StoreError};
use crate::store::{RotationCursor, RunRepository};
use crate::types::Run;

pub struct DocumentRepository {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    runs_collection: String,
    rotation_collection: String,
}

/// Rotation cursor document
#[derive(Debug, Serialize, Deserialize)]
struct RotationDocument {
    user_id: String,
    profile_id: String,
    last_author_index: i64,
    updated_at: DateTime<Utc>,
}

impl DocumentRepository {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(config.base_url.clone()).into());
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::Remote)?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            runs_collection: config.runs_collection.clone(),
            rotation_collection: config.rotation_collection.clone(),
        })
    }

    fn document_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(StoreError::RemoteStatus {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn get_document<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(StoreError::Remote)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let resp = Self::check_status(resp).await?;
        let document = resp.json::<T>().await.map_err(StoreError::Remote)?;
        Ok(Some(document))
    }

    async fn put_document<T: Serialize + Sync>(&self, url: Url, document: &T) -> Result<()> {
        let resp = self
            .authorize(self.client.put(url))
            .json(document)
            .send()
            .await
            .map_err(StoreError::Remote)?;

        Self::check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RunRepository for DocumentRepository {
    fn name(&self) -> &str {
        "remote"
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        let url = self.document_url(&[self.runs_collection.as_str(), run.id.as_str()])?;
        self.put_document(url, run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let url = self.document_url(&[self.runs_collection.as_str(), run_id])?;
        self.get_document(url).await
    }

    async fn list_runs(&self, user_id: &str) -> Result<Vec<Run>> {
        let url = self.document_url(&[self.runs_collection.as_str()])?;
        let resp = self
            .authorize(self.client.get(url).query(&[("user_id", user_id)]))
            .send()
            .await
            .map_err(StoreError::Remote)?;

        let resp = Self::check_status(resp).await?;
        let mut runs: Vec<Run> = resp.json().await.map_err(StoreError::Remote)?;
        runs.retain(|run| run.user_id == user_id);
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn get_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<RotationCursor>> {
        let url = self.document_url(&[self.rotation_collection.as_str(), user_id, profile_id])?;
        let document: Option<RotationDocument> = self.get_document(url).await?;
        Ok(document.map(|d| RotationCursor {
            last_author_index: d.last_author_index,
            updated_at: d.updated_at,
        }))
    }

    async fn set_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: RotationCursor,
    ) -> Result<()> {
        let url = self.document_url(&[self.rotation_collection.as_str(), user_id, profile_id])?;
        let document = RotationDocument {
            user_id: user_id.to_string(),
            profile_id: profile_id.to_string(),
            last_author_index: cursor.last_author_index,
            updated_at: cursor.updated_at,
        };
        self.put_document(url, &document).await
    }
}
