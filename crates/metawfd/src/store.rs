//! HTTP client for the metadata store.
//!
//! Implements the document-service contract from spec Section 6: `GET
//! item(id)`, `POST <collection>`, `PATCH item(id)`, `POST /embed`
//! (chunked at 5 ids per request), `GET /search`. Grounded in
//! `original_source/magma_ff/utils.py` (`make_embed_request`,
//! `chunk_ids`) and the teacher's `loopctl::client::Client` for the
//! reqwest wrapper shape.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `chunk_ids` in the source system chunks at 5 entries per `/embed` request.
const EMBED_CHUNK_SIZE: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ERR_STORE_IO: {0}")]
    Io(String),
    #[error("ERR_NOT_FOUND: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// HTTP client for the metadata store.
pub struct StoreClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(base_url: &str, auth_token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn check(&self, response: reqwest::Response, id: &str) -> Result<reqwest::Response, StoreError> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Io(format!("{status}: {body}")));
        }
        Ok(response)
    }

    /// `GET item(id)`.
    pub async fn get_item<T: DeserializeOwned>(&self, id: &str) -> Result<T, StoreError> {
        let url = format!("{}/{id}", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        let response = self.check(response, id).await?;
        Ok(response.json().await?)
    }

    /// `POST <collection>, body`.
    pub async fn create<T: Serialize, R: DeserializeOwned>(
        &self,
        collection: &str,
        body: &T,
    ) -> Result<R, StoreError> {
        let url = format!("{}/{collection}", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        let response = self.check(response, collection).await?;
        Ok(response.json().await?)
    }

    /// `PATCH item(id), body`.
    pub async fn patch<T: Serialize>(&self, id: &str, body: &T) -> Result<(), StoreError> {
        let url = format!("{}/{id}", self.base_url);
        let response = self
            .http
            .patch(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        self.check(response, id).await?;
        Ok(())
    }

    /// `GET /search?type=T&<filters>`.
    pub async fn search<R: DeserializeOwned>(
        &self,
        item_type: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<R>, StoreError> {
        let mut url = format!("{}/search?type={item_type}", self.base_url);
        for (k, v) in filters {
            url.push('&');
            url.push_str(&format!("{k}={}", urlencoding::encode(v)));
        }
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        let response = self.check(response, item_type).await?;
        Ok(response.json().await?)
    }

    /// `POST /embed, {ids:[...], fields:[...]}`, chunked at
    /// `EMBED_CHUNK_SIZE` ids per request, results concatenated in order.
    pub async fn embed(&self, ids: &[String], fields: &[String]) -> Result<Vec<Value>, StoreError> {
        let mut results = Vec::with_capacity(ids.len());
        for chunk in chunk_ids(ids, EMBED_CHUNK_SIZE) {
            let url = format!("{}/embed", self.base_url);
            let body = serde_json::json!({ "ids": chunk, "fields": fields });
            let response = self
                .http
                .post(&url)
                .headers(self.headers())
                .json(&body)
                .send()
                .await?;
            let response = self.check(response, "embed").await?;
            let mut batch: Vec<Value> = response.json().await?;
            results.append(&mut batch);
        }
        Ok(results)
    }
}

/// Split `ids` into chunks of at most `size` entries, preserving order.
fn chunk_ids(ids: &[String], size: usize) -> Vec<Vec<String>> {
    ids.chunks(size).map(<[String]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_splits_at_five() {
        let ids: Vec<String> = (0..12).map(|i| format!("id-{i}")).collect();
        let chunks = chunk_ids(&ids, EMBED_CHUNK_SIZE);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 5);
        assert_eq!(chunks[1].len(), 5);
        assert_eq!(chunks[2].len(), 2);
    }

    #[test]
    fn chunk_ids_handles_exact_multiple() {
        let ids: Vec<String> = (0..10).map(|i| format!("id-{i}")).collect();
        let chunks = chunk_ids(&ids, EMBED_CHUNK_SIZE);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn chunk_ids_handles_empty() {
        let ids: Vec<String> = vec![];
        assert!(chunk_ids(&ids, EMBED_CHUNK_SIZE).is_empty());
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = StoreClient::new("http://localhost:8000/", None);
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
