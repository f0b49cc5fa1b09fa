//! Pinecone REST adapter for the vector store
//!
//! Control-plane calls (list/create/describe index) go to the global API; the
//! index's data-plane host is resolved once and reused for upsert, query,
//! list and fetch.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{Metric, MetadataFilter, SimilarityMatch, VectorMetadata, VectorRecord, VectorStore};
use crate::config::VectorStoreConfig;
use crate::error::StoreError;

const API_VERSION: &str = "2024-07";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Pinecone caps list pages and fetch batches at 100 ids
const PAGE_LIMIT: usize = 100;

pub struct PineconeVectorStore {
  client: Client,
  config: VectorStoreConfig,
  host: OnceCell<String>,
}

impl PineconeVectorStore {
  pub fn new(api_key: &str, config: VectorStoreConfig) -> Result<Self, StoreError> {
    if api_key.trim().is_empty() {
      return Err(StoreError::Transport { message: "missing Pinecone API key".to_string() });
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      "Api-Key",
      HeaderValue::from_str(api_key.trim())
        .map_err(|e| StoreError::Transport { message: format!("invalid Pinecone API key: {e}") })?,
    );
    headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = Client::builder().timeout(REQUEST_TIMEOUT).default_headers(headers).build()?;

    let host = OnceCell::new();
    if let Some(configured) = config.host.as_deref() {
      // set() only fails when already initialised, which cannot happen here
      let _ = host.set(normalize_host(configured));
    }

    Ok(Self { client, config, host })
  }

  fn control_url(&self, path: &str) -> String {
    format!("{}{}", self.config.control_plane_url.trim_end_matches('/'), path)
  }

  async fn data_url(&self, path: &str) -> Result<String, StoreError> {
    let host = self.host.get_or_try_init(|| self.describe_host()).await?;
    Ok(format!("{host}{path}"))
  }

  async fn describe_host(&self) -> Result<String, StoreError> {
    let url = self.control_url(&format!("/indexes/{}", self.config.index_name));
    let description: IndexDescription = send_json(self.client.get(url)).await?;
    Ok(normalize_host(&description.host))
  }

  async fn index_exists(&self) -> Result<bool, StoreError> {
    let listing: IndexList = send_json(self.client.get(self.control_url("/indexes"))).await?;
    Ok(listing.indexes.iter().any(|index| index.name == self.config.index_name))
  }

  async fn list_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
    let mut ids = Vec::new();
    let mut token: Option<String> = None;

    while ids.len() < limit {
      let page_size = (limit - ids.len()).min(PAGE_LIMIT);
      let mut request =
        self.client.get(self.data_url("/vectors/list").await?).query(&[("limit", page_size)]);
      if let Some(token) = &token {
        request = request.query(&[("paginationToken", token)]);
      }

      let page: ListPage = send_json(request).await?;
      ids.extend(page.vectors.into_iter().map(|entry| entry.id));
      token = page.pagination.and_then(|p| p.next);
      if token.is_none() {
        break;
      }
    }

    ids.truncate(limit);
    Ok(ids)
  }

  async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError> {
    let mut records = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(PAGE_LIMIT) {
      let query: Vec<(&str, &str)> = chunk.iter().map(|id| ("ids", id.as_str())).collect();
      let request = self.client.get(self.data_url("/vectors/fetch").await?).query(&query);
      let mut response: FetchResponse = send_json(request).await?;

      // fetch answers with a map; keep the listing order
      for id in chunk {
        if let Some(vector) = response.vectors.remove(id) {
          if let Some(metadata) = vector.metadata {
            records.push(VectorRecord { id: vector.id, values: vector.values, metadata });
          }
        }
      }
    }
    Ok(records)
  }
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
  async fn ensure_index(&self, dimension: usize, metric: Metric) -> Result<(), StoreError> {
    if self.index_exists().await? {
      return Ok(());
    }

    let body = json!({
      "name": self.config.index_name,
      "dimension": dimension,
      "metric": metric.as_str(),
      "spec": { "serverless": { "cloud": self.config.cloud, "region": self.config.region } },
    });
    let response = self.client.post(self.control_url("/indexes")).json(&body).send().await?;
    let status = response.status();
    // 409: created concurrently by another request
    if !status.is_success() && status != reqwest::StatusCode::CONFLICT {
      let body = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
      return Err(StoreError::Transport { message: format!("create index failed ({status}): {body}") });
    }

    tracing::info!(index = %self.config.index_name, dimension, "created new index");
    Ok(())
  }

  async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError> {
    let body = UpsertRequest { vectors: vec![record] };
    let request = self.client.post(self.data_url("/vectors/upsert").await?).json(&body);
    let _: Value = send_json(request).await?;
    Ok(())
  }

  async fn query(
    &self,
    vector: &[f32],
    top_k: usize,
    filter: Option<MetadataFilter>,
  ) -> Result<Vec<SimilarityMatch>, StoreError> {
    let mut body = json!({
      "vector": vector,
      "topK": top_k,
      "includeValues": false,
      "includeMetadata": true,
    });
    if let Some(filter) = filter.filter(|f| !f.conditions().is_empty()) {
      body["filter"] = filter_to_json(&filter);
    }

    let request = self.client.post(self.data_url("/query").await?).json(&body);
    let response: QueryResponse = send_json(request).await?;
    Ok(
      response
        .matches
        .into_iter()
        .map(|m| SimilarityMatch { id: m.id, score: m.score, metadata: m.metadata })
        .collect(),
    )
  }

  async fn fetch_sample(&self, limit: usize) -> Result<Vec<VectorRecord>, StoreError> {
    if limit == 0 {
      return Ok(Vec::new());
    }
    let ids = self.list_ids(limit).await?;
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    self.fetch(&ids).await
  }
}

fn normalize_host(host: &str) -> String {
  let host = host.trim_end_matches('/');
  if host.starts_with("http://") || host.starts_with("https://") {
    host.to_string()
  } else {
    format!("https://{host}")
  }
}

fn filter_to_json(filter: &MetadataFilter) -> Value {
  let mut clauses = Map::new();
  for (field, value) in filter.conditions() {
    clauses.insert(field.clone(), json!({ "$eq": value }));
  }
  Value::Object(clauses)
}

async fn send_json<T: for<'de> Deserialize<'de>>(
  request: reqwest::RequestBuilder,
) -> Result<T, StoreError> {
  let response = request.send().await?;
  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
    return Err(StoreError::Transport { message: format!("Pinecone request failed ({status}): {body}") });
  }
  response.json::<T>().await.map_err(|e| StoreError::Decode { message: e.to_string() })
}

#[derive(Serialize)]
struct UpsertRequest {
  vectors: Vec<VectorRecord>,
}

#[derive(Deserialize)]
struct IndexList {
  #[serde(default)]
  indexes: Vec<IndexDescription>,
}

#[derive(Deserialize)]
struct IndexDescription {
  name: String,
  #[serde(default)]
  host: String,
}

#[derive(Deserialize)]
struct QueryResponse {
  #[serde(default)]
  matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
  id: String,
  score: f32,
  #[serde(default)]
  metadata: Option<VectorMetadata>,
}

#[derive(Deserialize)]
struct ListPage {
  #[serde(default)]
  vectors: Vec<ListEntry>,
  #[serde(default)]
  pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListEntry {
  id: String,
}

#[derive(Deserialize)]
struct Pagination {
  next: Option<String>,
}

#[derive(Deserialize)]
struct FetchResponse {
  #[serde(default)]
  vectors: HashMap<String, FetchedVector>,
}

#[derive(Deserialize)]
struct FetchedVector {
  id: String,
  values: Vec<f32>,
  #[serde(default)]
  metadata: Option<VectorMetadata>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_filter_uses_eq_operator() {
    let filter = MetadataFilter::new().eq("genre", "errors");
    assert_eq!(filter_to_json(&filter), json!({ "genre": { "$eq": "errors" } }));
  }

  #[test]
  fn test_host_gets_scheme() {
    assert_eq!(normalize_host("errors-abc.svc.pinecone.io"), "https://errors-abc.svc.pinecone.io");
    assert_eq!(normalize_host("http://localhost:5080/"), "http://localhost:5080");
  }

  #[test]
  fn test_missing_api_key_is_rejected() {
    assert!(PineconeVectorStore::new("  ", VectorStoreConfig::default()).is_err());
  }

  #[test]
  fn test_query_response_tolerates_missing_metadata() {
    let parsed: QueryResponse =
      serde_json::from_str(r#"{"matches":[{"id":"a","score":0.91}],"namespace":""}"#).unwrap();
    assert_eq!(parsed.matches.len(), 1);
    assert!(parsed.matches[0].metadata.is_none());
  }

  #[test]
  fn test_upsert_body_shape() {
    let body = UpsertRequest {
      vectors: vec![VectorRecord {
        id: "e1".to_string(),
        values: vec![0.5, 0.5],
        metadata: VectorMetadata {
          genre: "errors".to_string(),
          caller_id: "key-1".to_string(),
          issue: "app.py:42".to_string(),
          timestamp: "2025-01-01T00:00:00Z".to_string(),
        },
      }],
    };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(value["vectors"][0]["metadata"]["genre"], "errors");
    assert_eq!(value["vectors"][0]["values"], json!([0.5, 0.5]));
  }
}
