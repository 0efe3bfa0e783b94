//! Elasticsearch implementation of [`SearchIndex`] over the HTTP API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use etl_types::ElasticsearchSettings;

use crate::bulk::{parse_bulk_response, to_ndjson, BulkAction, BulkSummary};
use crate::error::SearchError;
use crate::index::SearchIndex;

/// Elasticsearch client bound to one cluster URL.
pub struct ElasticIndex {
    client: Client,
    base_url: String,
}

impl ElasticIndex {
    /// Create a client for the cluster at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &ElasticsearchSettings) -> Result<Self, SearchError> {
        Self::new(&settings.url, Duration::from_secs(settings.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn error_for(response: reqwest::Response) -> SearchError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SearchError::Status { status, body }
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn exists(&self, index: &str) -> Result<bool, SearchError> {
        let response = self.client.head(self.url(index)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::error_for(response).await),
        }
    }

    async fn create(&self, index: &str, mapping: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(index))
            .json(mapping)
            .send()
            .await?;

        if response.status().is_success() {
            info!(index, "Created search index");
            return Ok(());
        }

        // Lost a create race with another writer: the index is there, which is all we need
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception")
        {
            debug!(index, "Search index already exists");
            return Ok(());
        }
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn bulk(&self, actions: &[BulkAction]) -> Result<BulkSummary, SearchError> {
        if actions.is_empty() {
            return Ok(BulkSummary::default());
        }

        let body = to_ndjson(actions)?;
        let response = self
            .client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;
        let summary = parse_bulk_response(&body)?;
        debug!(
            items = summary.items,
            failed = summary.errors.len(),
            "Bulk request complete"
        );
        Ok(summary)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, SearchError> {
        let response = self
            .client
            .get(self.url(&format!("{}/_doc/{}", index, id)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let mut body: Value = response
                    .json()
                    .await
                    .map_err(|e| SearchError::Decode(e.to_string()))?;
                Ok(Some(body["_source"].take()))
            }
            _ => Err(Self::error_for(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ElasticIndex {
        ElasticIndex::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_exists() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/movies"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/series"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let index = client_for(&server);
        assert!(index.exists("movies").await.unwrap());
        assert!(!index.exists("series").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_surfaces_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).exists("movies").await.unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_create_sends_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/movies"))
            .and(body_string_contains("ru_en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mapping = crate::mapping::movies_mapping().unwrap();
        client_for(&server).create("movies", &mapping).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_tolerates_existing_index() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/movies"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "resource_already_exists_exception", "reason": "index [movies] already exists"},
                "status": 400
            })))
            .mount(&server)
            .await;

        client_for(&server)
            .create("movies", &json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bulk_posts_ndjson() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(body_string_contains(r#""_id":"a""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 1,
                "errors": false,
                "items": [{"index": {"_index": "movies", "_id": "a", "status": 201}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let actions = vec![BulkAction::index("movies", "a", &json!({"id": "a"})).unwrap()];
        let summary = client_for(&server).bulk(&actions).await.unwrap();
        assert!(summary.is_ok());
        assert_eq!(summary.items, 1);
    }

    #[tokio::test]
    async fn test_bulk_reports_item_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 1,
                "errors": true,
                "items": [{"index": {
                    "_index": "movies", "_id": "a", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "bad rating"}
                }}]
            })))
            .mount(&server)
            .await;

        let actions = vec![BulkAction::index("movies", "a", &json!({"id": "a"})).unwrap()];
        let summary = client_for(&server).bulk(&actions).await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].error_type, "mapper_parsing_exception");
    }

    #[tokio::test]
    async fn test_bulk_without_actions_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let summary = client_for(&server).bulk(&[]).await.unwrap();
        assert_eq!(summary, BulkSummary::default());
    }

    #[tokio::test]
    async fn test_get_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/_doc/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_index": "movies",
                "_id": "a",
                "found": true,
                "_source": {"id": "a", "title": "Star Trek"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movies/_doc/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"found": false})))
            .mount(&server)
            .await;

        let index = client_for(&server);
        let doc = index.get("movies", "a").await.unwrap().unwrap();
        assert_eq!(doc["title"], "Star Trek");
        assert!(index.get("movies", "missing").await.unwrap().is_none());
    }
}
