//! `cachedContents` REST client.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{
    GeminiCachedContent, GeminiContent, GeminiCreateCacheRequest, GeminiListCachesResponse,
    GeminiUpdateCacheRequest,
};
use crate::{
    cache::{CacheResult, ContextCacheApi, RemoteCache},
    config::GeminiProviderConfig,
    pricing::normalize_model_id,
    providers::{decode_json, error::GeminiErrorParser, retry::with_backoff, send_checked},
};

use super::PROVIDER;

fn ttl_string(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}

/// Context cache operations against the Gemini API.
#[derive(Clone)]
pub struct GeminiCacheClient {
    client: reqwest::Client,
    config: GeminiProviderConfig,
}

impl GeminiCacheClient {
    pub fn new(config: GeminiProviderConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    fn collection_url(&self) -> String {
        format!("{}/cachedContents", self.config.base_url.trim_end_matches('/'))
    }

    /// URL of a single cache. `name` is the full resource name.
    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), name)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(super::API_KEY_HEADER, self.config.api_key.as_str())
            .timeout(self.config.timeout())
    }

    async fn list_page(&self, page_token: Option<&str>) -> CacheResult<GeminiListCachesResponse> {
        let url = self.collection_url();
        let page = with_backoff(&self.config.retry, PROVIDER, "list_caches", || async {
            let mut request = self.request(reqwest::Method::GET, &url);
            if let Some(token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = send_checked::<GeminiErrorParser>(PROVIDER, request).await?;
            decode_json::<GeminiListCachesResponse>(PROVIDER, response).await
        })
        .await?;
        Ok(page)
    }
}

impl std::fmt::Debug for GeminiCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiCacheClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContextCacheApi for GeminiCacheClient {
    #[tracing::instrument(
        skip(self, contents),
        fields(provider = PROVIDER, operation = "create_cache", model = model)
    )]
    async fn create(
        &self,
        model: &str,
        display_name: &str,
        contents: &str,
        ttl: Duration,
    ) -> CacheResult<RemoteCache> {
        let request = GeminiCreateCacheRequest {
            model: format!("models/{}", normalize_model_id(model)),
            display_name: display_name.to_string(),
            contents: vec![GeminiContent::text("user", contents)],
            ttl: ttl_string(ttl),
        };
        // Pre-serialize request body before retry loop to avoid repeated serialization
        let body = serde_json::to_vec(&request).unwrap_or_default();
        let url = self.collection_url();

        let cache = with_backoff(&self.config.retry, PROVIDER, "create_cache", || async {
            let request = self
                .request(reqwest::Method::POST, &url)
                .header("content-type", "application/json")
                .body(body.clone());
            let response = send_checked::<GeminiErrorParser>(PROVIDER, request).await?;
            decode_json::<GeminiCachedContent>(PROVIDER, response).await
        })
        .await?;
        Ok(cache.into_remote())
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER, operation = "list_caches"))]
    async fn list(&self) -> CacheResult<Vec<RemoteCache>> {
        let mut caches = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(page_token.as_deref()).await?;
            caches.extend(page.cached_contents.into_iter().map(GeminiCachedContent::into_remote));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        tracing::debug!(count = caches.len(), "Listed context caches");
        Ok(caches)
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER, operation = "update_cache"))]
    async fn update_ttl(&self, name: &str, ttl: Duration) -> CacheResult<RemoteCache> {
        let body = serde_json::to_vec(&GeminiUpdateCacheRequest {
            ttl: ttl_string(ttl),
        })
        .unwrap_or_default();
        let url = self.resource_url(name);

        let cache = with_backoff(&self.config.retry, PROVIDER, "update_cache", || async {
            let request = self
                .request(reqwest::Method::PATCH, &url)
                .query(&[("updateMask", "ttl")])
                .header("content-type", "application/json")
                .body(body.clone());
            let response = send_checked::<GeminiErrorParser>(PROVIDER, request).await?;
            decode_json::<GeminiCachedContent>(PROVIDER, response).await
        })
        .await?;
        Ok(cache.into_remote())
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER, operation = "delete_cache"))]
    async fn delete(&self, name: &str) -> CacheResult<()> {
        let url = self.resource_url(name);
        with_backoff(&self.config.retry, PROVIDER, "delete_cache", || async {
            let request = self.request(reqwest::Method::DELETE, &url);
            send_checked::<GeminiErrorParser>(PROVIDER, request).await?;
            Ok::<_, crate::providers::EngineError>(())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path, query_param},
    };

    use super::*;
    use crate::{cache::CacheError, config::RetryConfig, providers::ErrorKind};

    fn client_for(server: &MockServer) -> GeminiCacheClient {
        let config = GeminiProviderConfig {
            api_key: "test-key".into(),
            model: "gemini-2.5-flash-lite".into(),
            base_url: server.uri(),
            timeout_secs: 5,
            retry: RetryConfig {
                enabled: true,
                max_attempts: 3,
                backoff_unit_ms: 1,
            },
        };
        GeminiCacheClient::new(config, reqwest::Client::new())
    }

    fn cache_json(name: &str, display_name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "displayName": display_name,
            "model": "models/gemini-2.5-flash-lite",
            "createTime": "2026-03-01T12:00:00Z",
            "expireTime": "2026-03-01T13:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_create_sends_model_contents_and_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cachedContents"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "model": "models/gemini-2.5-flash-lite",
                "displayName": "run-1",
                "contents": [{"role": "user", "parts": [{"text": "grounding"}]}],
                "ttl": "3600s"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(cache_json("cachedContents/abc", "run-1")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = client_for(&server)
            .create(
                "models/gemini-2.5-flash-lite",
                "run-1",
                "grounding",
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        assert_eq!(cache.name, "cachedContents/abc");
        assert_eq!(cache.display_name.as_deref(), Some("run-1"));
        assert_eq!(
            cache.expire_time.unwrap().to_rfc3339(),
            "2026-03-01T13:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let server = MockServer::start().await;
        // More specific mock first so the unpaged one does not shadow it.
        Mock::given(method("GET"))
            .and(path("/cachedContents"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cachedContents": [cache_json("cachedContents/b", "run-2")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cachedContents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cachedContents": [cache_json("cachedContents/a", "run-1")],
                "nextPageToken": "p2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let caches = client_for(&server).list().await.unwrap();
        let names: Vec<&str> = caches.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cachedContents/a", "cachedContents/b"]);
    }

    #[tokio::test]
    async fn test_list_empty_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cachedContents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert!(client_for(&server).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_ttl_patches_with_mask() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/cachedContents/abc"))
            .and(query_param("updateMask", "ttl"))
            .and(body_partial_json(json!({"ttl": "3600s"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(cache_json("cachedContents/abc", "run-1")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = client_for(&server)
            .update_ttl("cachedContents/abc", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(cache.expire_time.is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cachedContents/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .delete("cachedContents/abc")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_create_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cachedContents"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cachedContents"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(cache_json("cachedContents/abc", "run-1")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = client_for(&server)
            .create("gemini-2.5-flash-lite", "run-1", "grounding", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.name, "cachedContents/abc");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/cachedContents/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "status": "NOT_FOUND", "message": "no such cache"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .delete("cachedContents/gone")
            .await
            .unwrap_err();
        match err {
            CacheError::Provider(e) => assert_eq!(e.kind(), ErrorKind::InvalidRequest),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_api_key() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GeminiCacheClient::new(
            GeminiProviderConfig {
                api_key: "AIza-secret-value".into(),
                model: "gemini-2.5-flash-lite".into(),
                base_url: format!("http://{addr}"),
                timeout_secs: 5,
                retry: RetryConfig::default(),
            },
            reqwest::Client::new(),
        );

        let list_err = client.list().await.unwrap_err();
        let create_err = client
            .create("gemini-2.5-flash-lite", "run-1", "grounding", Duration::from_secs(60))
            .await
            .unwrap_err();
        for err in [list_err, create_err] {
            assert!(!err.to_string().contains("AIza-secret-value"));
            assert!(!format!("{err:?}").contains("AIza-secret-value"));
        }
    }
}
