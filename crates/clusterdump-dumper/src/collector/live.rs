//! Live Kubernetes API collector
//!
//! Every resource type is listed cluster-wide with `limit`/`continue`
//! pagination. A background task per resource type fetches pages ahead of the
//! consuming worker, up to `page_buffer_size` pages, and every request first
//! takes a permit from the rate limiter shared by all resource types.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use super::RecordStream;
use crate::config::LiveCollectorConfig;
use crate::error::{DumpError, Result};
use crate::resource::{RawObject, ResourceType};

/// One page of a paginated list call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Token for the next page; `None` on the last page
    pub continue_token: Option<String>,
}

/// Paginated access to one cluster's objects
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn list_page(
        &self,
        resource: ResourceType,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<Page>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    metadata: ListMeta,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(rename = "continue", default)]
    continue_token: Option<String>,
}

/// Kubernetes API server client
pub struct KubeApiClient {
    client: Client,
    api_server: String,
    bearer_token: Option<String>,
}

impl KubeApiClient {
    pub fn new(config: &LiveCollectorConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| DumpError::io("read", path, e))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                DumpError::config(format!("invalid CA bundle {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| DumpError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_server: config.api_server.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl PageSource for KubeApiClient {
    async fn list_page(
        &self,
        resource: ResourceType,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<Page> {
        let url = format!("{}{}", self.api_server, resource.api_path());

        let mut request = self.client.get(&url).query(&[("limit", limit.to_string())]);
        if let Some(token) = continue_token {
            request = request.query(&[("continue", token)]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DumpError::SourceUnreachable(format!("{}: {}", self.api_server, e))
            } else {
                DumpError::collection(resource, e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DumpError::Unauthorized(format!(
                "listing {} returned {}",
                resource, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DumpError::collection(
                resource,
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        let list: ListResponse = response
            .json()
            .await
            .map_err(|e| DumpError::collection(resource, format!("invalid list response: {}", e)))?;

        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Streams every object of a resource type from a [`PageSource`]
pub struct LiveCollector {
    source: Arc<dyn PageSource>,
    limiter: Arc<RateLimiter>,
    page_size: u32,
    page_buffer_size: usize,
    cluster_name: String,
}

impl LiveCollector {
    pub fn new(source: Arc<dyn PageSource>, config: &LiveCollectorConfig) -> Result<Self> {
        let rate = NonZeroU32::new(config.rate_limit_per_second).ok_or_else(|| {
            DumpError::config("collector.live.rate_limit_per_second must be greater than 0")
        })?;

        Ok(Self {
            source,
            limiter: Arc::new(RateLimiter::per_second(rate)),
            page_size: config.page_size,
            page_buffer_size: config.page_buffer_size.max(1),
            cluster_name: config.cluster_name.clone(),
        })
    }

    pub fn from_config(config: &LiveCollectorConfig) -> Result<Self> {
        Self::new(Arc::new(KubeApiClient::new(config)?), config)
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Stream all objects of `resource`.
    ///
    /// Pages are fetched in order by a background task; the stream ends after
    /// the last page, after the first error, or once `cancel` fires.
    pub fn produce(&self, resource: ResourceType, cancel: CancellationToken) -> RecordStream {
        let (tx, rx) = mpsc::channel(self.page_buffer_size);

        tokio::spawn(fetch_pages(
            Arc::clone(&self.source),
            Arc::clone(&self.limiter),
            resource,
            self.page_size,
            tx,
            cancel,
        ));

        ReceiverStream::new(rx)
            .flat_map(move |page: Result<Vec<Value>>| {
                let objects: Vec<Result<RawObject>> = match page {
                    Ok(items) => items
                        .into_iter()
                        .map(|value| Ok(RawObject::new(resource, value)))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(objects)
            })
            .boxed()
    }
}

async fn fetch_pages(
    source: Arc<dyn PageSource>,
    limiter: Arc<RateLimiter>,
    resource: ResourceType,
    page_size: u32,
    tx: mpsc::Sender<Result<Vec<Value>>>,
    cancel: CancellationToken,
) {
    let mut continue_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = async {
                limiter.acquire().await;
                source.list_page(resource, page_size, continue_token.as_deref()).await
            } => fetched,
        };

        match fetched {
            Ok(page) => {
                pages += 1;
                let next = page.continue_token;

                let delivered = tokio::select! {
                    _ = cancel.cancelled() => false,
                    sent = tx.send(Ok(page.items)) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }

                match next {
                    Some(token) => continue_token = Some(token),
                    None => break,
                }
            },
            Err(e) => {
                warn!(%resource, error = %e, "List call failed");
                tokio::select! {
                    _ = cancel.cancelled() => {},
                    _ = tx.send(Err(e)) => {},
                }
                break;
            },
        }
    }

    debug!(%resource, pages, "Page fetcher finished");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves `pages` pages of one item each and records request times
    struct FakeSource {
        pages: usize,
        calls: Mutex<Vec<Instant>>,
        fail_at: Option<usize>,
    }

    impl FakeSource {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                calls: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn list_page(
            &self,
            resource: ResourceType,
            _limit: u32,
            continue_token: Option<&str>,
        ) -> Result<Page> {
            self.calls.lock().unwrap().push(Instant::now());
            let index: usize = continue_token.map(|t| t.parse().unwrap()).unwrap_or(0);

            if self.fail_at == Some(index) {
                return Err(DumpError::collection(resource, "HTTP 500"));
            }

            Ok(Page {
                items: vec![json!({"metadata": {"name": format!("obj-{}", index)}})],
                continue_token: (index + 1 < self.pages).then(|| (index + 1).to_string()),
            })
        }
    }

    fn config(rate: u32, buffer: usize) -> LiveCollectorConfig {
        LiveCollectorConfig {
            rate_limit_per_second: rate,
            page_buffer_size: buffer,
            page_size: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_rate_is_bounded_across_resource_types() {
        let source = Arc::new(FakeSource::new(6));
        let collector = LiveCollector::new(source.clone(), &config(4, 10)).unwrap();

        let streams: Vec<_> = [ResourceType::Nodes, ResourceType::ClusterRoles, ResourceType::Pods]
            .into_iter()
            .map(|r| collector.produce(r, CancellationToken::new()))
            .collect();

        let results = futures::future::join_all(
            streams.into_iter().map(|s| s.try_collect::<Vec<_>>()),
        )
        .await;

        for objects in results {
            assert_eq!(objects.unwrap().len(), 6);
        }

        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls.len(), 18);
        for window in calls.windows(5) {
            assert!(window[4].duration_since(window[0]) >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetcher_stays_within_page_buffer() {
        let source = Arc::new(FakeSource::new(50));
        let collector = LiveCollector::new(source.clone(), &config(1000, 2)).unwrap();

        let mut stream = collector.produce(ResourceType::Nodes, CancellationToken::new());
        stream.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // One page consumed, two buffered, one blocked in send
        assert!(source.calls.lock().unwrap().len() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_stream_after_delivering_earlier_pages() {
        let mut source = FakeSource::new(5);
        source.fail_at = Some(2);
        let collector = LiveCollector::new(Arc::new(source), &config(100, 10)).unwrap();

        let results: Vec<_> = collector
            .produce(ResourceType::Nodes, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(results[2], Err(DumpError::Collection { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_stream() {
        let source = Arc::new(FakeSource::new(1000));
        let collector = LiveCollector::new(source.clone(), &config(1, 1)).unwrap();
        let cancel = CancellationToken::new();

        let mut stream = collector.produce(ResourceType::Nodes, cancel.clone());
        stream.next().await.unwrap().unwrap();
        cancel.cancel();

        let rest: Vec<_> = stream.collect().await;
        assert!(rest.len() <= 1);
        assert!(source.calls.lock().unwrap().len() < 1000);
    }

    #[tokio::test]
    async fn test_kube_client_follows_continue_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .and(query_param("continue", "page-2"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"metadata": {"name": "node-2"}}],
                "metadata": {"continue": ""}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .and(query_param("limit", "1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"metadata": {"name": "node-1"}}],
                "metadata": {"continue": "page-2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = LiveCollectorConfig {
            api_server: server.uri(),
            bearer_token: Some("secret".to_string()),
            page_size: 1,
            ..Default::default()
        };
        let collector = LiveCollector::from_config(&config).unwrap();

        let names: Vec<String> = collector
            .produce(ResourceType::Nodes, CancellationToken::new())
            .map_ok(|o| o.value["metadata"]["name"].as_str().unwrap().to_string())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(names, vec!["node-1", "node-2"]);
    }

    #[tokio::test]
    async fn test_kube_client_maps_status_codes() {
        let server = MockServer::start().await;

        let statuses: [(&str, u16); 2] = [
            ("/api/v1/pods", 403),
            ("/apis/rbac.authorization.k8s.io/v1/roles", 500),
        ];

        for (route, status) in statuses {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let client = KubeApiClient::new(&LiveCollectorConfig {
            api_server: server.uri(),
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            client.list_page(ResourceType::Pods, 10, None).await,
            Err(DumpError::Unauthorized(_))
        ));
        assert!(matches!(
            client.list_page(ResourceType::Roles, 10, None).await,
            Err(DumpError::Collection { .. })
        ));
    }

    #[tokio::test]
    async fn test_kube_client_unreachable_server_is_fatal() {
        let client = KubeApiClient::new(&LiveCollectorConfig {
            api_server: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = client.list_page(ResourceType::Nodes, 10, None).await.unwrap_err();
        assert!(matches!(err, DumpError::SourceUnreachable(_)));
        assert!(err.is_fatal());
    }
}
