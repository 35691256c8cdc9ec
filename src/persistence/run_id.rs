//! Source of the server's current run id

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

use crate::error::EngineError;
use crate::Result;

#[async_trait::async_trait]
pub trait RunIdSource: Send + Sync {
    /// Current server incarnation. Failures are errors, never a guessed id.
    async fn current_run_id(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunIdPayload {
    run_id: String,
}

/// `GET {url}` returning `{"runId": "..."}`.
pub struct HttpRunIdSource {
    client: Client,
    url: String,
}

impl HttpRunIdSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RunIdSource for HttpRunIdSource {
    async fn current_run_id(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            error!(url = %self.url, "Run id request failed: {}", e);
            EngineError::RunIdUnavailable(format!("request to {} failed: {}", self.url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::RunIdUnavailable(format!(
                "{} answered {}",
                self.url, status
            )));
        }

        let payload: RunIdPayload = response.json().await.map_err(|e| {
            EngineError::RunIdUnavailable(format!("malformed run id payload: {}", e))
        })?;

        let run_id = payload.run_id.trim().to_string();
        if run_id.is_empty() {
            return Err(EngineError::RunIdUnavailable("empty run id".to_string()));
        }

        info!(run_id = %run_id, "Fetched server run id");
        Ok(run_id)
    }
}

/// Fixed run id, for tests and offline use.
pub struct StaticRunIdSource(pub String);

#[async_trait::async_trait]
impl RunIdSource for StaticRunIdSource {
    async fn current_run_id(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetches_run_id() {
        let base = serve(Router::new().route(
            "/api/run-id",
            get(|| async { Json(json!({ "runId": "run1" })) }),
        ))
        .await;

        let source = HttpRunIdSource::new(format!("{}/api/run-id", base), Duration::from_secs(2)).unwrap();
        assert_eq!(source.url(), format!("{}/api/run-id", base));
        assert_eq!(source.current_run_id().await.unwrap(), "run1");
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let base = serve(Router::new().route(
            "/api/run-id",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;

        let source = HttpRunIdSource::new(format!("{}/api/run-id", base), Duration::from_secs(2)).unwrap();
        let err = source.current_run_id().await.unwrap_err();
        assert!(matches!(err, EngineError::RunIdUnavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_unavailable() {
        let base = serve(Router::new().route(
            "/api/run-id",
            get(|| async { Json(json!({ "id": "run1" })) }),
        ))
        .await;

        let source = HttpRunIdSource::new(format!("{}/api/run-id", base), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            source.current_run_id().await,
            Err(EngineError::RunIdUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpRunIdSource::new(format!("http://{}/api/run-id", addr), Duration::from_millis(500)).unwrap();
        assert!(matches!(
            source.current_run_id().await,
            Err(EngineError::RunIdUnavailable(_))
        ));
    }
}
