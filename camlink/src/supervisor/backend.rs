//! Backend control-plane client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::registration::{RegisterRequest, RegisterResponse};
use crate::config::BackendConfig;
use crate::{Error, Result};

/// Body the backend answers health polls with when the link is good.
pub const HEALTHY_BODY: &str = "ok";

/// Control-plane operations the supervisor needs from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register this device.
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse>;

    /// Poll link health. Fails unless the backend answers `ok`.
    async fn health(&self) -> Result<()>;
}

/// [`Backend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    health_path: String,
    health_timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("camlink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create with a caller-supplied client.
    pub fn with_client(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            base_url: config.base_url(),
            health_path: config.health_path.clone(),
            health_timeout: config.health_timeout,
        }
    }

    pub fn register_url(&self) -> String {
        format!("{}/register", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let url = self.register_url();
        debug!(url = %url, serial = %request.serial, "Registering device");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<RegisterResponse>().await?)
    }

    async fn health(&self) -> Result<()> {
        let mut request = self.client.get(self.health_url());
        if let Some(timeout) = self.health_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::HealthCheck(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HealthCheck(format!("status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::HealthCheck(format!("failed to read body: {}", e)))?;
        if body != HEALTHY_BODY {
            return Err(Error::HealthCheck(format!("unexpected body '{}'", body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        http::StatusCode,
        routing::{get, post},
    };
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn backend_for(addr: SocketAddr, health_path: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            health_path: health_path.to_string(),
            health_timeout: Some(Duration::from_secs(2)),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_requires_exact_ok() {
        let addr = serve(
            Router::new()
                .route("/health", get(|| async { "ok" }))
                .route("/padded", get(|| async { "ok\n" }))
                .route("/down", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "ok") })),
        )
        .await;

        assert!(backend_for(addr, "/health").health().await.is_ok());
        assert!(matches!(
            backend_for(addr, "/padded").health().await,
            Err(Error::HealthCheck(_))
        ));
        assert!(matches!(
            backend_for(addr, "/down").health().await,
            Err(Error::HealthCheck(_))
        ));
        assert!(matches!(
            backend_for(addr, "/missing").health().await,
            Err(Error::HealthCheck(_))
        ));
    }

    #[tokio::test]
    async fn test_register_posts_json() {
        let addr = serve(Router::new().route(
            "/register",
            post(|Json(request): Json<RegisterRequest>| async move {
                Json(RegisterResponse {
                    assigned_id: format!("{}-{}", request.platform, request.serial),
                    port_base: 6100,
                    channel_count: request.channel_count,
                })
            }),
        ))
        .await;

        let response = backend_for(addr, "/health")
            .register(&RegisterRequest {
                serial: "abc".into(),
                ip: "127.0.0.1".into(),
                platform: "other".into(),
                owner: "echo".into(),
                channel_count: 3,
            })
            .await
            .unwrap();

        assert_eq!(response.assigned_id, "other-abc");
        assert_eq!(response.port_base, 6100);
        assert_eq!(response.channel_count, 3);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_health() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            backend_for(addr, "/health").health().await,
            Err(Error::HealthCheck(_))
        ));
    }
}
