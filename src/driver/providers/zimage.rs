//! Self-hosted "z-image" text-to-image driver.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest};
use crate::error::{DriverError, Result};
use crate::http;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

const DEFAULT_URL: &str = "http://localhost:6006/generate";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for ZImageProvider.
#[derive(Debug, Clone, Default)]
pub struct ZImageProviderBuilder {
    url: Option<String>,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl ZImageProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the generate endpoint. Falls back to `Z_IMAGE_URL`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets an optional bearer token.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider.
    pub fn build(self) -> Result<ZImageProvider> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| std::env::var("Z_IMAGE_URL").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let timeout = Some(self.timeout.unwrap_or(DEFAULT_TIMEOUT));

        Ok(ZImageProvider {
            direct: http::client(false, timeout)?,
            proxied: http::client(true, timeout)?,
            url,
            api_key: self.api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

/// Z-Image text-to-image driver.
///
/// Proxy variables are ignored unless the request sets `useProxy: true`.
pub struct ZImageProvider {
    direct: reqwest::Client,
    proxied: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ZImageProvider {
    /// Creates a new `ZImageProviderBuilder`.
    pub fn builder() -> ZImageProviderBuilder {
        ZImageProviderBuilder::new()
    }

    /// Resolves the endpoint: `url` option, then `host`/`port` options, then the configured URL.
    fn endpoint(&self, options: &DriverOptions) -> String {
        if let Some(url) = options.get_str("url") {
            return url;
        }
        match options.get_str("port") {
            Some(port) => {
                let host = options
                    .get_str("host")
                    .unwrap_or_else(|| "localhost".to_string());
                format!("http://{}:{}/generate", host, port)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl Driver for ZImageProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let url = self.endpoint(&request.options);
        let payload = ZImageRequest::from_request(request);
        let client = if request.options.is_explicitly_true("useProxy") {
            &self.proxied
        } else {
            &self.direct
        };
        tracing::debug!(
            url = %url,
            height = payload.height,
            width = payload.width,
            steps = payload.num_inference_steps,
            seed = payload.seed,
            "sending z_image request"
        );

        let start = Instant::now();
        let mut builder = client.post(&url).json(&payload);
        if let Some(token) = &self.api_key {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            return Err(http::api_error("z_image API failed", response).await);
        }

        let downloaded = http::read_body(response).await?;
        let mime_type = downloaded.mime_type("image/png");

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            None,
            GenerationMetadata::new(DriverKind::ZImage)
                .with_service("z-image")
                .with_service_url(url)
                .with_parameters(serde_json::to_value(&payload)?)
                .with_duration(start),
        )
    }

    fn kind(&self) -> DriverKind {
        DriverKind::ZImage
    }

    /// Checks `/health` on the host serving the generate endpoint.
    async fn health_check(&self) -> Result<()> {
        let url = health_url(&self.url)?;
        let mut builder = self.direct.get(url).timeout(HEALTH_TIMEOUT);
        if let Some(token) = &self.api_key {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            return Err(http::api_error("z_image health check failed", response).await);
        }
        Ok(())
    }
}

fn health_url(generate_url: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(generate_url).map_err(|e| {
        DriverError::InvalidRequest(format!("invalid z_image URL {}: {}", generate_url, e))
    })?;
    url.join("/health").map_err(|e| {
        DriverError::InvalidRequest(format!("invalid z_image URL {}: {}", generate_url, e))
    })
}

#[derive(Debug, Serialize)]
struct ZImageRequest {
    prompt: String,
    height: u32,
    width: u32,
    num_inference_steps: u32,
    guidance_scale: f64,
    seed: i64,
}

impl ZImageRequest {
    fn from_request(req: &GenerationRequest) -> Self {
        let opts = &req.options;
        Self {
            prompt: req.prompt.clone(),
            height: opts.first_u32(&["height"]).unwrap_or(1024),
            width: opts.first_u32(&["width"]).unwrap_or(1024),
            num_inference_steps: opts
                .first_u32(&["num_inference_steps", "steps"])
                .unwrap_or(20),
            guidance_scale: opts.get_f64("guidance_scale").unwrap_or(7.5),
            seed: opts.get_i64("seed").unwrap_or(42),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubResponse, StubServer};
    use serde_json::json;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_payload_defaults() {
        let payload = ZImageRequest::from_request(&GenerationRequest::new("a fox"));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "prompt": "a fox",
                "height": 1024,
                "width": 1024,
                "num_inference_steps": 20,
                "guidance_scale": 7.5,
                "seed": 42
            })
        );
    }

    #[test]
    fn test_payload_from_string_options() {
        let req = GenerationRequest::new("a fox")
            .with_option("height", "768")
            .with_option("steps", "8")
            .with_option("guidance_scale", "0")
            .with_option("seed", "-1");
        let payload = ZImageRequest::from_request(&req);
        assert_eq!(payload.height, 768);
        assert_eq!(payload.width, 1024);
        assert_eq!(payload.num_inference_steps, 8);
        assert_eq!(payload.guidance_scale, 0.0);
        assert_eq!(payload.seed, -1);
    }

    #[test]
    fn test_endpoint_resolution() {
        let provider = ZImageProvider::builder()
            .url("http://gpu-box:6006/generate")
            .build()
            .unwrap();

        assert_eq!(provider.endpoint(&DriverOptions::new()), "http://gpu-box:6006/generate");
        assert_eq!(
            provider.endpoint(&DriverOptions::new().with("port", 7000)),
            "http://localhost:7000/generate"
        );
        assert_eq!(
            provider.endpoint(&DriverOptions::new().with("port", "7000").with("host", "10.0.0.2")),
            "http://10.0.0.2:7000/generate"
        );
        assert_eq!(
            provider.endpoint(
                &DriverOptions::new()
                    .with("port", 7000)
                    .with("url", "http://other/generate")
            ),
            "http://other/generate"
        );
    }

    #[tokio::test]
    async fn test_generate_returns_raw_image() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/generate",
            vec![StubResponse::bytes(200, "image/png", PNG.to_vec())],
        );

        let provider = ZImageProvider::builder()
            .url(server.url("/generate"))
            .api_key("local-token")
            .build()
            .unwrap();
        let media = provider
            .generate(&GenerationRequest::new("a fox").with_option("width", 512))
            .await
            .unwrap();

        assert_eq!(media.data, PNG);
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.metadata.parameters["width"], json!(512));

        let sent = &server.requests_to("POST", "/generate")[0];
        assert_eq!(sent.json()["width"], json!(512));
        assert_eq!(sent.header("authorization"), Some("Bearer local-token"));
    }

    #[tokio::test]
    async fn test_missing_content_type_falls_back_to_png() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/generate",
            vec![StubResponse::bytes(200, "", vec![1, 2, 3, 4])],
        );

        let provider = ZImageProvider::builder()
            .url(server.url("/generate"))
            .build()
            .unwrap();
        let media = provider.generate(&GenerationRequest::new("x")).await.unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert!(server.requests()[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/generate",
            vec![StubResponse::text(500, "model not loaded")],
        );

        let provider = ZImageProvider::builder()
            .url(server.url("/generate"))
            .build()
            .unwrap();
        let err = provider.generate(&GenerationRequest::new("x")).await.unwrap_err();
        match err {
            DriverError::Api { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("model not loaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_health_url_uses_service_origin() {
        assert_eq!(
            health_url("http://gpu-box:6006/generate").unwrap().as_str(),
            "http://gpu-box:6006/health"
        );
        assert_eq!(
            health_url("http://10.0.0.2:7000/api/generate?x=1").unwrap().as_str(),
            "http://10.0.0.2:7000/health"
        );
        assert!(health_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = StubServer::start().await;
        server.route(
            "GET",
            "/health",
            vec![StubResponse::json(200, json!({ "status": "healthy", "device": "cuda:0" }))],
        );

        let provider = ZImageProvider::builder()
            .url(server.url("/generate"))
            .build()
            .unwrap();
        provider.health_check().await.unwrap();
        assert_eq!(server.requests_to("GET", "/health").len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_dead_service() {
        let unrouted = StubServer::start().await;
        let provider = ZImageProvider::builder()
            .url(unrouted.url("/generate"))
            .build()
            .unwrap();
        assert!(provider.health_check().await.is_err());

        let closed = ZImageProvider::builder()
            .url("http://127.0.0.1:9/generate")
            .build()
            .unwrap();
        assert!(closed.health_check().await.is_err());
    }
}
