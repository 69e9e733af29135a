//! Doubao Seedream (Volcengine Ark) image generation driver.

use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest, Usage};
use crate::error::{DriverError, Result};
use crate::http;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_URL: &str = "https://ark.cn-beijing.volces.com/api/v3/images/generations";
const DEFAULT_MODEL: &str = "doubao-seedream-4-5-251128";
const DEFAULT_SIZE: &str = "2K";

/// Builder for DoubaoProvider.
#[derive(Debug, Clone, Default)]
pub struct DoubaoProviderBuilder {
    api_key: Option<String>,
    url: Option<String>,
    timeout: Option<Duration>,
}

impl DoubaoProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `ARK_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the image generation endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets a request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<DoubaoProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("ARK_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "doubao",
                env_var: "ARK_API_KEY",
            })?;

        Ok(DoubaoProvider {
            proxied: http::client(true, self.timeout)?,
            direct: http::client(false, self.timeout)?,
            api_key,
            url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        })
    }
}

/// Doubao Seedream image generation driver.
pub struct DoubaoProvider {
    proxied: reqwest::Client,
    direct: reqwest::Client,
    api_key: String,
    url: String,
}

impl DoubaoProvider {
    /// Creates a new `DoubaoProviderBuilder`.
    pub fn builder() -> DoubaoProviderBuilder {
        DoubaoProviderBuilder::new()
    }

    fn client_for(&self, request: &GenerationRequest) -> &reqwest::Client {
        if request.options.is_explicitly_false("useProxy") {
            &self.direct
        } else {
            &self.proxied
        }
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let start = Instant::now();
        let client = self.client_for(request);
        let url = request
            .options
            .get_str("url")
            .unwrap_or_else(|| self.url.clone());

        let body = SeedreamRequest::from_request(request);
        tracing::debug!(url = %url, model = %body.model, with_image = body.image.is_some(), "sending Doubao request");

        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Doubao API failed", response).await);
        }

        let result: SeedreamResponse = response.json().await?;
        if let Some(err) = result.error {
            return Err(DriverError::Api {
                status: 0,
                message: format!("Doubao API error: {} - {}", err.code, err.message),
            });
        }

        let usage = result.usage.map(Usage::from).and_then(Usage::non_empty);
        let image = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::UnexpectedResponse("Doubao API returned no image URL".into()))?;

        let (data, mime_type) = match (image.b64_json, image.url) {
            (Some(b64), _) => {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(b64.trim())
                    .map_err(|e| DriverError::Decode(e.to_string()))?;
                let mime = http::resolve_mime(None, &data, "image/jpeg");
                (data, mime)
            }
            (None, Some(image_url)) => {
                let downloaded = http::download(client, &image_url, None).await?;
                let mime = downloaded.mime_type("image/jpeg");
                (downloaded.bytes, mime)
            }
            (None, None) => {
                return Err(DriverError::UnexpectedResponse(
                    "Doubao API returned no image URL".into(),
                ))
            }
        };

        GeneratedMedia::new(
            data,
            mime_type,
            usage,
            GenerationMetadata::new(DriverKind::Doubao)
                .with_model(body.model.clone())
                .with_parameters(serde_json::json!({
                    "size": body.size,
                    "watermark": body.watermark,
                }))
                .with_input_images(&request.images)
                .with_duration(start),
        )
    }
}

#[async_trait]
impl Driver for DoubaoProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Doubao
    }

    /// Lists one Ark generation task, which needs a valid key and a reachable API.
    async fn health_check(&self) -> Result<()> {
        let url = http::join_url(&ark_base(&self.url)?, "contents/generations/tasks");
        let response = self
            .proxied
            .get(url)
            .query(&[("page_num", "1"), ("page_size", "1")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Doubao health check failed", response).await);
        }
        Ok(())
    }
}

/// Ark API root for an image generation endpoint.
fn ark_base(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim_end_matches('/');
    if let Some(base) = trimmed.strip_suffix("/images/generations") {
        return Ok(base.to_string());
    }
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| DriverError::InvalidRequest(format!("invalid Doubao URL {}: {}", endpoint, e)))?;
    Ok(format!("{}/api/v3", url.origin().ascii_serialization()))
}

#[derive(Debug, Serialize)]
struct SeedreamRequest {
    model: String,
    prompt: String,
    size: String,
    watermark: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

impl SeedreamRequest {
    fn from_request(req: &GenerationRequest) -> Self {
        Self {
            model: req.model_or(DEFAULT_MODEL).to_string(),
            prompt: req.prompt.clone(),
            size: req
                .options
                .get_str("size")
                .unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            watermark: req.options.is_explicitly_true("watermark"),
            // Only the first image is used for image-to-image
            image: req.images.first().map(|img| img.to_data_url()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SeedreamResponse {
    #[serde(default)]
    data: Vec<SeedreamImage>,
    #[serde(default)]
    usage: Option<SeedreamUsage>,
    #[serde(default)]
    error: Option<ArkError>,
}

#[derive(Debug, Deserialize)]
struct SeedreamImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedreamUsage {
    #[serde(default)]
    generated_images: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl From<SeedreamUsage> for Usage {
    fn from(u: SeedreamUsage) -> Self {
        Usage {
            image_count: u.generated_images,
            output_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
            ..Usage::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArkError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InputImage;
    use crate::testing::{StubResponse, StubServer};
    use serde_json::json;

    const JPEG: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 9];

    #[test]
    fn test_request_defaults() {
        let body = serde_json::to_value(SeedreamRequest::from_request(&GenerationRequest::new(
            "a teapot",
        )))
        .unwrap();
        assert_eq!(
            body,
            json!({
                "model": "doubao-seedream-4-5-251128",
                "prompt": "a teapot",
                "size": "2K",
                "watermark": false
            })
        );
    }

    #[test]
    fn test_request_with_image_and_watermark() {
        let req = GenerationRequest::new("make it blue")
            .with_option("watermark", "true")
            .with_option("size", "1024x1024")
            .with_image(InputImage::new(vec![1, 2, 3], "image/png"))
            .with_image(InputImage::new(vec![9], "image/png"));
        let body = SeedreamRequest::from_request(&req);
        assert!(body.watermark);
        assert_eq!(body.size, "1024x1024");
        assert_eq!(body.image.as_deref(), Some("data:image/png;base64,AQID"));
    }

    #[tokio::test]
    async fn test_generate_downloads_first_url() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/api/v3/images/generations",
                vec![StubResponse::json(
                    200,
                    json!({
                        "model": "doubao-seedream-4-5-251128",
                        "data": [{ "url": server.url("/out/1.jpeg"), "size": "2048x2048" }],
                        "usage": { "generated_images": 1, "output_tokens": 16384, "total_tokens": 16384 }
                    }),
                )],
            )
            .route(
                "GET",
                "/out/1.jpeg",
                vec![StubResponse::bytes(200, "image/jpeg", JPEG.to_vec())],
            );

        let provider = DoubaoProvider::builder()
            .api_key("ark-key")
            .url(server.url("/api/v3/images/generations"))
            .build()
            .unwrap();

        let media = provider
            .generate(&GenerationRequest::new("a teapot").with_option("useProxy", false))
            .await
            .unwrap();

        assert_eq!(media.mime_type, "image/jpeg");
        assert_eq!(media.data, JPEG.to_vec());
        let usage = media.usage.unwrap();
        assert_eq!(usage.image_count, Some(1));
        assert_eq!(usage.total_tokens, Some(16384));

        let call = &server.requests_to("POST", "/api/v3/images/generations")[0];
        assert_eq!(call.header("authorization"), Some("Bearer ark-key"));
        assert_eq!(call.json()["prompt"], "a teapot");
    }

    #[tokio::test]
    async fn test_generate_accepts_inline_base64() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/gen",
            vec![StubResponse::json(200, json!({ "data": [{ "b64_json": "/9j/4AAAAAAAAAAJ" }] }))],
        );

        let provider = DoubaoProvider::builder()
            .api_key("k")
            .url(server.url("/gen"))
            .build()
            .unwrap();
        let media = provider.generate(&GenerationRequest::new("x")).await.unwrap();
        assert_eq!(media.mime_type, "image/jpeg");
        assert_eq!(media.data, JPEG.to_vec());
    }

    #[tokio::test]
    async fn test_no_image_url_is_error() {
        let server = StubServer::start().await;
        server.route("POST", "/gen", vec![StubResponse::json(200, json!({ "data": [] }))]);

        let provider = DoubaoProvider::builder()
            .api_key("k")
            .url(server.url("/gen"))
            .build()
            .unwrap();
        let err = provider.generate(&GenerationRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, DriverError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/gen",
            vec![StubResponse::json(
                400,
                json!({ "error": { "code": "InvalidParameter", "message": "size not supported" } }),
            )],
        );

        let provider = DoubaoProvider::builder()
            .api_key("k")
            .url(server.url("/gen"))
            .build()
            .unwrap();
        let err = provider.generate(&GenerationRequest::new("x")).await.unwrap_err();
        match err {
            DriverError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("size not supported"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_url_option_overrides_endpoint() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/custom",
                vec![StubResponse::json(200, json!({ "data": [{ "url": server.url("/o.jpg") }] }))],
            )
            .route("GET", "/o.jpg", vec![StubResponse::bytes(200, "image/jpeg", JPEG.to_vec())]);

        let provider = DoubaoProvider::builder()
            .api_key("k")
            .url("http://127.0.0.1:9/unused")
            .build()
            .unwrap();
        let req = GenerationRequest::new("x").with_option("url", server.url("/custom"));
        assert!(provider.generate(&req).await.is_ok());
    }

    #[test]
    fn test_ark_base() {
        assert_eq!(
            ark_base(DEFAULT_URL).unwrap(),
            "https://ark.cn-beijing.volces.com/api/v3"
        );
        assert_eq!(ark_base("http://proxy:9000/gen").unwrap(), "http://proxy:9000/api/v3");
        assert!(ark_base("no scheme").is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = StubServer::start().await;
        server.route(
            "GET",
            "/api/v3/contents/generations/tasks",
            vec![StubResponse::json(200, json!({ "items": [], "total": 0 }))],
        );
        let provider = DoubaoProvider::builder()
            .api_key("ark-key")
            .url(server.url("/api/v3/images/generations"))
            .build()
            .unwrap();

        provider.health_check().await.unwrap();
        let sent = &server.requests_to("GET", "/api/v3/contents/generations/tasks")[0];
        assert_eq!(sent.header("authorization"), Some("Bearer ark-key"));

        let unrouted = StubServer::start().await;
        let dead = DoubaoProvider::builder()
            .api_key("ark-key")
            .url(unrouted.url("/api/v3/images/generations"))
            .build()
            .unwrap();
        assert!(dead.health_check().await.is_err());
    }
}
