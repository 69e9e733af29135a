//! LTX-2 self-hosted video generation driver.
//!
//! Text-to-video posts JSON to `/generate/text2video`; image-to-video uploads
//! the first input image to `/generate/image2video/upload`. Both answer once
//! the clip is rendered, with a relative URL to download it from.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest};
use crate::error::{DriverError, Result};
use crate::http;
use async_trait::async_trait;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_URL: &str = "http://localhost:6070";
const GENERATE_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Seed value asking for a random seed.
pub const RANDOM_SEED: i64 = -1;

/// Builder for Ltx2Provider.
#[derive(Debug, Clone, Default)]
pub struct Ltx2ProviderBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl Ltx2ProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service URL. Falls back to `LTX2_URL`, then `http://localhost:6070`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Overrides the generation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider.
    pub fn build(self) -> Result<Ltx2Provider> {
        let base_url = self
            .base_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| std::env::var("LTX2_URL").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        Ok(Ltx2Provider {
            client: http::client(false, Some(self.timeout.unwrap_or(GENERATE_TIMEOUT)))?,
            base_url,
        })
    }
}

/// LTX-2 text/image-to-video driver. No API key is needed.
pub struct Ltx2Provider {
    client: reqwest::Client,
    base_url: String,
}

impl Ltx2Provider {
    /// Creates a new `Ltx2ProviderBuilder`.
    pub fn builder() -> Ltx2ProviderBuilder {
        Ltx2ProviderBuilder::new()
    }

    async fn text_to_video(&self, base_url: &str, body: &Text2VideoRequest) -> Result<Ltx2Response> {
        let url = http::join_url(base_url, "generate/text2video");
        tracing::debug!(url = %url, seed = body.params.seed, "sending LTX-2 text2video request");

        let response = self.client.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(http::api_error("LTX-2 text2video failed", response).await);
        }
        Ok(response.json().await?)
    }

    async fn image_to_video(
        &self,
        base_url: &str,
        request: &GenerationRequest,
        params: &VideoParams,
    ) -> Result<Ltx2Response> {
        let url = http::join_url(base_url, "generate/image2video/upload");
        let image = request.images.first().ok_or_else(|| {
            DriverError::InvalidRequest("image2video requires an input image".into())
        })?;
        tracing::debug!(
            url = %url,
            size = image.data.len(),
            mime = %image.mime_type,
            seed = params.seed,
            "uploading image to LTX-2"
        );

        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name())
            .mime_str(&image.mime_type)
            .map_err(|e| DriverError::InvalidRequest(format!("invalid image MIME type: {}", e)))?;

        let form = params.fields().into_iter().fold(
            Form::new()
                .text("prompt", request.prompt.clone())
                .part("image", part),
            |form, (name, value)| form.text(name, value),
        );

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(http::api_error("LTX-2 image2video failed", response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Driver for Ltx2Provider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let start = Instant::now();
        let base_url = request
            .options
            .get_str("url")
            .unwrap_or_else(|| self.base_url.clone());
        let params = VideoParams::from_options(&request.options);

        let (task_type, result) = if request.has_images() {
            let result = self.image_to_video(&base_url, request, &params).await?;
            ("image_to_video", result)
        } else {
            let body = Text2VideoRequest {
                prompt: request.prompt.clone(),
                params: params.clone(),
            };
            ("text_to_video", self.text_to_video(&base_url, &body).await?)
        };

        let task_id = result.task_id.clone().unwrap_or_default();
        if !result.success {
            return Err(DriverError::TaskFailed {
                task_id,
                status: "failed".into(),
                message: result
                    .message
                    .unwrap_or_else(|| "video generation failed".into()),
            });
        }

        let video_url = result
            .video_url
            .filter(|u| !u.is_empty())
            .map(|u| resolve_video_url(&base_url, &u))
            .ok_or_else(|| DriverError::UnexpectedResponse("LTX-2 returned no video_url".into()))?;
        tracing::debug!(task_id = %task_id, url = %video_url, duration = ?result.duration, "downloading LTX-2 video");

        let downloaded = http::download(&self.client, &video_url, None).await?;

        let mut parameters = params.to_value();
        parameters["taskType"] = task_type.into();
        if let Some(path) = result.video_path {
            parameters["videoPath"] = path.into();
        }
        if let Some(secs) = result.duration {
            parameters["generationSecs"] = secs.into();
        }

        GeneratedMedia::new(
            downloaded.bytes,
            "video/mp4",
            None,
            GenerationMetadata::new(DriverKind::Ltx2)
                .with_task_id(task_id.clone())
                .with_service("LTX-2")
                .with_service_url(base_url)
                .with_parameters(parameters)
                .with_input_images(&request.images[..request.images.len().min(1)])
                .with_file_name(format!("{}.mp4", task_id))
                .with_duration(start),
        )
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Ltx2
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(http::join_url(&self.base_url, "health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("LTX-2 health check failed", response).await);
        }
        Ok(())
    }
}

fn resolve_video_url(base_url: &str, video_url: &str) -> String {
    if video_url.starts_with("http://") || video_url.starts_with("https://") {
        video_url.to_string()
    } else {
        http::join_url(base_url, video_url)
    }
}

/// Render settings shared by both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct VideoParams {
    height: u32,
    width: u32,
    num_frames: u32,
    frame_rate: f64,
    seed: i64,
    gpu_id: u32,
}

impl VideoParams {
    fn from_options(opts: &DriverOptions) -> Self {
        let seed = match opts.get_i64("seed").unwrap_or(42) {
            RANDOM_SEED => rand::thread_rng().gen_range(0..2_147_483_647),
            seed => seed,
        };
        Self {
            height: opts.first_u32(&["height"]).unwrap_or(512),
            width: opts.first_u32(&["width"]).unwrap_or(768),
            num_frames: opts.first_u32(&["numFrames", "num_frames"]).unwrap_or(25),
            frame_rate: opts.first_f64(&["frameRate", "frame_rate"]).unwrap_or(25.0),
            seed,
            gpu_id: opts.first_u32(&["gpuId", "gpu_id"]).unwrap_or(0),
        }
    }

    /// Multipart text fields for the upload endpoint.
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("height", self.height.to_string()),
            ("width", self.width.to_string()),
            ("num_frames", self.num_frames.to_string()),
            ("frame_rate", self.frame_rate.to_string()),
            ("seed", self.seed.to_string()),
            ("gpu_id", self.gpu_id.to_string()),
        ]
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "height": self.height,
            "width": self.width,
            "numFrames": self.num_frames,
            "frameRate": self.frame_rate,
            "seed": self.seed,
            "gpuId": self.gpu_id,
        })
    }
}

#[derive(Debug, Serialize)]
struct Text2VideoRequest {
    prompt: String,
    #[serde(flatten)]
    params: VideoParams,
}

#[derive(Debug, Deserialize)]
struct Ltx2Response {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    video_path: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InputImage;
    use crate::testing::{StubResponse, StubServer};
    use serde_json::json;

    fn mp4() -> Vec<u8> {
        let mut data = vec![0, 0, 0, 0x18];
        data.extend_from_slice(b"ftypisom\x00\x00\x02\x00");
        data
    }

    fn provider(server: &StubServer) -> Ltx2Provider {
        Ltx2Provider::builder()
            .base_url(server.base())
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_params_defaults_and_aliases() {
        let defaults = VideoParams::from_options(&DriverOptions::new());
        assert_eq!(
            defaults,
            VideoParams {
                height: 512,
                width: 768,
                num_frames: 25,
                frame_rate: 25.0,
                seed: 42,
                gpu_id: 0,
            }
        );

        let opts = DriverOptions::new()
            .with("num_frames", "121")
            .with("frameRate", "24")
            .with("gpu_id", 1)
            .with("seed", 0);
        let params = VideoParams::from_options(&opts);
        assert_eq!(params.num_frames, 121);
        assert_eq!(params.frame_rate, 24.0);
        assert_eq!(params.gpu_id, 1);
        assert_eq!(params.seed, 0);
    }

    #[test]
    fn test_random_seed() {
        let params = VideoParams::from_options(&DriverOptions::new().with("seed", RANDOM_SEED));
        assert!((0..2_147_483_647).contains(&params.seed));
    }

    #[test]
    fn test_text2video_body_is_flat() {
        let body = Text2VideoRequest {
            prompt: "waves".into(),
            params: VideoParams::from_options(&DriverOptions::new()),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "prompt": "waves",
                "height": 512,
                "width": 768,
                "num_frames": 25,
                "frame_rate": 25.0,
                "seed": 42,
                "gpu_id": 0
            })
        );
    }

    #[test]
    fn test_resolve_video_url() {
        assert_eq!(
            resolve_video_url("http://gpu:6070", "/videos/a.mp4"),
            "http://gpu:6070/videos/a.mp4"
        );
        assert_eq!(
            resolve_video_url("http://gpu:6070", "http://cdn/a.mp4"),
            "http://cdn/a.mp4"
        );
    }

    #[tokio::test]
    async fn test_text_to_video() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/generate/text2video",
                vec![StubResponse::json(
                    200,
                    json!({
                        "success": true,
                        "task_id": "abc123",
                        "video_url": "/videos/abc123.mp4",
                        "video_path": "/data/out/abc123.mp4",
                        "duration": 41.5
                    }),
                )],
            )
            .route(
                "GET",
                "/videos/abc123.mp4",
                vec![StubResponse::bytes(200, "application/octet-stream", mp4())],
            );

        let media = provider(&server)
            .generate(&GenerationRequest::new("ocean waves").with_option("width", 1280))
            .await
            .unwrap();

        assert_eq!(media.data, mp4());
        assert_eq!(media.mime_type, "video/mp4");
        assert_eq!(media.metadata.file_name.as_deref(), Some("abc123.mp4"));
        assert_eq!(media.metadata.task_id.as_deref(), Some("abc123"));
        assert_eq!(media.metadata.service.as_deref(), Some("LTX-2"));
        assert_eq!(media.metadata.parameters["taskType"], "text_to_video");
        assert_eq!(media.metadata.parameters["width"], 1280);

        let sent = server.requests_to("POST", "/generate/text2video")[0].json();
        assert_eq!(sent["prompt"], "ocean waves");
        assert_eq!(sent["width"], 1280);
    }

    #[tokio::test]
    async fn test_image_to_video_uploads_first_image() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/generate/image2video/upload",
                vec![StubResponse::json(
                    200,
                    json!({ "success": true, "task_id": "i2v", "video_url": "/videos/i2v.mp4" }),
                )],
            )
            .route(
                "GET",
                "/videos/i2v.mp4",
                vec![StubResponse::bytes(200, "video/mp4", mp4())],
            );

        let request = GenerationRequest::new("make it move")
            .with_image(InputImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg"))
            .with_option("seed", 7);
        let media = provider(&server).generate(&request).await.unwrap();
        assert_eq!(media.metadata.parameters["taskType"], "image_to_video");
        assert_eq!(media.metadata.input_images.len(), 1);

        let body = server.requests_to("POST", "/generate/image2video/upload")[0].body_text();
        assert!(body.contains("name=\"prompt\"\r\n\r\nmake it move"));
        assert!(body.contains("name=\"image\"; filename=\"image.jpg\""));
        assert!(body.contains("name=\"seed\"\r\n\r\n7"));
        assert!(body.contains("name=\"frame_rate\"\r\n\r\n25"));
    }

    #[tokio::test]
    async fn test_unsuccessful_generation() {
        let server = StubServer::start().await;
        server.route(
            "POST",
            "/generate/text2video",
            vec![StubResponse::json(
                200,
                json!({ "success": false, "task_id": "t-0", "message": "GPU busy" }),
            )],
        );

        let err = provider(&server)
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        match err {
            DriverError::TaskFailed { task_id, message, .. } => {
                assert_eq!(task_id, "t-0");
                assert_eq!(message, "GPU busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = StubServer::start().await;
        server.route("GET", "/health", vec![StubResponse::json(200, json!({ "status": "healthy" }))]);
        provider(&server).health_check().await.unwrap();
    }
}
