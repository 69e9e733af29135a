//! Doubao Seed3D (Volcengine Ark) image-to-3D driver.
//!
//! Ark content generation is task based: a task is created with the source
//! image and generation flags, then polled until the model file is ready.

use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest, Usage};
use crate::error::{DriverError, Result};
use crate::http;
use crate::task::{poll_until_done, PollPolicy, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
const DEFAULT_MODEL: &str = "doubao-seed3d-1-0-250928";
const DEFAULT_SUBDIVISION: &str = "medium";
const DEFAULT_FILE_FORMAT: &str = "glb";

/// Builder for Seed3dProvider.
#[derive(Debug, Clone)]
pub struct Seed3dProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for Seed3dProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

impl Seed3dProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `ARK_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the Ark API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the task polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum time to wait for the task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<Seed3dProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("ARK_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "doubao-seed3d",
                env_var: "ARK_API_KEY",
            })?;

        Ok(Seed3dProvider {
            client: reqwest::Client::new(),
            api_key,
            base_url: self.base_url,
            poll: PollPolicy::new(self.poll_interval, self.timeout).with_delay_first(true),
        })
    }
}

/// Doubao Seed3D image-to-3D driver.
pub struct Seed3dProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

impl Seed3dProvider {
    /// Creates a new `Seed3dProviderBuilder`.
    pub fn builder() -> Seed3dProviderBuilder {
        Seed3dProviderBuilder::new()
    }

    fn tasks_url(&self) -> String {
        http::join_url(&self.base_url, "contents/generations/tasks")
    }

    async fn submit(&self, body: &Seed3dTaskRequest) -> Result<String> {
        let response = self
            .client
            .post(self.tasks_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Seed3D submit failed", response).await);
        }

        let created: Seed3dCreated = response.json().await?;
        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DriverError::UnexpectedResponse("Seed3D returned no task id".into()))
    }

    async fn check_task(&self, task_id: &str) -> Result<TaskState<(String, Option<Usage>)>> {
        let url = format!("{}/{}", self.tasks_url(), task_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Seed3D poll failed", response).await);
        }

        let task: Seed3dTask = response.json().await?;
        Ok(task.into_state())
    }
}

#[async_trait]
impl Driver for Seed3dProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let image = request.images.first().ok_or_else(|| {
            DriverError::InvalidRequest("Seed3D requires an input image".into())
        })?;

        let start = Instant::now();
        let params = Seed3dParams::from_request(request);
        let body = Seed3dTaskRequest {
            model: request.model_or(DEFAULT_MODEL).to_string(),
            content: vec![
                ContentItem::ImageUrl {
                    image_url: ImageUrl {
                        url: image.to_data_url(),
                    },
                },
                ContentItem::Text {
                    text: params.command_text(),
                },
            ],
        };

        let task_id = self.submit(&body).await?;
        tracing::debug!(task_id = %task_id, model = %body.model, "submitted Seed3D task");

        let (file_url, usage) = poll_until_done(self.poll, "seed3d", &task_id, || {
            self.check_task(&task_id)
        })
        .await?;
        tracing::debug!(url = %file_url, "Seed3D task complete");

        let downloaded = http::download(&self.client, &file_url, None).await?;
        let mime_type = downloaded.mime_type(params.fallback_mime());

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            usage,
            GenerationMetadata::new(DriverKind::Seed3d)
                .with_model(body.model.clone())
                .with_task_id(task_id)
                .with_parameters(serde_json::json!({
                    "subdivisionLevel": params.subdivision_level,
                    "fileFormat": params.file_format,
                }))
                .with_input_images(&request.images[..1])
                .with_file_name(format!("model.{}", params.file_format))
                .with_duration(start),
        )
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Seed3d
    }

    /// Lists one generation task, which needs a valid key and a reachable API.
    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.tasks_url())
            .query(&[("page_num", "1"), ("page_size", "1")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Seed3D health check failed", response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Seed3dParams {
    subdivision_level: String,
    file_format: String,
}

impl Seed3dParams {
    fn from_request(req: &GenerationRequest) -> Self {
        Self {
            subdivision_level: req
                .options
                .get_str("subdivisionLevel")
                .unwrap_or_else(|| DEFAULT_SUBDIVISION.to_string())
                .to_lowercase(),
            file_format: req
                .options
                .get_str("fileFormat")
                .unwrap_or_else(|| DEFAULT_FILE_FORMAT.to_string())
                .to_lowercase(),
        }
    }

    /// Generation flags travel as a text content item.
    fn command_text(&self) -> String {
        format!(
            "--subdivisionlevel {} --fileformat {}",
            self.subdivision_level, self.file_format
        )
    }

    fn fallback_mime(&self) -> &'static str {
        match self.file_format.as_str() {
            "obj" => "model/obj",
            "usd" | "usdz" => "model/vnd.usdz+zip",
            _ => "model/gltf-binary",
        }
    }
}

#[derive(Debug, Serialize)]
struct Seed3dTaskRequest {
    model: String,
    content: Vec<ContentItem>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Seed3dCreated {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Seed3dTask {
    status: String,
    #[serde(default)]
    content: Option<Seed3dContent>,
    #[serde(default)]
    usage: Option<Seed3dUsage>,
    #[serde(default)]
    error: Option<Seed3dError>,
}

#[derive(Debug, Deserialize)]
struct Seed3dContent {
    #[serde(default)]
    file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Seed3dUsage {
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Seed3dError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Seed3dTask {
    fn into_state(self) -> TaskState<(String, Option<Usage>)> {
        match self.status.as_str() {
            "succeeded" => match self.content.and_then(|c| c.file_url) {
                Some(url) => {
                    let usage = self.usage.and_then(|u| {
                        Usage {
                            output_tokens: u.completion_tokens,
                            total_tokens: u.total_tokens,
                            ..Usage::default()
                        }
                        .non_empty()
                    });
                    TaskState::Succeeded((url, usage))
                }
                None => TaskState::failed("succeeded", "task succeeded but returned no file_url"),
            },
            "failed" | "cancelled" | "expired" => {
                let message = self
                    .error
                    .map(|e| match (e.code, e.message) {
                        (Some(code), Some(msg)) => format!("{} - {}", code, msg),
                        (code, msg) => msg.or(code).unwrap_or_default(),
                    })
                    .unwrap_or_default();
                TaskState::failed(self.status, message)
            }
            _ => TaskState::pending(self.status),
        }
    }
}
