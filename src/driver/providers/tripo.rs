//! Tripo3D text/image-to-3D driver.
//!
//! Input images are uploaded first to obtain file tokens, then a task is
//! created and polled. Every response uses the `{ code, message, data }`
//! envelope, where a non-zero `code` is an error even on HTTP 200.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{
    DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest, InputImage, Usage,
};
use crate::error::{DriverError, Result};
use crate::http;
use crate::task::{poll_until_done, PollPolicy, TaskState};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const BASE_URL: &str = "https://api.tripo3d.ai/v2/openapi";
const MAX_POLL_ATTEMPTS: u32 = 120;

/// Builder for TripoProvider.
#[derive(Debug, Clone)]
pub struct TripoProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for TripoProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(25 * 60),
        }
    }
}

impl TripoProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `TRIPO_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the OpenAPI base URL.
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
    pub fn build(self) -> Result<TripoProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("TRIPO_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "tripo",
                env_var: "TRIPO_API_KEY",
            })?;

        Ok(TripoProvider {
            proxied: http::client(true, None)?,
            direct: http::client(false, None)?,
            api_key,
            base_url: self.base_url,
            poll: PollPolicy::new(self.poll_interval, self.timeout)
                .with_max_attempts(MAX_POLL_ATTEMPTS),
        })
    }
}

/// Tripo3D 3D model generation driver.
pub struct TripoProvider {
    proxied: reqwest::Client,
    direct: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

impl TripoProvider {
    /// Creates a new `TripoProviderBuilder`.
    pub fn builder() -> TripoProviderBuilder {
        TripoProviderBuilder::new()
    }

    fn client_for(&self, options: &DriverOptions) -> &reqwest::Client {
        if options.is_explicitly_false("useProxy") {
            &self.direct
        } else {
            &self.proxied
        }
    }

    async fn upload(&self, client: &reqwest::Client, image: &InputImage) -> Result<String> {
        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name())
            .mime_str(&image.mime_type)
            .map_err(|e| DriverError::InvalidRequest(format!("invalid image MIME type: {}", e)))?;

        let response = client
            .post(http::join_url(&self.base_url, "upload"))
            .bearer_auth(&self.api_key)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        let data: UploadData = read_envelope("Tripo upload", response).await?;
        data.image_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DriverError::UnexpectedResponse("Tripo upload returned no image token".into()))
    }

    async fn create_task(&self, client: &reqwest::Client, body: &TripoTaskRequest) -> Result<String> {
        let response = client
            .post(http::join_url(&self.base_url, "task"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let data: CreatedTask = read_envelope("Tripo API", response).await?;
        data.task_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DriverError::UnexpectedResponse("Tripo API returned no task ID".into()))
    }

    async fn check_task(
        &self,
        client: &reqwest::Client,
        task_id: &str,
    ) -> Result<TaskState<TaskData>> {
        let response = client
            .get(http::join_url(&self.base_url, &format!("task/{}", task_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let data: TaskData = read_envelope("Tripo API poll", response).await?;
        Ok(data.into_state())
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let prompt = request.prompt.trim();
        if !request.has_images() && prompt.is_empty() {
            return Err(DriverError::InvalidRequest(
                "Tripo 3D generation requires an input image or prompt".into(),
            ));
        }

        let start = Instant::now();
        let client = self.client_for(&request.options);

        let mut tokens = Vec::with_capacity(request.images.len());
        for image in &request.images {
            tokens.push(self.upload(client, image).await?);
        }
        tracing::debug!(uploaded = tokens.len(), "Tripo images uploaded");

        let body = TripoTaskRequest::new(prompt, tokens, &request.options);
        let task_id = self.create_task(client, &body).await?;
        tracing::debug!(task_id = %task_id, task_type = body.task_type, "created Tripo task");

        let task = poll_until_done(self.poll, "tripo", &task_id, || {
            self.check_task(client, &task_id)
        })
        .await?;

        let usage = task.running_left_credits.and_then(|credits| {
            Usage {
                credits_used: Some(credits),
                ..Usage::default()
            }
            .non_empty()
        });
        let model_url = task.output.and_then(TaskOutput::model_url).ok_or_else(|| {
            DriverError::UnexpectedResponse("Tripo API returned no model URL".into())
        })?;
        tracing::debug!(url = %model_url, "downloading Tripo model");

        let downloaded = http::download(client, &model_url, None).await?;
        let mime_type = downloaded.mime_type("model/gltf-binary");

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            usage,
            GenerationMetadata::new(DriverKind::Tripo)
                .with_model(body.model_version.clone().unwrap_or_else(|| "default".into()))
                .with_task_id(task_id)
                .with_parameters(serde_json::to_value(&body)?)
                .with_input_images(&request.images)
                .with_file_name("model.glb")
                .with_duration(start),
        )
    }
}

#[async_trait]
impl Driver for TripoProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Tripo
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .proxied
            .get(http::join_url(&self.base_url, "user/balance"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let _: serde_json::Value = read_envelope("Tripo health check", response).await?;
        Ok(())
    }
}

/// Unwraps a `{ code, message, data }` envelope.
async fn read_envelope<T: DeserializeOwned>(label: &str, response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(http::api_error(&format!("{} failed", label), response).await);
    }

    let envelope: Envelope<T> = response.json().await?;
    if envelope.code != 0 {
        return Err(DriverError::Api {
            status: 0,
            message: format!(
                "{} error: {} - {}",
                label,
                envelope.code,
                envelope.message.unwrap_or_default()
            ),
        });
    }
    envelope
        .data
        .ok_or_else(|| DriverError::UnexpectedResponse(format!("{} returned no data", label)))
}

#[derive(Debug, Serialize)]
struct TripoTaskRequest {
    #[serde(rename = "type")]
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FileRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    face_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    texture: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pbr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orientation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct FileRef {
    #[serde(rename = "type")]
    kind: &'static str,
    file_token: String,
}

impl FileRef {
    fn image(token: String) -> Self {
        Self {
            kind: "image",
            file_token: token,
        }
    }
}

impl TripoTaskRequest {
    /// Picks the task type from the number of uploaded images.
    fn new(prompt: &str, tokens: Vec<String>, opts: &DriverOptions) -> Self {
        let mut req = Self {
            task_type: "text_to_model",
            prompt: None,
            file: None,
            files: None,
            model_version: opts.get_str("modelVersion").filter(|v| v != "default"),
            face_limit: opts.get_i64("faceLimit").filter(|v| *v != 0),
            texture: opts
                .contains("texture")
                .then(|| !opts.is_explicitly_false("texture")),
            pbr: opts.contains("pbr").then(|| opts.is_explicitly_true("pbr")),
            orientation: opts.get_str("orientation"),
            style: None,
            negative_prompt: None,
        };

        match tokens.len() {
            0 => {
                req.prompt = Some(prompt.to_string());
                req.style = opts.get_str("style");
                req.negative_prompt = opts.get_str("negativePrompt");
            }
            1 => {
                req.task_type = "image_to_model";
                req.file = tokens.into_iter().next().map(FileRef::image);
            }
            _ => {
                req.task_type = "multiview_to_model";
                req.files = Some(tokens.into_iter().map(FileRef::image).collect());
            }
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    image_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct TaskData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: Option<u32>,
    #[serde(default)]
    output: Option<TaskOutput>,
    #[serde(default)]
    running_left_credits: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct TaskOutput {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    pbr_model: Option<String>,
}

impl TaskOutput {
    fn model_url(self) -> Option<String> {
        self.pbr_model
            .filter(|u| !u.is_empty())
            .or(self.model.filter(|u| !u.is_empty()))
    }
}

impl TaskData {
    fn into_state(self) -> TaskState<TaskData> {
        match self.status.as_str() {
            "success" => TaskState::Succeeded(self),
            "failed" | "cancelled" | "banned" | "expired" => {
                let message = self
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("3D generation {}", self.status));
                TaskState::failed(self.status, message)
            }
            _ => TaskState::Pending {
                status: self.status,
                progress: self.progress,
            },
        }
    }
}
