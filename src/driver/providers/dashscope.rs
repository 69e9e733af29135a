//! DashScope (Aliyun) Wanx text-to-image driver.
//!
//! Wanx is asynchronous: the image-synthesis call returns a task id, and the
//! task endpoint is polled until the task succeeds, fails or is canceled.

use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest, Usage};
use crate::error::{DriverError, Result};
use crate::http;
use crate::task::{poll_until_done, PollPolicy, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
const DEFAULT_MODEL: &str = "wanx-v1";
const DEFAULT_STYLE: &str = "<auto>";
const DEFAULT_SIZE: &str = "1024*1024";

/// Builder for DashScopeProvider.
#[derive(Debug, Clone)]
pub struct DashScopeProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for DashScopeProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl DashScopeProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `DASHSCOPE_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API base URL.
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
    pub fn build(self) -> Result<DashScopeProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("DASHSCOPE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "dashscope",
                env_var: "DASHSCOPE_API_KEY",
            })?;

        Ok(DashScopeProvider {
            client: reqwest::Client::new(),
            api_key,
            base_url: self.base_url,
            poll: PollPolicy::new(self.poll_interval, self.timeout).with_delay_first(true),
        })
    }
}

/// DashScope Wanx image generation driver.
pub struct DashScopeProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

impl DashScopeProvider {
    /// Creates a new `DashScopeProviderBuilder`.
    pub fn builder() -> DashScopeProviderBuilder {
        DashScopeProviderBuilder::new()
    }

    async fn submit(&self, body: &WanxRequest) -> Result<String> {
        let url = http::join_url(&self.base_url, "services/aigc/text2image/image-synthesis");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-Async", "enable")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Wanx submit failed", response).await);
        }

        let submit: WanxSubmitResponse = response.json().await?;
        if let Some(code) = submit.code.filter(|c| !c.is_empty()) {
            return Err(DriverError::Api {
                status: 0,
                message: format!(
                    "Wanx submit error: {} - {}",
                    code,
                    submit.message.unwrap_or_default()
                ),
            });
        }

        submit
            .output
            .and_then(|o| o.task_id)
            .ok_or_else(|| DriverError::UnexpectedResponse("Wanx returned no task_id".into()))
    }

    async fn check_task(&self, task_id: &str) -> Result<TaskState<(String, Option<Usage>)>> {
        let url = http::join_url(&self.base_url, &format!("tasks/{}", task_id));

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Wanx poll failed", response).await);
        }

        let task: WanxTaskResponse = response.json().await?;
        Ok(task.into_state())
    }
}

#[async_trait]
impl Driver for DashScopeProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let model = request.model_or(DEFAULT_MODEL);
        if !model.to_lowercase().contains("wanx") {
            return Err(DriverError::UnsupportedModel {
                driver: "dashscope",
                model: model.to_string(),
            });
        }

        let start = Instant::now();
        let body = WanxRequest::from_request(request, model);

        let task_id = self.submit(&body).await?;
        tracing::debug!(task_id = %task_id, model, "submitted Wanx task");

        let (image_url, usage) = poll_until_done(self.poll, "wanx", &task_id, || {
            self.check_task(&task_id)
        })
        .await?;
        tracing::debug!(url = %image_url, "Wanx task complete");

        let downloaded = http::download(&self.client, &image_url, None).await?;
        let mime_type = downloaded.mime_type("image/png");

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            usage,
            GenerationMetadata::new(DriverKind::DashScope)
                .with_model(model)
                .with_task_id(task_id)
                .with_parameters(serde_json::to_value(&body.parameters)?)
                .with_duration(start),
        )
    }

    fn kind(&self) -> DriverKind {
        DriverKind::DashScope
    }

    /// Lists one task, which needs a valid key and a reachable API.
    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(http::join_url(&self.base_url, "tasks"))
            .query(&[("page_no", "1"), ("page_size", "1")])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("DashScope health check failed", response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WanxRequest {
    model: String,
    input: WanxInput,
    parameters: WanxParameters,
}

#[derive(Debug, Serialize)]
struct WanxInput {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct WanxParameters {
    style: String,
    size: String,
    n: u32,
}

impl WanxRequest {
    fn from_request(req: &GenerationRequest, model: &str) -> Self {
        Self {
            model: model.to_string(),
            input: WanxInput {
                prompt: req.prompt.clone(),
            },
            parameters: WanxParameters {
                style: req
                    .options
                    .get_str("style")
                    .unwrap_or_else(|| DEFAULT_STYLE.to_string()),
                size: req
                    .options
                    .get_str("size")
                    .unwrap_or_else(|| DEFAULT_SIZE.to_string()),
                n: 1,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WanxSubmitResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    output: Option<WanxSubmitOutput>,
}

#[derive(Debug, Deserialize)]
struct WanxSubmitOutput {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WanxTaskResponse {
    output: WanxTaskOutput,
    #[serde(default)]
    usage: Option<WanxUsage>,
}

#[derive(Debug, Deserialize)]
struct WanxTaskOutput {
    task_status: String,
    #[serde(default)]
    results: Vec<WanxResult>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WanxResult {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WanxUsage {
    #[serde(default)]
    image_count: Option<u32>,
}

impl WanxTaskResponse {
    fn into_state(self) -> TaskState<(String, Option<Usage>)> {
        let output = self.output;
        match output.task_status.as_str() {
            "SUCCEEDED" => match output.results.into_iter().find_map(|r| r.url) {
                Some(url) => {
                    let usage = self.usage.and_then(|u| {
                        Usage {
                            image_count: u.image_count,
                            ..Usage::default()
                        }
                        .non_empty()
                    });
                    TaskState::Succeeded((url, usage))
                }
                None => TaskState::failed("SUCCEEDED", "task succeeded but returned no image URL"),
            },
            "FAILED" | "CANCELED" | "UNKNOWN" => {
                let message = match (output.code, output.message) {
                    (Some(code), Some(msg)) => format!("{} - {}", code, msg),
                    (None, Some(msg)) => msg,
                    (Some(code), None) => code,
                    (None, None) => String::new(),
                };
                TaskState::failed(output.task_status, message)
            }
            _ => TaskState::pending(output.task_status),
        }
    }
}
