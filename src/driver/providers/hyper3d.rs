//! Hyper3D Rodin text/image-to-3D driver.
//!
//! A job is submitted as a multipart form on `rodin`, which answers with a
//! task uuid and a subscription key. The key is polled on `status` until
//! every sub-job is `Done`, then `download` lists the result files.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{
    extension_for_mime, model_mime_for_file, DriverKind, GeneratedMedia, GenerationMetadata,
    GenerationRequest,
};
use crate::error::{DriverError, Result};
use crate::http;
use crate::task::{poll_until_done, PollPolicy, TaskState};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

const BASE_URL: &str = "https://api.hyper3d.com/api/v2";
const MAX_POLL_ATTEMPTS: u32 = 180;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Builder for Hyper3dProvider.
#[derive(Debug, Clone)]
pub struct Hyper3dProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for Hyper3dProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl Hyper3dProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `HYPER3D_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the status polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum time to wait for the job.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<Hyper3dProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("HYPER3D_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "hyper3d",
                env_var: "HYPER3D_API_KEY",
            })?;

        Ok(Hyper3dProvider {
            client: http::client(false, Some(REQUEST_TIMEOUT))?,
            api_key,
            base_url: self.base_url,
            poll: PollPolicy::new(self.poll_interval, self.timeout)
                .with_max_attempts(MAX_POLL_ATTEMPTS),
        })
    }
}

/// Hyper3D Rodin 3D model generation driver.
pub struct Hyper3dProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

impl Hyper3dProvider {
    /// Creates a new `Hyper3dProviderBuilder`.
    pub fn builder() -> Hyper3dProviderBuilder {
        Hyper3dProviderBuilder::new()
    }

    fn url(&self, path: &str) -> String {
        http::join_url(&self.base_url, path)
    }

    async fn submit(&self, request: &GenerationRequest, params: &RodinParams) -> Result<Submitted> {
        let mut form = params
            .fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        let prompt = request.prompt.trim();
        if !prompt.is_empty() {
            form = form.text("prompt", prompt.to_string());
        }
        for (i, image) in request.images.iter().enumerate() {
            let name = format!("image_{}.{}", i, extension_for_mime(&image.mime_type));
            let part = Part::bytes(image.data.clone())
                .file_name(name)
                .mime_str(&image.mime_type)
                .map_err(|e| DriverError::InvalidRequest(format!("invalid image MIME type: {}", e)))?;
            form = form.part("images", part);
        }

        let response = self
            .client
            .post(self.url("rodin"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Hyper3D submit failed", response).await);
        }

        let submitted: SubmitResponse = response.json().await?;
        if let Some(error) = submitted.error.filter(|e| !e.is_empty()) {
            return Err(DriverError::Api {
                status: 0,
                message: format!("Hyper3D submit error: {}", error),
            });
        }
        let uuid = submitted
            .uuid
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DriverError::UnexpectedResponse("Hyper3D returned no task uuid".into()))?;
        let subscription_key = submitted
            .jobs
            .and_then(|jobs| jobs.subscription_key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DriverError::UnexpectedResponse("Hyper3D returned no subscription key".into())
            })?;

        Ok(Submitted {
            uuid,
            subscription_key,
        })
    }

    async fn check_status(&self, subscription_key: &str) -> Result<TaskState<Vec<RodinJob>>> {
        let response = self
            .client
            .post(self.url("status"))
            .bearer_auth(&self.api_key)
            .json(&json!({ "subscription_key": subscription_key }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Hyper3D status check failed", response).await);
        }

        let status: StatusResponse = response.json().await?;
        Ok(jobs_state(status.jobs))
    }

    async fn list_files(&self, uuid: &str) -> Result<Vec<DownloadItem>> {
        let response = self
            .client
            .post(self.url("download"))
            .bearer_auth(&self.api_key)
            .json(&json!({ "task_uuid": uuid }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Hyper3D download failed", response).await);
        }

        let listing: DownloadResponse = response.json().await?;
        Ok(listing.list)
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        if !request.has_images() && request.prompt.trim().is_empty() {
            return Err(DriverError::InvalidRequest(
                "Hyper3D generation requires an input image or prompt".into(),
            ));
        }

        let start = Instant::now();
        let params = RodinParams::from_options(&request.options);

        let submitted = self.submit(request, &params).await?;
        tracing::debug!(uuid = %submitted.uuid, tier = %params.tier, images = request.images.len(), "submitted Hyper3D job");

        poll_until_done(self.poll, "hyper3d", &submitted.uuid, || {
            self.check_status(&submitted.subscription_key)
        })
        .await?;

        let files = self.list_files(&submitted.uuid).await?;
        let file = pick_model_file(&files).ok_or_else(|| {
            DriverError::UnexpectedResponse("Hyper3D returned no files to download".into())
        })?;
        tracing::debug!(file = %file.name, "downloading Hyper3D model");

        let downloaded = http::download(&self.client, &file.url, None).await?;
        let mime_type = match model_mime_for_file(&file.name) {
            Some(mime) => mime.to_string(),
            None => downloaded.mime_type("model/gltf-binary"),
        };

        let task_type = if request.has_images() {
            "image_to_model"
        } else {
            "text_to_model"
        };
        let mut parameters = serde_json::to_value(&params)?;
        if let Some(map) = parameters.as_object_mut() {
            map.insert("taskType".into(), task_type.into());
            map.insert("downloadedFile".into(), file.name.clone().into());
            map.insert(
                "allFiles".into(),
                files.iter().map(|f| f.name.clone()).collect::<Vec<_>>().into(),
            );
        }

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            None,
            GenerationMetadata::new(DriverKind::Hyper3d)
                .with_model(params.tier.clone())
                .with_task_id(submitted.uuid)
                .with_parameters(parameters)
                .with_input_images(&request.images)
                .with_file_name(file.name.clone())
                .with_duration(start),
        )
    }
}

#[async_trait]
impl Driver for Hyper3dProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Hyper3d
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("check_balance"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Hyper3D health check failed", response).await);
        }
        Ok(())
    }
}

struct Submitted {
    uuid: String,
    subscription_key: String,
}

/// Rodin generation settings sent as form fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RodinParams {
    tier: String,
    mesh_mode: String,
    quality_override: i64,
    material: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geometry_condition: Option<String>,
}

impl RodinParams {
    fn from_options(opts: &DriverOptions) -> Self {
        Self {
            tier: opts.get_str("tier").unwrap_or_else(|| "Gen-2".into()),
            mesh_mode: opts.get_str("meshMode").unwrap_or_else(|| "Raw".into()),
            quality_override: opts
                .get_i64("qualityOverride")
                .filter(|v| *v > 0)
                .unwrap_or(500_000),
            material: opts.get_str("material").unwrap_or_else(|| "PBR".into()),
            condition_mode: opts.get_str("conditionMode"),
            geometry_condition: opts.get_str("geometryCondition"),
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("tier", self.tier.clone()),
            ("mesh_mode", self.mesh_mode.clone()),
            ("quality_override", self.quality_override.to_string()),
            ("material", self.material.clone()),
        ];
        if let Some(mode) = &self.condition_mode {
            fields.push(("condition_mode", mode.clone()));
        }
        if let Some(condition) = &self.geometry_condition {
            fields.push(("geometry_condition", condition.clone()));
        }
        fields
    }
}

/// The job is done once every sub-job is `Done` or `Failed`.
fn jobs_state(jobs: Vec<RodinJob>) -> TaskState<Vec<RodinJob>> {
    if jobs.is_empty() {
        return TaskState::pending("Waiting");
    }

    let finished = jobs
        .iter()
        .filter(|j| j.status == "Done" || j.status == "Failed")
        .count();
    if finished < jobs.len() {
        let status = jobs
            .iter()
            .find(|j| j.status != "Done")
            .map(|j| j.status.clone())
            .unwrap_or_default();
        return TaskState::Pending {
            status,
            progress: u32::try_from(finished * 100 / jobs.len()).ok(),
        };
    }

    match jobs.iter().find(|j| j.status == "Failed") {
        Some(job) => {
            let reason = job
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Unknown error".to_string());
            TaskState::failed("Failed", format!("Hyper3D job {} failed: {}", job.uuid, reason))
        }
        None => TaskState::Succeeded(jobs),
    }
}

/// GLB first, then FBX, OBJ or USDZ, else whatever came first.
fn pick_model_file(files: &[DownloadItem]) -> Option<&DownloadItem> {
    let has_ext = |item: &&DownloadItem, exts: &[&str]| {
        let name = item.name.to_ascii_lowercase();
        exts.iter().any(|ext| name.ends_with(ext))
    };
    files
        .iter()
        .find(|f| has_ext(f, &[".glb"]))
        .or_else(|| files.iter().find(|f| has_ext(f, &[".fbx", ".obj", ".usdz"])))
        .or_else(|| files.first())
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    jobs: Option<SubmitJobs>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitJobs {
    #[serde(default)]
    subscription_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    jobs: Vec<RodinJob>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
struct RodinJob {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    list: Vec<DownloadItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct DownloadItem {
    #[serde(default)]
    name: String,
    url: String,
}
