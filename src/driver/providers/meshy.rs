//! Meshy 3D generation driver.
//!
//! One input image creates an image-to-3D task and several images a
//! multi-image task. A bare prompt creates a text-to-3D preview; with
//! `mode: "full"` the preview is awaited and then refined into a textured
//! model, and `mode: "refine"` with `previewTaskId` refines an earlier
//! preview directly.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{
    model_mime_for_file, DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest,
    InputImage, Usage,
};
use crate::error::{DriverError, Result};
use crate::http;
use crate::task::{poll_until_done, PollPolicy, TaskState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

const BASE_URL: &str = "https://api.meshy.ai";
const MAX_POLL_ATTEMPTS: u32 = 180;

/// Builder for MeshyProvider.
#[derive(Debug, Clone)]
pub struct MeshyProviderBuilder {
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for MeshyProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl MeshyProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `MESHY_API_KEY` env var.
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

    /// Sets the maximum time to wait for each task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<MeshyProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("MESHY_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(DriverError::MissingApiKey {
                driver: "meshy",
                env_var: "MESHY_API_KEY",
            })?;

        Ok(MeshyProvider {
            proxied: http::client(true, None)?,
            direct: http::client(false, None)?,
            api_key,
            base_url: self.base_url,
            poll: PollPolicy::new(self.poll_interval, self.timeout)
                .with_max_attempts(MAX_POLL_ATTEMPTS),
        })
    }
}

/// Meshy 3D model generation driver.
pub struct MeshyProvider {
    proxied: reqwest::Client,
    direct: reqwest::Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
}

/// Meshy task families; each has its own create and status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    TextTo3d,
    ImageTo3d,
    MultiImageTo3d,
}

impl TaskKind {
    fn path(self) -> &'static str {
        match self {
            Self::TextTo3d => "openapi/v2/text-to-3d",
            Self::ImageTo3d => "openapi/v1/image-to-3d",
            Self::MultiImageTo3d => "openapi/v1/multi-image-to-3d",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::TextTo3d => "text-to-3d",
            Self::ImageTo3d => "image-to-3d",
            Self::MultiImageTo3d => "multi-image-to-3d",
        }
    }
}

/// A created task, ready to be awaited.
struct Submitted {
    kind: TaskKind,
    task_id: String,
    body: MeshyTaskRequest,
    preview_task_id: Option<String>,
}

impl MeshyProvider {
    /// Creates a new `MeshyProviderBuilder`.
    pub fn builder() -> MeshyProviderBuilder {
        MeshyProviderBuilder::new()
    }

    fn client_for(&self, options: &DriverOptions) -> &reqwest::Client {
        if options.is_explicitly_false("useProxy") {
            &self.direct
        } else {
            &self.proxied
        }
    }

    async fn create_task(
        &self,
        client: &reqwest::Client,
        kind: TaskKind,
        body: &MeshyTaskRequest,
    ) -> Result<String> {
        let response = client
            .post(http::join_url(&self.base_url, kind.path()))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Meshy API failed", response).await);
        }

        let created: CreatedTask = response.json().await?;
        let task_id = created
            .result
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DriverError::UnexpectedResponse("Meshy API returned no task ID".into()))?;
        tracing::debug!(task_id = %task_id, task_type = kind.as_str(), mode = ?body.mode, "created Meshy task");
        Ok(task_id)
    }

    async fn check_task(
        &self,
        client: &reqwest::Client,
        kind: TaskKind,
        task_id: &str,
    ) -> Result<TaskState<MeshyTask>> {
        let url = http::join_url(&self.base_url, &format!("{}/{}", kind.path(), task_id));
        let response = client.get(url).bearer_auth(&self.api_key).send().await?;

        if !response.status().is_success() {
            return Err(http::api_error("Meshy API poll failed", response).await);
        }

        let task: MeshyTask = response.json().await?;
        Ok(task.into_state())
    }

    async fn wait(&self, client: &reqwest::Client, kind: TaskKind, task_id: &str) -> Result<MeshyTask> {
        poll_until_done(self.poll, "meshy", task_id, || {
            self.check_task(client, kind, task_id)
        })
        .await
    }

    /// Creates the text-to-3D task for the requested mode.
    async fn submit_text(
        &self,
        client: &reqwest::Client,
        prompt: &str,
        opts: &DriverOptions,
    ) -> Result<Submitted> {
        let mode = opts
            .get_str("mode")
            .map(|m| m.to_ascii_lowercase())
            .unwrap_or_else(|| "preview".to_string());

        if mode == "refine" {
            if let Some(preview_id) = opts.get_str("previewTaskId") {
                let body = MeshyTaskRequest::refine(preview_id.clone(), opts);
                let task_id = self.create_task(client, TaskKind::TextTo3d, &body).await?;
                return Ok(Submitted {
                    kind: TaskKind::TextTo3d,
                    task_id,
                    body,
                    preview_task_id: Some(preview_id),
                });
            }
        }

        let preview = MeshyTaskRequest::preview(prompt, opts);
        let preview_id = self.create_task(client, TaskKind::TextTo3d, &preview).await?;
        if mode == "preview" {
            return Ok(Submitted {
                kind: TaskKind::TextTo3d,
                task_id: preview_id,
                body: preview,
                preview_task_id: None,
            });
        }

        self.wait(client, TaskKind::TextTo3d, &preview_id).await?;
        tracing::debug!(preview_task_id = %preview_id, "Meshy preview done, refining");

        let body = MeshyTaskRequest::refine(preview_id.clone(), opts);
        let task_id = self.create_task(client, TaskKind::TextTo3d, &body).await?;
        Ok(Submitted {
            kind: TaskKind::TextTo3d,
            task_id,
            body,
            preview_task_id: Some(preview_id),
        })
    }

    async fn submit(&self, client: &reqwest::Client, request: &GenerationRequest) -> Result<Submitted> {
        let opts = &request.options;
        let prompt = request.prompt.trim();

        let (kind, body) = match request.images.as_slice() {
            [] if prompt.is_empty() => {
                return Err(DriverError::InvalidRequest(
                    "Meshy 3D generation requires an input image or prompt".into(),
                ))
            }
            [] => return self.submit_text(client, prompt, opts).await,
            [image] => (TaskKind::ImageTo3d, MeshyTaskRequest::image(image, opts)),
            images => (TaskKind::MultiImageTo3d, MeshyTaskRequest::multi_image(images, opts)),
        };

        let task_id = self.create_task(client, kind, &body).await?;
        Ok(Submitted {
            kind,
            task_id,
            body,
            preview_task_id: None,
        })
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let start = Instant::now();
        let client = self.client_for(&request.options);

        let submitted = self.submit(client, request).await?;
        let task = self.wait(client, submitted.kind, &submitted.task_id).await?;

        let model_url = task.model_url().ok_or_else(|| {
            DriverError::UnexpectedResponse("Meshy API returned no model URL".into())
        })?;
        tracing::debug!(url = %model_url, "downloading Meshy model");

        let downloaded = http::download(client, &model_url, None).await?;
        let mime_type = match model_mime_for_file(&model_url) {
            Some(mime) => mime.to_string(),
            None => downloaded.mime_type("model/gltf-binary"),
        };

        let usage = task.credits.and_then(|credits| {
            Usage {
                credits_used: Some(credits),
                ..Usage::default()
            }
            .non_empty()
        });

        let mut parameters = serde_json::to_value(&submitted.body)?;
        if let Some(params) = parameters.as_object_mut() {
            params.remove("image_url");
            params.remove("image_urls");
            params.insert("taskType".into(), submitted.kind.as_str().into());
            if let Some(preview_id) = &submitted.preview_task_id {
                params.insert("previewTaskId".into(), preview_id.clone().into());
            }
            if let Some(urls) = &task.model_urls {
                params.insert("modelUrls".into(), Value::Object(urls.clone()));
            }
            if let Some(urls) = &task.texture_urls {
                params.insert("textureUrls".into(), urls.clone());
            }
            if let Some(url) = &task.thumbnail_url {
                params.insert("thumbnailUrl".into(), url.clone().into());
            }
        }

        let mut metadata = GenerationMetadata::new(DriverKind::Meshy)
            .with_task_id(submitted.task_id)
            .with_parameters(parameters)
            .with_input_images(&request.images)
            .with_file_name(file_name(&model_url))
            .with_duration(start);
        if let Some(model) = submitted.body.ai_model.clone() {
            metadata = metadata.with_model(model);
        }

        GeneratedMedia::new(downloaded.bytes, mime_type, usage, metadata)
    }
}

#[async_trait]
impl Driver for MeshyProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Meshy
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .proxied
            .get(http::join_url(&self.base_url, "openapi/v1/balance"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("Meshy health check failed", response).await);
        }
        Ok(())
    }
}

/// Last path segment of a model URL, `model.glb` when it has no model extension.
fn file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(name) if model_mime_for_file(name).is_some() => name.to_string(),
        _ => "model.glb".to_string(),
    }
}

fn flag(opts: &DriverOptions, key: &str) -> Option<bool> {
    opts.contains(key).then(|| opts.is_explicitly_true(key))
}

#[derive(Debug, Default, Serialize)]
struct MeshyTaskRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    art_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    texture_richness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable_pbr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    should_remesh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    should_texture: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_polycount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topology: Option<String>,
}

impl MeshyTaskRequest {
    /// Mesh settings shared by preview and image tasks.
    fn mesh_settings(opts: &DriverOptions) -> Self {
        Self {
            ai_model: opts.get_str("aiModel"),
            target_polycount: opts.get_i64("targetPolycount").filter(|v| *v != 0),
            topology: opts.get_str("topology"),
            ..Self::default()
        }
    }

    fn preview(prompt: &str, opts: &DriverOptions) -> Self {
        Self {
            mode: Some("preview"),
            prompt: Some(prompt.trim().to_string()),
            art_style: opts.get_str("artStyle"),
            negative_prompt: opts.get_str("negativePrompt"),
            seed: opts.get_i64("seed"),
            ..Self::mesh_settings(opts)
        }
    }

    fn refine(preview_task_id: String, opts: &DriverOptions) -> Self {
        Self {
            mode: Some("refine"),
            preview_task_id: Some(preview_task_id),
            texture_richness: opts.get_str("textureRichness"),
            ..Self::default()
        }
    }

    fn image(image: &InputImage, opts: &DriverOptions) -> Self {
        Self {
            image_url: Some(image.to_data_url()),
            enable_pbr: flag(opts, "enablePbr"),
            should_remesh: flag(opts, "shouldRemesh"),
            should_texture: flag(opts, "shouldTexture"),
            ..Self::mesh_settings(opts)
        }
    }

    fn multi_image(images: &[InputImage], opts: &DriverOptions) -> Self {
        Self {
            image_urls: Some(images.iter().map(InputImage::to_data_url).collect()),
            ..Self::mesh_settings(opts)
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
struct MeshyTask {
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: Option<u32>,
    #[serde(default)]
    model_urls: Option<Map<String, Value>>,
    #[serde(default)]
    model_url: Option<String>,
    #[serde(default)]
    texture_urls: Option<Value>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    task_error: Option<TaskError>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    credits: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
struct TaskError {
    #[serde(default)]
    message: Option<String>,
}

impl MeshyTask {
    fn into_state(self) -> TaskState<MeshyTask> {
        match self.status.as_str() {
            "SUCCEEDED" => TaskState::Succeeded(self),
            "FAILED" | "CANCELED" => {
                let message = self
                    .task_error
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .or_else(|| self.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string());
                TaskState::failed(self.status, format!("3D generation failed: {}", message))
            }
            "EXPIRED" => TaskState::failed(self.status, "3D generation task expired"),
            _ => TaskState::Pending {
                status: self.status,
                progress: self.progress,
            },
        }
    }

    /// GLB first, then FBX, then OBJ, then any other format.
    fn model_url(&self) -> Option<String> {
        let from_map = self.model_urls.as_ref().and_then(|urls| {
            let url = |key: &str| urls.get(key).and_then(Value::as_str).filter(|u| !u.is_empty());
            url("glb")
                .or_else(|| url("fbx"))
                .or_else(|| url("obj"))
                .or_else(|| urls.values().filter_map(Value::as_str).find(|u| !u.is_empty()))
                .map(str::to_string)
        });
        from_map.or_else(|| self.model_url.clone().filter(|u| !u.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubResponse, StubServer};
    use serde_json::json;

    fn provider(server: &StubServer) -> MeshyProvider {
        MeshyProvider::builder()
            .api_key("msy_test")
            .base_url(server.base())
            .poll_interval(Duration::from_millis(5))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn png() -> InputImage {
        InputImage::new(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png")
    }

    fn glb() -> Vec<u8> {
        b"glTF\x02\x00\x00\x00meshy".to_vec()
    }

    #[test]
    fn test_preview_body() {
        let opts = DriverOptions::new()
            .with("artStyle", "realistic")
            .with("seed", "7")
            .with("targetPolycount", 30000)
            .with("topology", "quad")
            .with("enablePbr", true);
        let body = serde_json::to_value(MeshyTaskRequest::preview("  a wooden chair ", &opts)).unwrap();

        assert_eq!(
            body,
            json!({
                "mode": "preview",
                "prompt": "a wooden chair",
                "art_style": "realistic",
                "seed": 7,
                "target_polycount": 30000,
                "topology": "quad"
            })
        );
    }

    #[test]
    fn test_refine_body_only_carries_preview_and_texture() {
        let opts = DriverOptions::new()
            .with("textureRichness", "high")
            .with("aiModel", "meshy-5");
        let body = serde_json::to_value(MeshyTaskRequest::refine("prev-1".into(), &opts)).unwrap();
        assert_eq!(
            body,
            json!({ "mode": "refine", "preview_task_id": "prev-1", "texture_richness": "high" })
        );
    }

    #[test]
    fn test_image_bodies() {
        let opts = DriverOptions::new()
            .with("enablePbr", "true")
            .with("shouldRemesh", false)
            .with("aiModel", "meshy-5");

        let single = serde_json::to_value(MeshyTaskRequest::image(&png(), &opts)).unwrap();
        assert!(single["image_url"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(single["enable_pbr"], true);
        assert_eq!(single["should_remesh"], false);
        assert!(single.get("should_texture").is_none());
        assert_eq!(single["ai_model"], "meshy-5");
        assert!(single.get("mode").is_none());

        let multi = serde_json::to_value(MeshyTaskRequest::multi_image(&[png(), png()], &opts)).unwrap();
        assert_eq!(multi["image_urls"].as_array().unwrap().len(), 2);
        assert!(multi.get("enable_pbr").is_none());
    }

    #[test]
    fn test_task_states() {
        let running: MeshyTask =
            serde_json::from_value(json!({ "status": "IN_PROGRESS", "progress": 35 })).unwrap();
        assert_eq!(
            running.into_state(),
            TaskState::Pending {
                status: "IN_PROGRESS".into(),
                progress: Some(35)
            }
        );

        let failed: MeshyTask = serde_json::from_value(
            json!({ "status": "FAILED", "task_error": { "message": "image has no subject" } }),
        )
        .unwrap();
        match failed.into_state() {
            TaskState::Failed { status, message } => {
                assert_eq!(status, "FAILED");
                assert!(message.contains("image has no subject"));
            }
            other => panic!("unexpected state: {other:?}"),
        }

        let expired: MeshyTask = serde_json::from_value(json!({ "status": "EXPIRED" })).unwrap();
        assert!(matches!(expired.into_state(), TaskState::Failed { ref message, .. } if message.contains("expired")));
    }

    #[test]
    fn test_model_url_preference() {
        let task: MeshyTask = serde_json::from_value(json!({
            "status": "SUCCEEDED",
            "model_urls": { "fbx": "https://a/model.fbx", "glb": "https://a/model.glb", "usdz": "" }
        }))
        .unwrap();
        assert_eq!(task.model_url().as_deref(), Some("https://a/model.glb"));

        let task: MeshyTask = serde_json::from_value(json!({
            "status": "SUCCEEDED",
            "model_urls": { "usdz": "https://a/model.usdz" }
        }))
        .unwrap();
        assert_eq!(task.model_url().as_deref(), Some("https://a/model.usdz"));

        let task: MeshyTask =
            serde_json::from_value(json!({ "status": "SUCCEEDED", "model_url": "https://a/m.obj" })).unwrap();
        assert_eq!(task.model_url().as_deref(), Some("https://a/m.obj"));

        assert!(MeshyTask::default().model_url().is_none());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("https://assets.meshy.ai/t/output/model.glb?Expires=1"), "model.glb");
        assert_eq!(file_name("https://assets.meshy.ai/t/download"), "model.glb");
    }

    #[tokio::test]
    async fn test_requires_image_or_prompt() {
        let server = StubServer::start().await;
        let err = provider(&server)
            .generate(&GenerationRequest::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidRequest(_)));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_image_to_3d_lifecycle() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/openapi/v1/image-to-3d",
                vec![StubResponse::json(202, json!({ "result": "img-task-1" }))],
            )
            .route(
                "GET",
                "/openapi/v1/image-to-3d/img-task-1",
                vec![
                    StubResponse::json(200, json!({ "status": "PENDING", "progress": 0 })),
                    StubResponse::json(200, json!({ "status": "IN_PROGRESS", "progress": 60 })),
                    StubResponse::json(
                        200,
                        json!({
                            "status": "SUCCEEDED",
                            "progress": 100,
                            "model_urls": { "glb": server.url("/assets/model.glb?Expires=9") },
                            "thumbnail_url": "https://assets/preview.png",
                            "credits": 20
                        }),
                    ),
                ],
            )
            .route(
                "GET",
                "/assets/model.glb",
                vec![StubResponse::bytes(200, "binary/octet-stream", glb())],
            );

        let request = GenerationRequest::new("")
            .with_image(png())
            .with_option("shouldTexture", "true");
        let media = provider(&server).generate(&request).await.unwrap();

        assert_eq!(media.data, glb());
        assert_eq!(media.mime_type, "model/gltf-binary");
        assert_eq!(media.usage.unwrap().credits_used, Some(20.0));
        assert_eq!(media.metadata.driver, DriverKind::Meshy);
        assert_eq!(media.metadata.task_id.as_deref(), Some("img-task-1"));
        assert_eq!(media.metadata.file_name.as_deref(), Some("model.glb"));
        assert_eq!(media.metadata.parameters["taskType"], "image-to-3d");
        assert_eq!(media.metadata.parameters["thumbnailUrl"], "https://assets/preview.png");
        assert!(media.metadata.parameters.get("image_url").is_none());

        let created = &server.requests_to("POST", "/openapi/v1/image-to-3d")[0];
        assert_eq!(created.header("authorization"), Some("Bearer msy_test"));
        assert_eq!(created.json()["should_texture"], true);
        assert_eq!(server.requests_to("GET", "/openapi/v1/image-to-3d/img-task-1").len(), 3);
    }

    #[tokio::test]
    async fn test_full_text_mode_refines_preview() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/openapi/v2/text-to-3d",
                vec![
                    StubResponse::json(200, json!({ "result": "preview-1" })),
                    StubResponse::json(200, json!({ "result": "refine-1" })),
                ],
            )
            .route(
                "GET",
                "/openapi/v2/text-to-3d/preview-1",
                vec![StubResponse::json(200, json!({ "status": "SUCCEEDED" }))],
            )
            .route(
                "GET",
                "/openapi/v2/text-to-3d/refine-1",
                vec![StubResponse::json(
                    200,
                    json!({ "status": "SUCCEEDED", "model_urls": { "glb": server.url("/assets/refined.glb") } }),
                )],
            )
            .route(
                "GET",
                "/assets/refined.glb",
                vec![StubResponse::bytes(200, "model/gltf-binary", glb())],
            );

        let request = GenerationRequest::new("a robot")
            .with_option("mode", "full")
            .with_option("textureRichness", "high");
        let media = provider(&server).generate(&request).await.unwrap();

        assert_eq!(media.metadata.task_id.as_deref(), Some("refine-1"));
        assert_eq!(media.metadata.parameters["previewTaskId"], "preview-1");
        assert_eq!(media.metadata.file_name.as_deref(), Some("refined.glb"));

        let created = server.requests_to("POST", "/openapi/v2/text-to-3d");
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].json()["mode"], "preview");
        assert_eq!(created[0].json()["prompt"], "a robot");
        assert_eq!(
            created[1].json(),
            json!({ "mode": "refine", "preview_task_id": "preview-1", "texture_richness": "high" })
        );
    }

    #[tokio::test]
    async fn test_multi_image_failure() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/openapi/v1/multi-image-to-3d",
                vec![StubResponse::json(200, json!({ "result": "multi-1" }))],
            )
            .route(
                "GET",
                "/openapi/v1/multi-image-to-3d/multi-1",
                vec![StubResponse::json(200, json!({ "status": "FAILED", "task_error": { "message": "bad views" } }))],
            );

        let request = GenerationRequest::new("").with_images([png(), png(), png()]);
        let err = provider(&server).generate(&request).await.unwrap_err();
        match err {
            DriverError::TaskFailed { task_id, message, .. } => {
                assert_eq!(task_id, "multi-1");
                assert!(message.contains("bad views"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            server.requests_to("POST", "/openapi/v1/multi-image-to-3d")[0].json()["image_urls"]
                .as_array()
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_submit_error_and_health_check() {
        let server = StubServer::start().await;
        server
            .route(
                "POST",
                "/openapi/v2/text-to-3d",
                vec![StubResponse::json(402, json!({ "message": "Insufficient funds" }))],
            )
            .route(
                "GET",
                "/openapi/v1/balance",
                vec![StubResponse::json(200, json!({ "balance": 1000 }))],
            );

        let err = provider(&server)
            .generate(&GenerationRequest::new("a cat"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Billing(ref m) if m.contains("Insufficient funds")));

        provider(&server).health_check().await.unwrap();
        let unrouted = StubServer::start().await;
        assert!(provider(&unrouted).health_check().await.is_err());
    }
}
