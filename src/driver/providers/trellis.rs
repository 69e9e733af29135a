//! TRELLIS.2 self-hosted image-to-3D driver.
//!
//! The service takes a multipart upload on `POST /generate` and answers with
//! the GLB bytes directly.

use crate::driver::options::DriverOptions;
use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest};
use crate::error::{DriverError, Result};
use crate::http;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::{Duration, Instant};

const DEFAULT_URL: &str = "http://localhost:8000";
const GENERATE_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for TrellisProvider.
#[derive(Debug, Clone, Default)]
pub struct TrellisProviderBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl TrellisProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service URL. Falls back to `TRELLIS_URL`, then `http://localhost:8000`.
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
    pub fn build(self) -> Result<TrellisProvider> {
        let base_url = self
            .base_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| std::env::var("TRELLIS_URL").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        Ok(TrellisProvider {
            client: http::client(false, Some(self.timeout.unwrap_or(GENERATE_TIMEOUT)))?,
            base_url,
        })
    }
}

/// TRELLIS.2 image-to-3D driver. No API key is needed.
pub struct TrellisProvider {
    client: reqwest::Client,
    base_url: String,
}

impl TrellisProvider {
    /// Creates a new `TrellisProviderBuilder`.
    pub fn builder() -> TrellisProviderBuilder {
        TrellisProviderBuilder::new()
    }

    /// The configured service URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Driver for TrellisProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let image = request.images.first().ok_or_else(|| {
            DriverError::InvalidRequest("TRELLIS.2 requires an input image".into())
        })?;

        let base_url = request
            .options
            .get_str("url")
            .unwrap_or_else(|| self.base_url.clone());
        let generate_url = http::join_url(&base_url, "generate");

        let params = TrellisParams::from_options(&request.options);
        tracing::debug!(
            url = %generate_url,
            size = image.data.len(),
            mime = %image.mime_type,
            "uploading image to TRELLIS.2"
        );

        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name())
            .mime_str(&image.mime_type)
            .map_err(|e| DriverError::InvalidRequest(format!("invalid image MIME type: {}", e)))?;
        let form = params
            .fields()
            .into_iter()
            .fold(Form::new().part("image", part), |form, (name, value)| {
                form.text(name, value)
            });

        let start = Instant::now();
        let response = self.client.post(&generate_url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(http::api_error("TRELLIS.2 generation failed", response).await);
        }

        let downloaded = http::read_body(response).await?;
        tracing::debug!(
            bytes = downloaded.bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "TRELLIS.2 generation complete"
        );
        let mime_type = downloaded.mime_type("model/gltf-binary");

        GeneratedMedia::new(
            downloaded.bytes,
            mime_type,
            None,
            GenerationMetadata::new(DriverKind::Trellis)
                .with_service("TRELLIS.2")
                .with_service_url(base_url)
                .with_parameters(params.to_value())
                .with_input_images(&request.images[..1])
                .with_file_name("model.glb")
                .with_duration(start),
        )
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Trellis
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(http::join_url(&self.base_url, "health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http::api_error("TRELLIS.2 health check failed", response).await);
        }
        Ok(())
    }
}

/// Optional mesh post-processing settings.
#[derive(Debug, Clone, Default, PartialEq)]
struct TrellisParams {
    simplify_faces: Option<Value>,
    decimation_target: Option<Value>,
    texture_size: Option<Value>,
    remesh: Option<bool>,
}

impl TrellisParams {
    fn from_options(options: &DriverOptions) -> Self {
        let truthy = |key: &str| options.get(key).filter(|v| is_truthy(v)).cloned();
        Self {
            simplify_faces: truthy("simplifyFaces"),
            decimation_target: truthy("decimationTarget"),
            texture_size: truthy("textureSize"),
            remesh: options
                .get("remesh")
                .filter(|v| !v.is_null())
                .map(is_truthy),
        }
    }

    /// Multipart text fields, in upload order.
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(v) = &self.simplify_faces {
            fields.push(("simplify_faces", field_text(v)));
        }
        if let Some(v) = &self.decimation_target {
            fields.push(("decimation_target", field_text(v)));
        }
        if let Some(v) = &self.texture_size {
            fields.push(("texture_size", field_text(v)));
        }
        if let Some(remesh) = self.remesh {
            fields.push(("remesh", remesh.to_string()));
        }
        fields
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "simplifyFaces": self.simplify_faces,
            "decimationTarget": self.decimation_target,
            "textureSize": self.texture_size,
            "remesh": self.remesh,
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
