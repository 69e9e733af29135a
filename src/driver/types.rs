//! Core types shared by all drivers.

use crate::driver::options::DriverOptions;
use crate::error::{DriverError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Largest input image accepted from disk (10 MiB).
pub const MAX_INPUT_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Image MIME types accepted as driver input.
pub const INPUT_MIME_WHITELIST: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Kind of media a driver produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still images.
    Image,
    /// 3D models (GLB and friends).
    #[serde(rename = "3d")]
    Model3d,
    /// Video clips.
    Video,
}

impl MediaKind {
    /// Guesses the media kind from a MIME type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("model/") {
            Some(Self::Model3d)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Model3d => write!(f, "3d"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Driver kind, one per wrapped generative service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DriverKind {
    /// Aliyun DashScope (Tongyi Wanxiang text-to-image).
    DashScope,
    /// Volcengine Ark Doubao Seedream image generation.
    Doubao,
    /// Volcengine Ark Doubao Seed3D image-to-3D.
    Seed3d,
    /// Local TRELLIS.2 image-to-3D service.
    Trellis,
    /// Local "z-image" text-to-image service.
    ZImage,
    /// Google Gemini image generation.
    Gemini,
    /// Tripo3D text/image-to-3D.
    Tripo,
    /// Meshy text/image/multi-image-to-3D.
    Meshy,
    /// Hyper3D Rodin text/image-to-3D.
    Hyper3d,
    /// Local LTX-2 video service.
    Ltx2,
}

impl DriverKind {
    /// Every driver kind, in listing order.
    pub fn all() -> [DriverKind; 10] {
        [
            Self::DashScope,
            Self::Doubao,
            Self::ZImage,
            Self::Gemini,
            Self::Seed3d,
            Self::Trellis,
            Self::Tripo,
            Self::Meshy,
            Self::Hyper3d,
            Self::Ltx2,
        ]
    }

    /// Returns the registry name of this driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashScope => "dashscope",
            Self::Doubao => "doubao",
            Self::Seed3d => "doubao-seed3d",
            Self::Trellis => "trellis",
            Self::ZImage => "z_image",
            Self::Gemini => "google",
            Self::Tripo => "tripo",
            Self::Meshy => "meshy",
            Self::Hyper3d => "hyper3d",
            Self::Ltx2 => "ltx2",
        }
    }

    /// Returns the kind of media this driver produces.
    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::DashScope | Self::Doubao | Self::ZImage | Self::Gemini => MediaKind::Image,
            Self::Seed3d | Self::Trellis | Self::Tripo | Self::Meshy | Self::Hyper3d => {
                MediaKind::Model3d
            }
            Self::Ltx2 => MediaKind::Video,
        }
    }

    /// Environment variable holding the API key, `None` for local services.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::DashScope => Some("DASHSCOPE_API_KEY"),
            Self::Doubao | Self::Seed3d => Some("ARK_API_KEY"),
            Self::Gemini => Some("GOOGLE_API_KEY"),
            Self::Tripo => Some("TRIPO_API_KEY"),
            Self::Meshy => Some("MESHY_API_KEY"),
            Self::Hyper3d => Some("HYPER3D_API_KEY"),
            Self::Trellis | Self::ZImage | Self::Ltx2 => None,
        }
    }

    /// Returns true if the driver refuses to run without an API key.
    pub fn requires_api_key(&self) -> bool {
        self.api_key_env().is_some()
    }

    /// Human readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::DashScope => "DashScope Wanx (Aliyun)",
            Self::Doubao => "Doubao Seedream (Volcengine Ark)",
            Self::Seed3d => "Doubao Seed3D (Volcengine Ark)",
            Self::Trellis => "TRELLIS.2 (local)",
            Self::ZImage => "Z-Image (local)",
            Self::Gemini => "Gemini (Google)",
            Self::Tripo => "Tripo3D",
            Self::Meshy => "Meshy",
            Self::Hyper3d => "Hyper3D Rodin",
            Self::Ltx2 => "LTX-2 (local)",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dashscope" | "wanx" | "aliyun" => Ok(Self::DashScope),
            "doubao" | "ark" | "seedream" => Ok(Self::Doubao),
            "doubao-seed3d" | "doubao_seed3d" | "seed3d" => Ok(Self::Seed3d),
            "trellis" | "trellis2" | "trellis.2" => Ok(Self::Trellis),
            "z_image" | "z-image" | "zimage" => Ok(Self::ZImage),
            "google" | "gemini" => Ok(Self::Gemini),
            "tripo" | "tripo3d" => Ok(Self::Tripo),
            "meshy" | "meshy3d" | "meshy-3d" => Ok(Self::Meshy),
            "hyper3d" | "rodin" | "hyper3d-rodin" => Ok(Self::Hyper3d),
            "ltx2" | "ltx-2" => Ok(Self::Ltx2),
            _ => Err(DriverError::UnknownDriver(s.to_string())),
        }
    }
}

impl TryFrom<String> for DriverKind {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DriverKind> for String {
    fn from(kind: DriverKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Detects a MIME type from magic bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    // Binary glTF container
    if data.starts_with(b"glTF") {
        return Some("model/gltf-binary");
    }

    // ISO base media: ....ftyp
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    None
}

/// Returns the file extension for a MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let base = mime.split(';').next().unwrap_or_default().trim();
    match base.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "model/gltf-binary" => "glb",
        "model/gltf+json" => "gltf",
        "model/obj" => "obj",
        "model/vnd.usdz+zip" => "usdz",
        "video/mp4" => "mp4",
        "application/zip" => "zip",
        _ => "bin",
    }
}

/// MIME type of a 3D model file, from the extension of its name or URL path.
pub(crate) fn model_mime_for_file(name: &str) -> Option<&'static str> {
    let path = name.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = file.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "glb" => Some("model/gltf-binary"),
        "gltf" => Some("model/gltf+json"),
        "obj" => Some("model/obj"),
        "usd" | "usdz" => Some("model/vnd.usdz+zip"),
        "fbx" => Some("application/octet-stream"),
        _ => None,
    }
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// An image passed to a driver as input (reference, edit or 3D source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// MIME type of `data`.
    pub mime_type: String,
    /// Where the image was read from, kept for generation metadata.
    pub original_path: Option<PathBuf>,
}

impl InputImage {
    /// Creates an input image from raw bytes.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            original_path: None,
        }
    }

    /// Creates an input image from base64 data.
    pub fn from_base64(data: &str, mime_type: impl Into<String>) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| DriverError::Decode(e.to_string()))?;
        Ok(Self::new(bytes, mime_type))
    }

    /// Reads an input image from disk, enforcing the upload whitelist and size cap.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;

        if data.len() > MAX_INPUT_IMAGE_BYTES {
            return Err(DriverError::InvalidRequest(format!(
                "{} is {} bytes, limit is {} bytes",
                path.display(),
                data.len(),
                MAX_INPUT_IMAGE_BYTES
            )));
        }

        let mime_type = sniff_mime(&data)
            .or_else(|| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .and_then(mime_from_extension)
            })
            .filter(|m| INPUT_MIME_WHITELIST.contains(m))
            .ok_or_else(|| {
                DriverError::InvalidRequest(format!(
                    "{} is not a JPEG, PNG or WebP image",
                    path.display()
                ))
            })?;

        Ok(Self {
            data,
            mime_type: mime_type.to_string(),
            original_path: Some(path.to_path_buf()),
        })
    }

    /// Encodes the image data as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Upload file name, e.g. `image.png`.
    pub fn file_name(&self) -> String {
        let ext = match extension_for_mime(&self.mime_type) {
            "bin" => "png",
            ext => ext,
        };
        format!("image.{}", ext)
    }

    /// Summary used in generation metadata.
    pub(crate) fn summary(&self, index: usize) -> serde_json::Value {
        serde_json::json!({
            "index": index,
            "originalPath": self.original_path.as_ref().map(|p| p.display().to_string()),
            "mimeType": self.mime_type,
            "size": self.data.len(),
        })
    }
}

/// A request to run a driver.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Vendor model identifier; drivers fall back to their default model.
    pub model: Option<String>,
    /// The text prompt.
    pub prompt: String,
    /// Input images, in order.
    pub images: Vec<InputImage>,
    /// Free-form per-driver options.
    pub options: DriverOptions,
}

impl GenerationRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the vendor model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Appends an input image.
    pub fn with_image(mut self, image: InputImage) -> Self {
        self.images.push(image);
        self
    }

    /// Appends several input images.
    pub fn with_images(mut self, images: impl IntoIterator<Item = InputImage>) -> Self {
        self.images.extend(images);
        self
    }

    /// Replaces the driver options.
    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets a single driver option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options = self.options.with(key, value);
        self
    }

    /// Returns true if at least one input image is attached.
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// Returns the model, or `default` when none was set.
    pub(crate) fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
    }
}

/// Usage reported by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Number of images billed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    /// Vendor credits consumed or remaining, as reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<f64>,
    /// Prompt tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    /// Output tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Total tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `None` for an empty usage block.
    pub(crate) fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// Metadata about a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    /// Driver that produced the media.
    pub driver: DriverKind,
    /// Vendor model identifier.
    pub model: Option<String>,
    /// Vendor task id for asynchronous drivers.
    pub task_id: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Local RFC 3339 timestamp of completion.
    pub created_at: Option<String>,
    /// Name of the self-hosted service that ran the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Base URL of a self-hosted service.
    pub service_url: Option<String>,
    /// Effective generation parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Summaries of the input images.
    #[serde(default)]
    pub input_images: Vec<serde_json::Value>,
    /// Suggested file name for the output.
    pub file_name: Option<String>,
}

impl GenerationMetadata {
    /// Creates empty metadata for a driver.
    pub fn new(driver: DriverKind) -> Self {
        Self {
            driver,
            model: None,
            task_id: None,
            duration_ms: None,
            created_at: None,
            service: None,
            service_url: None,
            parameters: serde_json::Value::Null,
            input_images: Vec::new(),
            file_name: None,
        }
    }

    pub(crate) fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub(crate) fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub(crate) fn with_duration(mut self, start: std::time::Instant) -> Self {
        self.duration_ms = Some(start.elapsed().as_millis() as u64);
        self.created_at = Some(local_timestamp());
        self
    }

    pub(crate) fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    pub(crate) fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    pub(crate) fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub(crate) fn with_input_images(mut self, images: &[InputImage]) -> Self {
        self.input_images = images
            .iter()
            .enumerate()
            .map(|(i, img)| img.summary(i))
            .collect();
        self
    }

    pub(crate) fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Local time with UTC offset, second precision.
pub(crate) fn local_timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

/// Media produced by a driver.
#[derive(Debug, Clone)]
#[must_use = "generated media should be saved or processed"]
pub struct GeneratedMedia {
    /// Raw bytes.
    pub data: Vec<u8>,
    /// MIME type, never empty.
    pub mime_type: String,
    /// Vendor-reported usage.
    pub usage: Option<Usage>,
    /// Generation metadata.
    pub metadata: GenerationMetadata,
}

impl GeneratedMedia {
    /// Creates generated media, rejecting an empty payload or MIME type.
    pub fn new(
        data: Vec<u8>,
        mime_type: impl Into<String>,
        usage: Option<Usage>,
        metadata: GenerationMetadata,
    ) -> Result<Self> {
        let mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            return Err(DriverError::UnexpectedResponse(
                "generated media has no MIME type".into(),
            ));
        }
        if data.is_empty() {
            return Err(DriverError::UnexpectedResponse(format!(
                "{} returned an empty payload",
                metadata.driver
            )));
        }
        Ok(Self {
            data,
            mime_type,
            usage,
            metadata,
        })
    }

    /// Returns the size of the data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the media kind implied by the MIME type.
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime_type)
    }

    /// Suggested file extension.
    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// Saves the data to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }

    /// Encodes the data as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Returns the media as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Returns the uniform `{ dataBase64, mimeType, usage }` record.
    pub fn to_record(&self) -> MediaRecord {
        MediaRecord {
            data_base64: self.to_base64(),
            mime_type: self.mime_type.clone(),
            usage: self.usage.clone(),
        }
    }
}

/// Uniform wire record returned to callers of the evaluation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Base64 of the media bytes.
    pub data_base64: String,
    /// MIME type.
    pub mime_type: String,
    /// Vendor usage, if any.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl MediaRecord {
    /// Decodes the record payload.
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data_base64)
            .map_err(|e| DriverError::Decode(e.to_string()))
    }
}
