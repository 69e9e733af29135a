//! Builds drivers by kind or registry name.

use crate::driver::{Driver, DriverKind};
use crate::error::{DriverError, Result};
use std::time::Duration;

#[cfg(any(
    feature = "dashscope",
    feature = "doubao",
    feature = "gemini",
    feature = "hyper3d",
    feature = "ltx2",
    feature = "meshy",
    feature = "seed3d",
    feature = "trellis",
    feature = "tripo",
    feature = "z-image"
))]
use crate::driver::providers;

/// Connection settings applied when building a driver.
///
/// Unset fields fall back to the driver's environment variables and defaults.
/// Settings a driver has no use for are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSettings {
    /// API key or bearer token.
    pub api_key: Option<String>,
    /// Base URL (or full endpoint for single-endpoint drivers).
    pub base_url: Option<String>,
    /// Task polling interval.
    pub poll_interval: Option<Duration>,
    /// Request or task timeout.
    pub timeout: Option<Duration>,
}

impl DriverSettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Returns true if the driver was compiled in.
pub fn is_enabled(kind: DriverKind) -> bool {
    match kind {
        DriverKind::DashScope => cfg!(feature = "dashscope"),
        DriverKind::Doubao => cfg!(feature = "doubao"),
        DriverKind::Seed3d => cfg!(feature = "seed3d"),
        DriverKind::Trellis => cfg!(feature = "trellis"),
        DriverKind::ZImage => cfg!(feature = "z-image"),
        DriverKind::Gemini => cfg!(feature = "gemini"),
        DriverKind::Tripo => cfg!(feature = "tripo"),
        DriverKind::Meshy => cfg!(feature = "meshy"),
        DriverKind::Hyper3d => cfg!(feature = "hyper3d"),
        DriverKind::Ltx2 => cfg!(feature = "ltx2"),
    }
}

/// Builds a driver of the given kind.
pub fn build_driver(kind: DriverKind, settings: &DriverSettings) -> Result<Box<dyn Driver>> {
    tracing::debug!(driver = %kind, "building driver");
    match kind {
        DriverKind::DashScope => dashscope(settings),
        DriverKind::Doubao => doubao(settings),
        DriverKind::Seed3d => seed3d(settings),
        DriverKind::Trellis => trellis(settings),
        DriverKind::ZImage => zimage(settings),
        DriverKind::Gemini => gemini(settings),
        DriverKind::Tripo => tripo(settings),
        DriverKind::Meshy => meshy(settings),
        DriverKind::Hyper3d => hyper3d(settings),
        DriverKind::Ltx2 => ltx2(settings),
    }
}

/// Parses a registry name (or alias) and builds the driver.
pub fn driver_for_name(name: &str, settings: &DriverSettings) -> Result<Box<dyn Driver>> {
    build_driver(name.parse()?, settings)
}

#[allow(dead_code)]
fn not_available(kind: DriverKind) -> DriverError {
    DriverError::ProviderNotAvailable(format!(
        "{} driver not enabled (build with feature for {})",
        kind.display_name(),
        kind
    ))
}

#[cfg(feature = "dashscope")]
fn dashscope(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::DashScopeProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(interval) = s.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "dashscope"))]
fn dashscope(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::DashScope))
}

#[cfg(feature = "doubao")]
fn doubao(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::DoubaoProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.url(url);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "doubao"))]
fn doubao(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Doubao))
}

#[cfg(feature = "seed3d")]
fn seed3d(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::Seed3dProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(interval) = s.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "seed3d"))]
fn seed3d(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Seed3d))
}

#[cfg(feature = "trellis")]
fn trellis(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::TrellisProvider::builder();
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "trellis"))]
fn trellis(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Trellis))
}

#[cfg(feature = "z-image")]
fn zimage(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::ZImageProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.url(url);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "z-image"))]
fn zimage(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::ZImage))
}

#[cfg(feature = "gemini")]
fn gemini(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::GeminiProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "gemini"))]
fn gemini(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Gemini))
}

#[cfg(feature = "tripo")]
fn tripo(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::TripoProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(interval) = s.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "tripo"))]
fn tripo(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Tripo))
}

#[cfg(feature = "meshy")]
fn meshy(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::MeshyProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(interval) = s.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "meshy"))]
fn meshy(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Meshy))
}

#[cfg(feature = "hyper3d")]
fn hyper3d(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::Hyper3dProvider::builder();
    if let Some(key) = &s.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(interval) = s.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "hyper3d"))]
fn hyper3d(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Hyper3d))
}

#[cfg(feature = "ltx2")]
fn ltx2(s: &DriverSettings) -> Result<Box<dyn Driver>> {
    let mut builder = providers::Ltx2Provider::builder();
    if let Some(url) = &s.base_url {
        builder = builder.base_url(url);
    }
    if let Some(timeout) = s.timeout {
        builder = builder.timeout(timeout);
    }
    Ok(Box::new(builder.build()?))
}

#[cfg(not(feature = "ltx2"))]
fn ltx2(_: &DriverSettings) -> Result<Box<dyn Driver>> {
    Err(not_available(DriverKind::Ltx2))
}
