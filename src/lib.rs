#![warn(missing_docs)]
//! evalgen - Unified model drivers for an AI media evaluation bench.
//!
//! Each driver wraps one generative service (hosted API or a self-hosted
//! GPU box) behind the same [`Driver::generate`] call, returning the result
//! bytes with a MIME type, vendor usage and generation metadata.
//!
//! # Quick Start
//!
//! ```no_run
//! use evalgen::{Driver, GenerationRequest, InputImage, TrellisProvider};
//!
//! #[tokio::main]
//! async fn main() -> evalgen::Result<()> {
//!     let driver = TrellisProvider::builder()
//!         .base_url("http://gpu-box:8000")
//!         .build()?;
//!     let request = GenerationRequest::new("")
//!         .with_image(InputImage::from_path("chair.png")?)
//!         .with_option("textureSize", 2048);
//!     let model = driver.generate(&request).await?;
//!     model.save("chair.glb")?;
//!     Ok(())
//! }
//! ```
//!
//! # By name or catalog
//!
//! ```no_run
//! use evalgen::{Catalog, DriverExt};
//!
//! #[tokio::main]
//! async fn main() -> evalgen::Result<()> {
//!     let catalog = Catalog::load("models.json")?;
//!     let entry = catalog.get("seedream").expect("entry exists");
//!     let driver = entry.build_driver()?;
//!     let image = driver
//!         .generate_with_retries(&entry.request("A lighthouse at dusk"), 2)
//!         .await?;
//!     println!("{}", serde_json::to_string(&image.to_record())?);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! ## Image Drivers
//! - `dashscope`: DashScope Wanx (Aliyun)
//! - `doubao`: Doubao Seedream (Volcengine Ark)
//! - `z-image`: self-hosted z-image service
//! - `gemini`: Gemini (Google)
//!
//! ## 3D Model Drivers
//! - `seed3d`: Doubao Seed3D (Volcengine Ark)
//! - `trellis`: self-hosted TRELLIS.2
//! - `tripo`: Tripo3D
//! - `meshy`: Meshy
//! - `hyper3d`: Hyper3D Rodin
//!
//! ## Video Drivers
//! - `ltx2`: self-hosted LTX-2
//!
//! ## Meta Features
//! - `image`, `model3d`, `video`: all drivers of that media kind
//! - `cli`: Command-line interface

mod error;

pub mod config;
pub mod driver;
pub mod http;
pub mod registry;
pub mod task;

#[cfg(test)]
mod testing;

// Re-export error types at crate root
pub use error::{parse_retry_after, sanitize_error_message, DriverError, Result};

pub use config::{Catalog, ModelEntry};
pub use driver::{
    Driver, DriverExt, DriverKind, DriverOptions, GeneratedMedia, GenerationMetadata,
    GenerationRequest, InputImage, MediaKind, MediaRecord, Usage,
};
pub use registry::{build_driver, driver_for_name, DriverSettings};

#[cfg(feature = "dashscope")]
pub use driver::providers::{DashScopeProvider, DashScopeProviderBuilder};

#[cfg(feature = "doubao")]
pub use driver::providers::{DoubaoProvider, DoubaoProviderBuilder};

#[cfg(feature = "z-image")]
pub use driver::providers::{ZImageProvider, ZImageProviderBuilder};

#[cfg(feature = "gemini")]
pub use driver::providers::{GeminiProvider, GeminiProviderBuilder};

#[cfg(feature = "seed3d")]
pub use driver::providers::{Seed3dProvider, Seed3dProviderBuilder};

#[cfg(feature = "trellis")]
pub use driver::providers::{TrellisProvider, TrellisProviderBuilder};

#[cfg(feature = "tripo")]
pub use driver::providers::{TripoProvider, TripoProviderBuilder};

#[cfg(feature = "meshy")]
pub use driver::providers::{MeshyProvider, MeshyProviderBuilder};

#[cfg(feature = "hyper3d")]
pub use driver::providers::{Hyper3dProvider, Hyper3dProviderBuilder};

#[cfg(feature = "ltx2")]
pub use driver::providers::{Ltx2Provider, Ltx2ProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{Catalog, ModelEntry};
    pub use crate::driver::{
        Driver, DriverExt, DriverKind, GeneratedMedia, GenerationRequest, InputImage,
    };
    pub use crate::error::{DriverError, Result};
    pub use crate::registry::{build_driver, driver_for_name, DriverSettings};
}
