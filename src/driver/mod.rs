//! Model driver abstraction and shared types.

mod options;
mod provider;
pub mod providers;
mod types;

pub use options::DriverOptions;
pub use provider::{Driver, DriverExt};
pub use types::{
    extension_for_mime, sniff_mime, DriverKind, GeneratedMedia, GenerationMetadata,
    GenerationRequest, InputImage, MediaKind, MediaRecord, Usage, INPUT_MIME_WHITELIST,
    MAX_INPUT_IMAGE_BYTES,
};
