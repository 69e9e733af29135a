//! Model driver implementations.

#[cfg(feature = "dashscope")]
mod dashscope;
#[cfg(feature = "doubao")]
mod doubao;
#[cfg(feature = "gemini")]
mod gemini;
#[cfg(feature = "hyper3d")]
mod hyper3d;
#[cfg(feature = "ltx2")]
mod ltx2;
#[cfg(feature = "meshy")]
mod meshy;
#[cfg(feature = "seed3d")]
mod seed3d;
#[cfg(feature = "trellis")]
mod trellis;
#[cfg(feature = "tripo")]
mod tripo;
#[cfg(feature = "z-image")]
mod zimage;

#[cfg(feature = "dashscope")]
pub use dashscope::{DashScopeProvider, DashScopeProviderBuilder};

#[cfg(feature = "doubao")]
pub use doubao::{DoubaoProvider, DoubaoProviderBuilder};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderBuilder};

#[cfg(feature = "hyper3d")]
pub use hyper3d::{Hyper3dProvider, Hyper3dProviderBuilder};

#[cfg(feature = "ltx2")]
pub use ltx2::{Ltx2Provider, Ltx2ProviderBuilder, RANDOM_SEED};

#[cfg(feature = "meshy")]
pub use meshy::{MeshyProvider, MeshyProviderBuilder};

#[cfg(feature = "seed3d")]
pub use seed3d::{Seed3dProvider, Seed3dProviderBuilder};

#[cfg(feature = "trellis")]
pub use trellis::{TrellisProvider, TrellisProviderBuilder};

#[cfg(feature = "tripo")]
pub use tripo::{TripoProvider, TripoProviderBuilder};

#[cfg(feature = "z-image")]
pub use zimage::{ZImageProvider, ZImageProviderBuilder};
