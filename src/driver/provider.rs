//! Driver trait and utilities.

use crate::driver::types::{DriverKind, GeneratedMedia, GenerationRequest};
use crate::error::Result;
use async_trait::async_trait;

/// Trait for model drivers.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Runs the wrapped generative service for the given request.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia>;

    /// Returns the kind of this driver.
    fn kind(&self) -> DriverKind;

    /// Returns the name of this driver for display.
    fn name(&self) -> &str {
        self.kind().display_name()
    }

    /// Checks if the service is reachable and authenticated.
    ///
    /// Any non-success answer from the service is an error.
    async fn health_check(&self) -> Result<()>;
}

/// Extension trait for drivers with retry logic.
#[async_trait]
pub trait DriverExt: Driver {
    /// Generates with automatic retries on transient failures.
    async fn generate_with_retries(
        &self,
        request: &GenerationRequest,
        max_retries: u32,
    ) -> Result<GeneratedMedia> {
        let mut attempt = 0;

        loop {
            match self.generate(request).await {
                Ok(media) => return Ok(media),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e.retry_after().unwrap_or(std::time::Duration::from_secs(1));
                    attempt += 1;
                    tracing::warn!(
                        driver = %self.kind(),
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis(),
                        "retrying after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: Driver + ?Sized> DriverExt for T {}

#[async_trait]
impl<T: Driver + ?Sized> Driver for Box<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        (**self).generate(request).await
    }

    fn kind(&self) -> DriverKind {
        (**self).kind()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}
