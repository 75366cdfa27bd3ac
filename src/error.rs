// THEORY:
// Every failure the coordinator can produce is named here, because callers
// react to these three situations very differently: a backend that failed to
// load can be retried, an unusable image cannot, and a failed depth
// computation is a best-effort miss that should not take the caller down.
// The variants carry enough context (model id, device, source locator) that a
// log line built from the error alone is actionable.

use thiserror::Error;

use crate::core_modules::acquisition::CredentialMode;
use crate::core_modules::backend::DevicePreference;

/// Boxed source error from an external capability (factory, fetcher, backend).
pub type ExternalError = Box<dyn std::error::Error + Send + Sync>;

/// All errors surfaced by the depth coordination layer.
#[derive(Debug, Error)]
pub enum DepthError {
    /// Construction of a depth estimation backend failed. Failures are never
    /// cached; an independent later call retries the load from scratch.
    #[error("failed to load depth estimation backend for model '{model}' on {device:?} device")]
    BackendLoad {
        model: String,
        device: DevicePreference,
        #[source]
        source: ExternalError,
    },

    /// No acquisition strategy produced a pixel-readable copy of the image.
    #[error("image '{locator}' cannot be used: no acquisition strategy produced readable pixels")]
    ImageUnusable { locator: String },

    /// The backend was invoked for a source and the invocation failed.
    #[error("depth computation failed for '{source}'")]
    DepthComputation {
        source: String,
        #[source]
        cause: ExternalError,
    },

    /// A re-fetch attempt in the acquisition ladder failed outright.
    #[error("failed to fetch '{source}' with {mode:?} credentials")]
    Fetch {
        source: String,
        mode: CredentialMode,
        #[source]
        cause: ExternalError,
    },

    /// The backend returned a depth buffer whose length disagrees with its
    /// stated dimensions. Treated like any other failed computation: logged
    /// and absent, never cached.
    #[error("malformed depth map: {len} bytes for {width}x{height}")]
    MalformedDepthMap { width: u32, height: u32, len: usize },

    /// Encoding the composed surface to a raster format failed.
    #[error("failed to encode composite image")]
    Encode(#[from] image::ImageError),
}
