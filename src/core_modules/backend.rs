// THEORY:
// The `backend` module defines the seams between the coordinator and the
// external ML runtime. The coordinator never looks inside the model: it sees
// an opaque capability that maps pixels to a depth map, a factory that can
// construct that capability (expensively), and two hardware probes. Keeping
// these as object-safe async traits means the whole pipeline can be exercised
// with counting mocks, and a real runtime binding lives entirely outside this
// crate.
//
// Key architectural principles:
// 1.  **Opaque capability**: `DepthBackend` is callable and nothing else. Its
//     file manifests, tensor math and runtime loading are out of scope.
// 2.  **Identity by resolved key**: a `BackendKey` is only formed *after*
//     device and precision preferences have been downgraded against what the
//     hardware actually supports, so two callers with different stated
//     preferences that resolve identically share one backend.
// 3.  **Probes never fail**: a capability probe that errors means the
//     capability is unsupported, never that the caller should see an error.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;

use crate::core_modules::progress::ProgressEvent;
use crate::error::ExternalError;

/// Which device class a backend should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevicePreference {
    /// Hardware-accelerated device (GPU-class).
    Accelerated,
    /// Portable default device (CPU-class).
    Standard,
}

/// Numeric precision of the model weights and shader math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// Half precision (fp16); smaller download, needs device support.
    Half,
    /// Full precision (fp32); always supported.
    Full,
}

/// Identity of a loaded backend instance. Immutable once formed; formed only
/// from *resolved* device/precision values, never raw preferences.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub model_id: String,
    pub device: DevicePreference,
    pub precision: Precision,
}

/// A single-channel depth map produced by a backend. One byte per pixel,
/// `data.len() == width * height`.
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Progress callback handed to the factory for the duration of one load.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Everything a factory needs to construct one backend instance. The remote
/// locations and cache flag come straight from the pipeline configuration;
/// the device and precision are already resolved against the hardware.
pub struct BackendOptions {
    pub device: DevicePreference,
    pub precision: Precision,
    /// Base location for model files, when not using the factory's default
    /// remote source.
    pub remote_model_url: Option<String>,
    /// Base location for runtime assets (e.g. wasm binaries).
    pub remote_runtime_url: Option<String>,
    /// Whether the platform-level response cache may be used for downloads.
    pub use_platform_cache: bool,
    /// Receives incremental per-file download progress during construction.
    pub on_progress: ProgressSink,
}

/// The loaded, invokable depth estimation capability. Failures surface as the
/// runtime's own boxed error; the coordinator wraps them with source context.
#[async_trait]
pub trait DepthBackend: Send + Sync {
    /// Runs depth estimation over the given pixels.
    async fn estimate(&self, pixels: &RgbaImage) -> Result<DepthMap, ExternalError>;
}

/// Constructs backend instances. Construction is the expensive operation the
/// loader serializes; the factory reports download progress through
/// `options.on_progress` while it runs.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn construct(
        &self,
        model_id: &str,
        options: BackendOptions,
    ) -> Result<Arc<dyn DepthBackend>, ExternalError>;
}

/// Platform hardware probes. Each is consulted at most once per loader and
/// memoized; see `BackendLoader`.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Whether a hardware-accelerated device is available at all.
    async fn accelerated_available(&self) -> bool;
    /// Whether the accelerated device supports half-precision shader math.
    async fn half_precision_supported(&self) -> bool;
}
