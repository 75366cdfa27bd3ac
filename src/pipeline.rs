// THEORY:
// The `pipeline` module is the final, top-level API for the depth engine.
// It encapsulates the full coordination stack — backend lifecycle, progress
// aggregation, image acquisition, result caching, composite encoding — into a
// single, easy-to-use interface. A caller asks for a depth map or a 2D+Z
// composite; everything else (lazy backend loading, single-flight discipline,
// the tainted-image ladder) happens behind this facade.
//
// Error policy at this layer: an image that cannot be made readable is the
// caller's problem (`ImageUnusable` propagates), and so is a backend that
// failed to load (`BackendLoad` propagates, and is retried on the next call).
// A depth computation or encode that fails after that is treated as a
// best-effort miss: it is logged, nothing is cached, and the caller receives
// an absent result so a future call can retry.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use image::RgbaImage;
use tokio::sync::watch;
use tracing::warn;

use crate::core_modules::acquisition::{self, CredentialMode, ImageFetcher, ImageSource};
use crate::core_modules::backend::{
    BackendFactory, CapabilityProbe, DepthBackend, DepthMap, DevicePreference, Precision,
};
use crate::core_modules::compositor::{self, CompositeImage};
use crate::core_modules::depth_cache::SingleFlightCache;
use crate::core_modules::loader::{BackendLoader, LoadSettings};
use crate::core_modules::progress::ProgressEvent;
use crate::error::DepthError;

/// Model identifier used when the configuration does not name one.
pub const DEFAULT_DEPTH_MODEL: &str = "onnx-community/depth-anything-v2-small";

/// Configuration for the depth pipeline. All values are plain and settable;
/// they are consulted only when a backend is constructed, so changing them
/// after a backend has loaded for a given key has no effect on that instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Depth estimation model used when a request does not name one.
    pub default_model: String,
    /// Prefer the hardware-accelerated device when the platform has one.
    pub prefer_accelerated: bool,
    /// Prefer half-precision weights when the device supports them.
    pub prefer_half_precision: bool,
    /// Base location of remote model files; `None` keeps the factory default.
    pub remote_model_url: Option<String>,
    /// Base location of remote runtime assets; `None` keeps the factory default.
    pub remote_runtime_url: Option<String>,
    /// Allow the platform-level response cache to serve model downloads.
    pub use_platform_cache: bool,
    /// Prefer the remote content-delivery source over locally bundled assets;
    /// when set, the remote location overrides above are not applied.
    pub prefer_remote_cdn: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_DEPTH_MODEL.to_string(),
            prefer_accelerated: true,
            prefer_half_precision: true,
            remote_model_url: None,
            remote_runtime_url: None,
            use_platform_cache: true,
            prefer_remote_cdn: false,
        }
    }
}

/// The main, top-level struct for the depth engine.
pub struct DepthPipeline {
    config: Mutex<PipelineConfig>,
    loader: BackendLoader,
    fetcher: Arc<dyn ImageFetcher>,
    /// Encoded 2D+Z artifacts keyed by source locator. Never evicted.
    composites: SingleFlightCache<CompositeImage>,
}

impl DepthPipeline {
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn BackendFactory>,
        probe: Arc<dyn CapabilityProbe>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            loader: BackendLoader::new(factory, probe),
            fetcher,
            composites: SingleFlightCache::new(),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> PipelineConfig {
        self.config.lock().unwrap().clone()
    }

    /// Replaces the configuration. Backends already loaded for their keys are
    /// unaffected; the new values apply to future constructions.
    pub fn set_config(&self, config: PipelineConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Returns the configured depth estimation backend, loading it if it is
    /// not already loaded.
    pub async fn backend(&self) -> Result<Arc<dyn DepthBackend>, DepthError> {
        let config = self.config();
        let device = if config.prefer_accelerated {
            DevicePreference::Accelerated
        } else {
            DevicePreference::Standard
        };
        let precision = if config.prefer_half_precision {
            Precision::Half
        } else {
            Precision::Full
        };
        let settings = if config.prefer_remote_cdn {
            LoadSettings {
                remote_model_url: None,
                remote_runtime_url: None,
                use_platform_cache: config.use_platform_cache,
            }
        } else {
            LoadSettings {
                remote_model_url: config.remote_model_url.clone(),
                remote_runtime_url: config.remote_runtime_url.clone(),
                use_platform_cache: config.use_platform_cache,
            }
        };
        self.loader
            .acquire(&config.default_model, device, precision, &settings)
            .await
    }

    /// Generates a depth map for pixels the caller already holds.
    pub async fn depth_for_pixels(&self, pixels: &RgbaImage) -> Result<DepthMap, DepthError> {
        let backend = self.backend().await?;
        backend
            .estimate(pixels)
            .await
            .map_err(|cause| DepthError::DepthComputation {
                source: "<raw pixels>".to_string(),
                cause,
            })
    }

    /// Fetches the image behind `locator`, runs the acquisition ladder on it,
    /// and generates its depth map.
    pub async fn depth_for_locator(&self, locator: &str) -> Result<DepthMap, DepthError> {
        let image = self
            .fetcher
            .fetch(locator, CredentialMode::Anonymous)
            .await
            .map_err(|cause| DepthError::Fetch {
                source: locator.to_string(),
                mode: CredentialMode::Anonymous,
                cause,
            })?;
        let readable = acquisition::ensure_readable(image.as_ref(), self.fetcher.as_ref()).await?;
        let backend = self.backend().await?;
        backend
            .estimate(&readable.pixels)
            .await
            .map_err(|cause| DepthError::DepthComputation {
                source: locator.to_string(),
                cause,
            })
    }

    /// Returns the cached 2D+Z composite for `image`, computing and caching
    /// it on first request.
    ///
    /// `Err(ImageUnusable)` when no acquisition strategy yields readable
    /// pixels and `Err(BackendLoad)` when the backend cannot be constructed;
    /// both are retried by later calls. A failure *after* that — the depth
    /// computation or the encode — yields `Ok(None)`: it is logged, nothing
    /// is cached, and the next call for the same source retries.
    pub async fn composite_for(
        &self,
        image: &dyn ImageSource,
    ) -> Result<Option<Arc<CompositeImage>>, DepthError> {
        let source = image.locator().to_string();
        if let Some(hit) = self.composites.peek(&source) {
            return Ok(Some(hit));
        }

        let readable = acquisition::ensure_readable(image, self.fetcher.as_ref()).await?;
        let backend = self.backend().await?;

        let key = source.clone();
        let result = self
            .composites
            .get_or_compute(&source, move || {
                async move {
                    let depth = backend.estimate(&readable.pixels).await.map_err(|cause| {
                        DepthError::DepthComputation { source: key, cause }
                    })?;
                    compositor::encode_composite(&readable.pixels, &depth)
                }
                .boxed()
            })
            .await;

        match result {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                warn!(%source, error = %err, "composite generation failed, returning absent result");
                Ok(None)
            }
        }
    }

    /// Encodes just the depth visualization for pixels the caller holds.
    pub async fn depth_panel_for_pixels(&self, pixels: &RgbaImage) -> Result<Vec<u8>, DepthError> {
        let depth = self.depth_for_pixels(pixels).await?;
        compositor::encode_depth_only(&depth)
    }

    /// Overall model-load progress, 0–100; `None` when undefined.
    pub fn overall_load_progress(&self) -> Option<f32> {
        self.loader.overall_progress()
    }

    /// Live per-file progress entries for the load in flight.
    pub fn progress_entries(&self) -> Vec<ProgressEvent> {
        self.loader.progress_entries()
    }

    /// True while a backend load is in flight.
    pub fn loading(&self) -> bool {
        self.loader.loading()
    }

    /// True once at least one backend has been loaded.
    pub fn models_loaded(&self) -> bool {
        self.loader.loaded_count() > 0
    }

    /// Number of composites cached so far.
    pub fn cached_composites(&self) -> usize {
        self.composites.len()
    }

    /// State-change signal: the revision bumps whenever load progress, the
    /// loading flag, or completion state changes. Consumers read the live
    /// accessors after a change; no payload is pushed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.loader.subscribe()
    }
}
