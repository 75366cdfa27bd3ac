// THEORY:
// The `loader` module is the lifecycle manager for backend instances. A
// backend is expensive to construct (multi-file downloads, runtime warmup),
// so the loader guarantees at-most-one instance per resolved key for the
// process lifetime, and at-most-one construction in flight process-wide.
//
// Key architectural principles:
// 1.  **Resolve before identifying**: device and precision preferences are
//     downgraded against memoized hardware probes *before* the key is formed,
//     so callers whose different preferences collapse to the same effective
//     configuration share one backend.
// 2.  **One coarse limiter**: a single binary mutex guards all constructions,
//     even across distinct keys. Loading is resource-intensive and progress
//     reporting is not key-partitioned, so serializing everything keeps the
//     progress signal coherent; concurrent multi-model loads are not a
//     critical path for this system.
// 3.  **Double-checked publication**: callers that raced in re-check the
//     backend map after acquiring the limiter, so a lost race means adopting
//     the winner's instance, never rebuilding it.
// 4.  **Unconditional cleanup**: on every exit path — success or failure —
//     progress entries are cleared, the loading flag drops, and a state
//     change is broadcast. The limiter itself is released by RAII.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core_modules::backend::{
    BackendFactory, BackendKey, BackendOptions, CapabilityProbe, DepthBackend, DevicePreference,
    Precision,
};
use crate::core_modules::progress::{ProgressEvent, ProgressTracker};
use crate::error::DepthError;

/// Construction-time settings forwarded to the factory; all taken from the
/// pipeline configuration at the moment the load starts.
#[derive(Debug, Clone, Default)]
pub struct LoadSettings {
    pub remote_model_url: Option<String>,
    pub remote_runtime_url: Option<String>,
    pub use_platform_cache: bool,
}

/// Lazily constructs and memoizes backend instances keyed by resolved
/// (model, device, precision). Backends live for the process lifetime; there
/// is no eviction and no cancellation of an in-flight load.
pub struct BackendLoader {
    factory: Arc<dyn BackendFactory>,
    probe: Arc<dyn CapabilityProbe>,
    /// Published backends. Reads of already-published entries need only this
    /// map lock and a key lookup.
    backends: Mutex<HashMap<BackendKey, Arc<dyn DepthBackend>>>,
    /// Binary limiter: one construction in flight process-wide.
    load_limiter: tokio::sync::Mutex<()>,
    progress: Arc<Mutex<ProgressTracker>>,
    loading: AtomicBool,
    /// Memoized result of the accelerated-device probe.
    accelerated: tokio::sync::OnceCell<bool>,
    /// Memoized result of the half-precision probe.
    half_precision: tokio::sync::OnceCell<bool>,
    /// Revision counter broadcast on every observable state change. Consumers
    /// read the live accessors after a change; no payload is pushed.
    revision: watch::Sender<u64>,
}

impl BackendLoader {
    pub fn new(factory: Arc<dyn BackendFactory>, probe: Arc<dyn CapabilityProbe>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            factory,
            probe,
            backends: Mutex::new(HashMap::new()),
            load_limiter: tokio::sync::Mutex::new(()),
            progress: Arc::new(Mutex::new(ProgressTracker::new())),
            loading: AtomicBool::new(false),
            accelerated: tokio::sync::OnceCell::new(),
            half_precision: tokio::sync::OnceCell::new(),
            revision,
        }
    }

    /// Resolves caller preferences into the effective key: the device
    /// downgrades to `Standard` when no accelerated hardware is available,
    /// and precision downgrades to `Full` when half precision is unsupported.
    /// Each probe runs at most once per loader and is memoized.
    pub async fn resolve_key(
        &self,
        model_id: &str,
        device: DevicePreference,
        precision: Precision,
    ) -> BackendKey {
        let device = match device {
            DevicePreference::Accelerated if self.accelerated_available().await => {
                DevicePreference::Accelerated
            }
            _ => DevicePreference::Standard,
        };
        let precision = match precision {
            Precision::Half if self.half_precision_supported().await => Precision::Half,
            _ => Precision::Full,
        };
        BackendKey {
            model_id: model_id.to_string(),
            device,
            precision,
        }
    }

    /// Returns the backend for the resolved key, constructing it if this is
    /// the first request. Idempotent under concurrent calls with an identical
    /// effective key: exactly one construction runs and every caller receives
    /// the same instance. A load runs to completion or failure; there is no
    /// cancellation path.
    pub async fn acquire(
        &self,
        model_id: &str,
        device: DevicePreference,
        precision: Precision,
        settings: &LoadSettings,
    ) -> Result<Arc<dyn DepthBackend>, DepthError> {
        let key = self.resolve_key(model_id, device, precision).await;

        if let Some(backend) = self.backends.lock().unwrap().get(&key).cloned() {
            return Ok(backend);
        }

        let _guard = self.load_limiter.lock().await;
        // Absorb callers that raced in while we waited on the limiter.
        if let Some(backend) = self.backends.lock().unwrap().get(&key).cloned() {
            debug!(model = %key.model_id, "backend published while waiting, adopting it");
            return Ok(backend);
        }

        self.loading.store(true, Ordering::SeqCst);
        self.bump();
        info!(model = %key.model_id, device = ?key.device, precision = ?key.precision, "loading depth estimation backend");

        let progress = Arc::clone(&self.progress);
        let revision = self.revision.clone();
        let on_progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = Arc::new(move |event| {
            progress.lock().unwrap().on_event(event);
            revision.send_modify(|r| *r += 1);
        });
        let options = BackendOptions {
            device: key.device,
            precision: key.precision,
            remote_model_url: settings.remote_model_url.clone(),
            remote_runtime_url: settings.remote_runtime_url.clone(),
            use_platform_cache: settings.use_platform_cache,
            on_progress,
        };

        let result = self.factory.construct(&key.model_id, options).await;

        // Publication must precede the completion broadcast: a consumer woken
        // by the final state change reads the live accessors and has to
        // observe the loaded backend.
        let outcome = match result {
            Ok(backend) => {
                self.backends
                    .lock()
                    .unwrap()
                    .insert(key.clone(), Arc::clone(&backend));
                info!(model = %key.model_id, "backend loaded");
                Ok(backend)
            }
            Err(cause) => {
                warn!(model = %key.model_id, device = ?key.device, error = %cause, "backend load failed");
                Err(DepthError::BackendLoad {
                    model: key.model_id,
                    device: key.device,
                    source: cause,
                })
            }
        };

        // Cleanup runs on every exit path, before the limiter guard drops.
        self.progress.lock().unwrap().clear();
        self.loading.store(false, Ordering::SeqCst);
        self.bump();

        outcome
    }

    /// Overall load progress, 0–100; `None` when no file has reported a
    /// nonzero total (or no load is in flight).
    pub fn overall_progress(&self) -> Option<f32> {
        self.progress.lock().unwrap().overall()
    }

    /// Snapshot of the live per-file progress entries.
    pub fn progress_entries(&self) -> Vec<ProgressEvent> {
        self.progress.lock().unwrap().entries()
    }

    /// True while a backend construction is in flight.
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Number of distinct backends loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.backends.lock().unwrap().len()
    }

    /// Receiver for the state-change signal. The value is a bare revision
    /// counter; read the live accessors after a change notification.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn accelerated_available(&self) -> bool {
        *self
            .accelerated
            .get_or_init(|| self.probe.accelerated_available())
            .await
    }

    async fn half_precision_supported(&self) -> bool {
        *self
            .half_precision
            .get_or_init(|| self.probe.half_precision_supported())
            .await
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}
