// THEORY:
// This file is the main entry point for the `parallax_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the
// public API that will be exposed to external consumers (host applications
// embedding the depth engine).
//
// The primary goal is to export the `DepthPipeline` and its associated data
// structures (`PipelineConfig`, `CompositeImage`, the trait seams for the
// external ML runtime and platform) as the clean, high-level interface for
// the entire engine. The coordination internals (`core_modules`) are
// encapsulated and re-exported selectively, providing a clean separation of
// concerns: a host binds the trait seams once, then only ever talks to the
// pipeline.

pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use core_modules::acquisition::{
    CredentialMode, ImageFetcher, ImageSource, ReadableImage, TaintedPixels, ensure_readable,
};
pub use core_modules::backend::{
    BackendFactory, BackendKey, BackendOptions, CapabilityProbe, DepthBackend, DepthMap,
    DevicePreference, Precision, ProgressSink,
};
pub use core_modules::compositor::CompositeImage;
pub use core_modules::loader::{BackendLoader, LoadSettings};
pub use core_modules::progress::{ProgressEvent, ProgressStatus, ProgressTracker};
pub use error::DepthError;
pub use pipeline::{DEFAULT_DEPTH_MODEL, DepthPipeline, PipelineConfig};
