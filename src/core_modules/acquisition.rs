// THEORY:
// The `acquisition` module exists because the hosting environment silently
// "taints" drawing surfaces built from cross-origin images: the image renders
// fine but its pixels cannot be read back, and the credential mode that would
// have avoided the taint is not knowable in advance. So instead of guessing,
// we climb a fixed ladder of strategies — use the image as-is, re-fetch it
// anonymously, re-fetch it with credentials — and accept the first rung that
// yields readable pixels for the *same* resource. A re-fetched image whose
// dimensions differ from the original signals that a different resource was
// served (e.g. a redirect), so it is rejected even if readable.
//
// Each rung is independent and idempotent; a failed rung is logged and the
// next one is tried. Only when every rung fails does the caller see
// `ImageUnusable`.

use async_trait::async_trait;
use image::RgbaImage;
use tracing::debug;

use crate::error::{DepthError, ExternalError};

/// Credential mode for a re-fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// Fetch without credentials.
    Anonymous,
    /// Fetch with credentials included.
    Include,
}

/// Raised by `ImageSource::try_read_pixels` when the environment refuses to
/// hand back pixel data (a tainted surface).
#[derive(Debug, Clone)]
pub struct TaintedPixels {
    pub source: String,
}

/// A decoded image handle owned by the platform. May or may not be
/// pixel-readable; `try_read_pixels` is the probe.
pub trait ImageSource: Send + Sync {
    /// The resolved source locator; doubles as the cache key identity.
    fn locator(&self) -> &str;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Attempts to read the image's pixels. Fails when the surface is
    /// tainted by cross-origin restrictions.
    fn try_read_pixels(&self) -> Result<RgbaImage, TaintedPixels>;
}

/// Platform fetch capability: resolve a locator into a decoded image using a
/// given credential mode. Failures surface as the platform's own boxed error.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(
        &self,
        locator: &str,
        mode: CredentialMode,
    ) -> Result<Box<dyn ImageSource>, ExternalError>;
}

/// An image that is pixel-readable by construction — the only image type the
/// rest of the pipeline ever touches.
#[derive(Debug, Clone)]
pub struct ReadableImage {
    pub source: String,
    pub pixels: RgbaImage,
}

impl ReadableImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Climbs the acquisition ladder until one strategy yields a readable copy of
/// `image`, or fails with `ImageUnusable` naming the source.
pub async fn ensure_readable(
    image: &dyn ImageSource,
    fetcher: &dyn ImageFetcher,
) -> Result<ReadableImage, DepthError> {
    let source = image.locator().to_string();
    if source.is_empty() || image.width() == 0 || image.height() == 0 {
        return Err(DepthError::ImageUnusable { locator: source });
    }

    // Rung 1: the image may already be readable; no network involved.
    match image.try_read_pixels() {
        Ok(pixels) => return Ok(ReadableImage { source, pixels }),
        Err(_) => debug!(%source, "direct pixel read failed, image is tainted"),
    }

    for mode in [CredentialMode::Anonymous, CredentialMode::Include] {
        if let Some(readable) = refetch_attempt(image, fetcher, mode).await {
            return Ok(readable);
        }
    }

    Err(DepthError::ImageUnusable { locator: source })
}

/// One re-fetch rung. Accepts the candidate only if its dimensions match the
/// original and its pixels are readable; anything else moves to the next rung.
async fn refetch_attempt(
    original: &dyn ImageSource,
    fetcher: &dyn ImageFetcher,
    mode: CredentialMode,
) -> Option<ReadableImage> {
    let source = original.locator();
    let candidate = match fetcher.fetch(source, mode).await {
        Ok(candidate) => candidate,
        Err(err) => {
            debug!(%source, ?mode, error = %err, "re-fetch failed");
            return None;
        }
    };
    if candidate.width() != original.width() || candidate.height() != original.height() {
        debug!(
            %source,
            ?mode,
            got_width = candidate.width(),
            got_height = candidate.height(),
            "re-fetched image dimensions differ from the original, rejecting"
        );
        return None;
    }
    match candidate.try_read_pixels() {
        Ok(pixels) => {
            debug!(%source, ?mode, "re-fetch produced a readable copy");
            Some(ReadableImage {
                source: source.to_string(),
                pixels,
            })
        }
        Err(_) => {
            debug!(%source, ?mode, "re-fetched image is still tainted");
            None
        }
    }
}
