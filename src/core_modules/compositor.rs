// THEORY:
// The `compositor` module turns a single-channel depth map into something a
// display surface can actually show: the gray value is replicated into each
// of red/green/blue with an opaque alpha, then laid out side by side with the
// original image on a canvas twice the source width. The output is explicitly
// two-paneled (2D left, Z right), never an overlay, and the depth panel is
// drawn at its native resolution — no resampling. The composed surface is
// encoded to lossless PNG and handed back as an in-memory artifact.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage, imageops};

use crate::core_modules::backend::DepthMap;
use crate::error::DepthError;

/// The encoded 2D+Z artifact. Shared as `Arc<CompositeImage>` by the cache;
/// the handle's resources are released when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct CompositeImage {
    pub width: u32,
    pub height: u32,
    /// Lossless PNG bytes of the composed two-panel surface.
    pub png: Vec<u8>,
}

/// Expands a 1-byte-per-pixel grayscale buffer into RGBA: each gray value g
/// becomes (g, g, g, 255), preserving byte order. Output length is 4x input.
pub fn expand_grayscale(grayscale: &[u8]) -> Vec<u8> {
    let mut rgba = vec![0u8; grayscale.len() * 4];
    for (gray, pixel) in grayscale.iter().zip(rgba.chunks_exact_mut(4)) {
        pixel[0] = *gray;
        pixel[1] = *gray;
        pixel[2] = *gray;
        pixel[3] = 255;
    }
    rgba
}

/// Composes the two-panel surface: original image on the left, expanded depth
/// visualization on the right at its native resolution.
///
/// A depth buffer whose length disagrees with its stated dimensions is
/// rejected as `MalformedDepthMap` — backend output is external and cannot be
/// assumed well-formed.
pub fn compose(source: &RgbaImage, depth: &DepthMap) -> Result<RgbaImage, DepthError> {
    let depth_panel = depth_to_rgba_image(depth)?;
    let mut canvas = RgbaImage::new(source.width() * 2, source.height());
    imageops::replace(&mut canvas, source, 0, 0);
    imageops::replace(&mut canvas, &depth_panel, i64::from(source.width()), 0);
    Ok(canvas)
}

/// Encodes a composed surface to lossless PNG bytes.
pub fn encode_png(surface: &RgbaImage) -> Result<Vec<u8>, DepthError> {
    let mut bytes = Vec::new();
    let encoder = PngEncoder::new(&mut bytes);
    encoder.write_image(
        surface.as_raw(),
        surface.width(),
        surface.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// Full encode step: expand, compose and encode into a `CompositeImage`.
pub fn encode_composite(source: &RgbaImage, depth: &DepthMap) -> Result<CompositeImage, DepthError> {
    let surface = compose(source, depth)?;
    let png = encode_png(&surface)?;
    Ok(CompositeImage {
        width: surface.width(),
        height: surface.height(),
        png,
    })
}

/// Encodes just the depth visualization, without the source panel.
pub fn encode_depth_only(depth: &DepthMap) -> Result<Vec<u8>, DepthError> {
    encode_png(&depth_to_rgba_image(depth)?)
}

fn depth_to_rgba_image(depth: &DepthMap) -> Result<RgbaImage, DepthError> {
    let malformed = DepthError::MalformedDepthMap {
        width: depth.width,
        height: depth.height,
        len: depth.data.len(),
    };
    let expected = depth.width as usize * depth.height as usize;
    if depth.data.len() != expected {
        return Err(malformed);
    }
    let rgba = expand_grayscale(&depth.data);
    RgbaImage::from_raw(depth.width, depth.height, rgba).ok_or(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn grayscale_expansion_is_per_pixel_and_opaque() {
        let expanded = expand_grayscale(&[0, 7, 255]);
        assert_eq!(
            expanded,
            vec![0, 0, 0, 255, 7, 7, 7, 255, 255, 255, 255, 255]
        );
    }

    #[test]
    fn expansion_output_length_is_width_times_height_times_4() {
        let depth = vec![128u8; 100 * 50];
        assert_eq!(expand_grayscale(&depth).len(), 100 * 50 * 4);
    }

    #[test]
    fn composed_surface_is_twice_the_source_width() {
        let source = RgbaImage::from_pixel(100, 50, Rgba([10, 20, 30, 255]));
        let depth = DepthMap {
            data: vec![200u8; 100 * 50],
            width: 100,
            height: 50,
        };

        let surface = compose(&source, &depth).expect("compose");
        assert_eq!(surface.width(), 200);
        assert_eq!(surface.height(), 50);

        // Left panel is the untouched original, right panel the expanded depth.
        assert_eq!(surface.get_pixel(40, 25), &Rgba([10, 20, 30, 255]));
        assert_eq!(surface.get_pixel(140, 25), &Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn depth_panel_is_never_resampled_to_the_source_size() {
        // Depth map at half the source resolution stays at its native size.
        let source = RgbaImage::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        let depth = DepthMap {
            data: vec![99u8; 50 * 25],
            width: 50,
            height: 25,
        };

        let surface = compose(&source, &depth).expect("compose");
        assert_eq!(surface.get_pixel(120, 10), &Rgba([99, 99, 99, 255]));
        // Beyond the native depth extent the canvas stays blank.
        assert_eq!(surface.get_pixel(160, 10), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn depth_buffer_disagreeing_with_its_dimensions_is_rejected() {
        let source = RgbaImage::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        let depth = DepthMap {
            data: vec![0u8; 10],
            width: 100,
            height: 50,
        };

        let err = compose(&source, &depth).expect_err("malformed");
        match err {
            DepthError::MalformedDepthMap { width, height, len } => {
                assert_eq!((width, height, len), (100, 50, 10));
            }
            other => panic!("expected MalformedDepthMap, got {other:?}"),
        }
    }

    #[test]
    fn encoded_composite_round_trips_through_png() {
        let source = RgbaImage::from_pixel(8, 4, Rgba([50, 60, 70, 255]));
        let depth = DepthMap {
            data: (0u8..32).collect(),
            width: 8,
            height: 4,
        };

        let composite = encode_composite(&source, &depth).expect("encode");
        assert_eq!(composite.width, 16);
        assert_eq!(composite.height, 4);

        let decoded = image::load_from_memory(&composite.png)
            .expect("decode")
            .to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([50, 60, 70, 255]));
        // First depth pixel is gray value 0 expanded to opaque black.
        assert_eq!(decoded.get_pixel(8, 0), &Rgba([0, 0, 0, 255]));
    }
}
