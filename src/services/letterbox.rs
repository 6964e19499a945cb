//! Letterbox rendering: uniform scale into a target box, centered on black.

use image::{
    DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgb, RgbImage,
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
    metadata::Orientation,
};
use std::{
    io::{Cursor, Write},
    path::Path,
};

use crate::errors::{PipelineError, PipelineResult};

const JPEG_QUALITY: u8 = 95;

/// Where the scaled source lands on the target canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Width ≥ height counts as horizontal.
pub fn is_horizontal(width: u32, height: u32) -> bool {
    width >= height
}

/// Fit a `src_w × src_h` image inside `target_w × target_h` without cropping.
///
/// The side that limits the fit matches the target exactly; the other is
/// rounded, then clamped to `1..=target`.
pub fn letterbox_placement(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> Placement {
    let src_aspect = f64::from(src_w.max(1)) / f64::from(src_h.max(1));
    let target_aspect = f64::from(target_w) / f64::from(target_h.max(1));

    let (width, height) = if src_aspect > target_aspect {
        let height = (f64::from(target_w) / src_aspect).round() as u32;
        (target_w, height.clamp(1, target_h.max(1)))
    } else {
        let width = (f64::from(target_h) * src_aspect).round() as u32;
        (width.clamp(1, target_w.max(1)), target_h)
    };

    Placement {
        width,
        height,
        x: target_w.saturating_sub(width) / 2,
        y: target_h.saturating_sub(height) / 2,
    }
}

fn decode_error(name: &str) -> impl Fn(image::ImageError) -> PipelineError + '_ {
    move |err| PipelineError::Decode {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

fn open_decoder<'a>(
    name: &str,
    bytes: &'a [u8],
) -> PipelineResult<impl ImageDecoder + 'a> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .into_decoder()
        .map_err(decode_error(name))
}

/// `orientation` is the EXIF value recorded by the gallery; without one the
/// file's own EXIF tag applies.
fn resolve_orientation(stored: Option<u8>, decoder: &mut impl ImageDecoder) -> Orientation {
    stored
        .and_then(Orientation::from_exif)
        .unwrap_or_else(|| decoder.orientation().unwrap_or(Orientation::NoTransforms))
}

/// Display dimensions from the image header, without decoding pixels.
pub fn probe(name: &str, bytes: &[u8], orientation: Option<u8>) -> PipelineResult<(u32, u32)> {
    let mut decoder = open_decoder(name, bytes)?;
    let (width, height) = decoder.dimensions();
    Ok(match resolve_orientation(orientation, &mut decoder) {
        Orientation::Rotate90
        | Orientation::Rotate270
        | Orientation::Rotate90FlipH
        | Orientation::Rotate270FlipH => (height, width),
        _ => (width, height),
    })
}

/// Decode image bytes and rotate/flip them into display orientation.
pub fn decode(name: &str, bytes: &[u8], orientation: Option<u8>) -> PipelineResult<DynamicImage> {
    let mut decoder = open_decoder(name, bytes)?;
    let orientation = resolve_orientation(orientation, &mut decoder);
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error(name))?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Scale `image` into a black canvas of exactly `target_w × target_h`.
pub fn render(image: &DynamicImage, target_w: u32, target_h: u32) -> RgbImage {
    let placement = letterbox_placement(image.width(), image.height(), target_w, target_h);
    let scaled = image
        .resize_exact(placement.width, placement.height, FilterType::Lanczos3)
        .to_rgb8();

    let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb([0, 0, 0]));
    imageops::replace(
        &mut canvas,
        &scaled,
        i64::from(placement.x),
        i64::from(placement.y),
    );
    canvas
}

/// Output encoding follows the file extension; anything else becomes JPEG.
pub fn output_format(path: &Path) -> ImageFormat {
    match ImageFormat::from_path(path) {
        Ok(format @ (ImageFormat::Png | ImageFormat::WebP)) => format,
        _ => ImageFormat::Jpeg,
    }
}

pub fn encode<W: Write + std::io::Seek>(
    canvas: &RgbImage,
    format: ImageFormat,
    writer: &mut W,
) -> image::ImageResult<()> {
    match format {
        ImageFormat::Jpeg => {
            JpegEncoder::new_with_quality(writer, JPEG_QUALITY).encode_image(canvas)
        }
        other => canvas.write_to(writer, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn wide_source_in_square_box() {
        assert_eq!(
            letterbox_placement(4000, 2000, 1000, 1000),
            Placement {
                width: 1000,
                height: 500,
                x: 0,
                y: 250
            }
        );
    }

    #[test]
    fn tall_source_in_wide_box() {
        assert_eq!(
            letterbox_placement(2000, 4000, 1920, 1080),
            Placement {
                width: 540,
                height: 1080,
                x: 690,
                y: 0
            }
        );
    }

    #[test]
    fn orientation_classification() {
        assert!(is_horizontal(4000, 2000));
        assert!(is_horizontal(100, 100));
        assert!(!is_horizontal(2000, 4000));
    }

    #[test]
    fn placement_always_fits_and_keeps_aspect() {
        let sources = [(1, 1), (3, 7), (4000, 3000), (1080, 1920), (10_000, 3), (5, 999)];
        let targets = [(1, 1), (100, 100), (1920, 1080), (1080, 1920), (333, 77)];
        for &(sw, sh) in &sources {
            for &(tw, th) in &targets {
                let p = letterbox_placement(sw, sh, tw, th);
                assert!(p.width >= 1 && p.height >= 1);
                assert!(p.x + p.width <= tw && p.y + p.height <= th);
                assert!(p.width == tw || p.height == th);
                if p.width > 1 && p.height > 1 {
                    // Aspect holds within one pixel of rounding on the derived side.
                    let expected_h = f64::from(p.width) * f64::from(sh) / f64::from(sw);
                    let expected_w = f64::from(p.height) * f64::from(sw) / f64::from(sh);
                    assert!(
                        (expected_h - f64::from(p.height)).abs() <= 1.0
                            || (expected_w - f64::from(p.width)).abs() <= 1.0,
                        "{sw}x{sh} into {tw}x{th}: {p:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn render_has_exact_dimensions_and_black_bars() {
        let image = decode("wide.png", &png(400, 200), None).unwrap();
        let canvas = render(&image, 100, 100);
        assert_eq!(canvas.dimensions(), (100, 100));
        assert_eq!(canvas.get_pixel(50, 5), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(50, 94), &Rgb([0, 0, 0]));
        let inside = canvas.get_pixel(50, 50);
        assert!(inside[0] > 150 && inside[1] < 80);
    }

    #[test]
    fn stored_orientation_rotates_source() {
        let image = decode("rot.png", &png(40, 20), Some(6)).unwrap();
        assert_eq!((image.width(), image.height()), (20, 40));
        let unrotated = decode("plain.png", &png(40, 20), Some(1)).unwrap();
        assert_eq!((unrotated.width(), unrotated.height()), (40, 20));
    }

    #[test]
    fn probe_reports_display_dimensions() {
        assert_eq!(probe("a.png", &png(40, 20), None).unwrap(), (40, 20));
        assert_eq!(probe("a.png", &png(40, 20), Some(8)).unwrap(), (20, 40));
        assert_eq!(probe("a.png", &png(40, 20), Some(3)).unwrap(), (40, 20));
        assert!(probe("a.png", b"junk", None).is_err());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode("bad.jpg", b"not an image", None).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { ref name, .. } if name == "bad.jpg"));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(output_format(Path::new("a.PNG")), ImageFormat::Png);
        assert_eq!(output_format(Path::new("a.webp")), ImageFormat::WebP);
        assert_eq!(output_format(Path::new("a.jpeg")), ImageFormat::Jpeg);
        assert_eq!(output_format(Path::new("a.heic")), ImageFormat::Jpeg);
        assert_eq!(output_format(Path::new("asset-id")), ImageFormat::Jpeg);
    }

    #[test]
    fn encoded_jpeg_round_trips_dimensions() {
        let canvas = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        encode(&canvas, ImageFormat::Jpeg, &mut out).unwrap();
        let decoded = image::load_from_memory(out.get_ref()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }
}
