//! Image sizing: the model-side resize rule and the client-side pixel bounds.
//!
//! The server never feeds the model the image we send. It snaps both sides to
//! multiples of [`IMAGE_FACTOR`] and keeps the area within
//! [`MIN_PIXELS`]..=[`MAX_PIXELS`]. Boxes in the model's answer are in *that*
//! space, so the client recomputes the same dimensions to map them back.

use image::{imageops::FilterType, DynamicImage};
use thiserror::Error;

/// Side lengths are multiples of this.
pub const IMAGE_FACTOR: u32 = 28;

/// Smallest pixel count the model accepts (`4 * 28 * 28`).
pub const MIN_PIXELS: u32 = 3136;

/// Largest pixel count the model accepts (`11_289_600`).
pub const MAX_PIXELS: u32 = 11_289_600;

/// Maximum aspect ratio accepted by [`smart_resize`].
pub const MAX_RATIO: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResizeError {
    #[error("image has a zero dimension ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("aspect ratio of {width}x{height} exceeds 200")]
    AspectRatio { width: u32, height: u32 },
}

fn round_by_factor(x: f64, factor: u32) -> u32 {
    // Half-to-even, like the server.
    let q = x / factor as f64;
    let r = q.round();
    let r = if (q - q.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - 1.0
    } else {
        r
    };
    r as u32 * factor
}

fn floor_by_factor(x: f64, factor: u32) -> u32 {
    (x / factor as f64).floor() as u32 * factor
}

fn ceil_by_factor(x: f64, factor: u32) -> u32 {
    (x / factor as f64).ceil() as u32 * factor
}

/// Dimensions `(height, width)` the model will see for an image of
/// `height × width`.
///
/// 1. both sides round to the nearest multiple of 28 (at least 28);
/// 2. if the area exceeds `max_pixels`, shrink by `sqrt(h*w / max)` and floor;
/// 3. if the area is below `min_pixels`, grow by `sqrt(min / (h*w))` and ceil.
pub fn smart_resize(
    height: u32,
    width: u32,
    min_pixels: u32,
    max_pixels: u32,
) -> Result<(u32, u32), ResizeError> {
    if height == 0 || width == 0 {
        return Err(ResizeError::Empty { width, height });
    }
    let (h, w) = (height as f64, width as f64);
    if h.max(w) / h.min(w) > MAX_RATIO {
        return Err(ResizeError::AspectRatio { width, height });
    }

    let mut h_bar = round_by_factor(h, IMAGE_FACTOR).max(IMAGE_FACTOR);
    let mut w_bar = round_by_factor(w, IMAGE_FACTOR).max(IMAGE_FACTOR);

    if (h_bar as u64) * (w_bar as u64) > max_pixels as u64 {
        let beta = ((h * w) / max_pixels as f64).sqrt();
        h_bar = floor_by_factor(h / beta, IMAGE_FACTOR).max(IMAGE_FACTOR);
        w_bar = floor_by_factor(w / beta, IMAGE_FACTOR).max(IMAGE_FACTOR);
    } else if (h_bar as u64) * (w_bar as u64) < min_pixels as u64 {
        let beta = (min_pixels as f64 / (h * w)).sqrt();
        h_bar = ceil_by_factor(h * beta, IMAGE_FACTOR);
        w_bar = ceil_by_factor(w * beta, IMAGE_FACTOR);
    }
    Ok((h_bar, w_bar))
}

/// Apply the configured pixel bounds to the image that will be sent.
///
/// With neither bound set the image is returned untouched; otherwise it is
/// resized to its [`smart_resize`] dimensions.
pub fn fit_image(
    image: &DynamicImage,
    min_pixels: Option<u32>,
    max_pixels: Option<u32>,
) -> Result<DynamicImage, ResizeError> {
    if min_pixels.is_none() && max_pixels.is_none() {
        return Ok(image.clone());
    }
    let (h, w) = smart_resize(
        image.height(),
        image.width(),
        min_pixels.unwrap_or(MIN_PIXELS),
        max_pixels.unwrap_or(MAX_PIXELS),
    )?;
    if (w, h) == (image.width(), image.height()) {
        return Ok(image.clone());
    }
    Ok(image.resize_exact(w, h, FilterType::Lanczos3))
}

/// Project a box from original-image pixels into model-input pixels.
pub fn project_to_model(
    bbox: [u32; 4],
    image_width: u32,
    image_height: u32,
    model_width: u32,
    model_height: u32,
) -> [u32; 4] {
    let sx = model_width as f64 / image_width as f64;
    let sy = model_height as f64 / image_height as f64;
    [
        (bbox[0] as f64 * sx) as u32,
        (bbox[1] as f64 * sy) as u32,
        (bbox[2] as f64 * sx) as u32,
        (bbox[3] as f64 * sy) as u32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn rounds_to_factor() {
        // 100 / 28 = 3.57 → 4 * 28
        assert_eq!(smart_resize(100, 100, MIN_PIXELS, MAX_PIXELS).unwrap(), (112, 112));
    }

    #[test]
    fn a4_at_200_dpi_is_within_bounds() {
        let (h, w) = smart_resize(2339, 1654, MIN_PIXELS, MAX_PIXELS).unwrap();
        assert_eq!((h, w), (2352, 1652));
        assert_eq!(h % IMAGE_FACTOR, 0);
        assert_eq!(w % IMAGE_FACTOR, 0);
    }

    #[test]
    fn shrinks_above_max_pixels() {
        let (h, w) = smart_resize(4000, 4000, MIN_PIXELS, 1_000_000).unwrap();
        assert!(h * w <= 1_000_000);
        assert_eq!(h % IMAGE_FACTOR, 0);
        assert_eq!((h, w), (980, 980));
    }

    #[test]
    fn grows_below_min_pixels() {
        let (h, w) = smart_resize(10, 10, MIN_PIXELS, MAX_PIXELS).unwrap();
        assert!(h * w >= MIN_PIXELS);
        assert_eq!(h % IMAGE_FACTOR, 0);
        assert_eq!(h, w);
    }

    #[test]
    fn rejects_extreme_aspect_ratio() {
        let err = smart_resize(1, 500, MIN_PIXELS, MAX_PIXELS).unwrap_err();
        assert!(matches!(err, ResizeError::AspectRatio { .. }));
    }

    #[test]
    fn rejects_empty_image() {
        assert!(smart_resize(0, 10, MIN_PIXELS, MAX_PIXELS).is_err());
    }

    #[test]
    fn fit_image_without_bounds_is_identity() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(123, 45));
        let out = fit_image(&img, None, None).unwrap();
        assert_eq!((out.width(), out.height()), (123, 45));
    }

    #[test]
    fn fit_image_with_bounds_snaps_to_factor() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(123, 45));
        let out = fit_image(&img, Some(MIN_PIXELS), None).unwrap();
        assert_eq!(out.width() % IMAGE_FACTOR, 0);
        assert_eq!(out.height() % IMAGE_FACTOR, 0);
    }

    #[test]
    fn projects_box_into_model_space() {
        assert_eq!(project_to_model([10, 20, 100, 200], 200, 400, 100, 100), [5, 5, 50, 50]);
    }
}
