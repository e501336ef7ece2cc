//! Rasterisation: PDF pages and image files → [`PageImage`].
//!
//! All methods here are blocking. pdfium is CPU-bound and keeps internal
//! state, so the orchestrator calls the [`Rasterizer`] from
//! `tokio::task::spawn_blocking`, never from a runtime worker.

use crate::error::OcrError;
use image::{imageops::FilterType, DynamicImage};
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Pages rendered larger than this on either side fall back to 72 DPI.
pub const MAX_RENDER_SIDE: u32 = 4500;

/// One rasterised page.
///
/// `original` is the page as loaded or rendered: cell boxes, the layout
/// preview and picture crops are all in its pixels. `upsampled`, when set,
/// is what gets sent to the model instead.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub original: DynamicImage,
    pub upsampled: Option<DynamicImage>,
}

impl PageImage {
    /// The image to encode for the model.
    pub fn to_send(&self) -> &DynamicImage {
        self.upsampled.as_ref().unwrap_or(&self.original)
    }
}

impl From<DynamicImage> for PageImage {
    fn from(original: DynamicImage) -> Self {
        Self {
            original,
            upsampled: None,
        }
    }
}

/// Turns input files into page images.
///
/// Implement this to plug in another PDF engine, or to feed fixed images in
/// tests.
pub trait Rasterizer: Send + Sync {
    /// Render every page of a PDF at `dpi`, in page order.
    fn render_pdf(
        &self,
        path: &Path,
        dpi: u32,
        fitz_preprocess: bool,
    ) -> Result<Vec<PageImage>, OcrError>;

    /// Load a raster image as RGB. With `fitz_preprocess`, also provide a
    /// copy upsampled to `dpi` for the model.
    fn load_image(
        &self,
        path: &Path,
        dpi: u32,
        fitz_preprocess: bool,
    ) -> Result<PageImage, OcrError>;
}

// pdfium allows one set of library bindings per process.
static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

fn pdfium() -> Result<&'static Pdfium, OcrError> {
    PDFIUM.get_or_try_init(|| {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| OcrError::PdfiumBindingFailed(format!("{e:?}")))?;
        debug!("Bound pdfium library");
        Ok(Pdfium::new(bindings))
    })
}

/// Default rasterizer backed by pdfium-render and the `image` crate.
///
/// pdfium is bound on first PDF; image-only workloads never load it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn render_pdf(
        &self,
        path: &Path,
        dpi: u32,
        _fitz_preprocess: bool,
    ) -> Result<Vec<PageImage>, OcrError> {
        let pdfium = pdfium()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let scale = dpi as f32 / 72.0;
        let mut images: Vec<PageImage> = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let render = |factor: f32| {
                page.render_with_config(&PdfRenderConfig::new().scale_page_by_factor(factor))
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| OcrError::RasterisationFailed {
                        page: idx,
                        detail: format!("{e:?}"),
                    })
            };

            let mut image = render(scale)?;
            if image.width() > MAX_RENDER_SIDE || image.height() > MAX_RENDER_SIDE {
                warn!(
                    "Page {} is {}x{} px at {} DPI, re-rendering at 72 DPI",
                    idx,
                    image.width(),
                    image.height(),
                    dpi
                );
                image = render(1.0)?;
            }
            debug!("Rendered page {} → {}x{} px", idx, image.width(), image.height());
            images.push(DynamicImage::ImageRgb8(image.to_rgb8()).into());
        }

        Ok(images)
    }

    fn load_image(
        &self,
        path: &Path,
        dpi: u32,
        fitz_preprocess: bool,
    ) -> Result<PageImage, OcrError> {
        let image = image::open(path).map_err(|e| OcrError::ImageDecode {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let image = DynamicImage::ImageRgb8(image.to_rgb8());
        debug!("Loaded image {}x{} px", image.width(), image.height());

        let upsampled = fitz_preprocess.then(|| upsample_to_dpi(&image, dpi));
        Ok(PageImage {
            original: image,
            upsampled,
        })
    }
}

/// Scale an image by `dpi / 72` as if it were a 72 DPI page.
///
/// Returns the image unchanged when either scaled side would exceed
/// [`MAX_RENDER_SIDE`].
pub fn upsample_to_dpi(image: &DynamicImage, dpi: u32) -> DynamicImage {
    let scale = dpi as f64 / 72.0;
    let w = (image.width() as f64 * scale).round() as u32;
    let h = (image.height() as f64 * scale).round() as u32;
    if w > MAX_RENDER_SIDE || h > MAX_RENDER_SIDE || (w, h) == (image.width(), image.height()) {
        return image.clone();
    }
    image.resize_exact(w, h, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn pdfium_binding_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pdfium>();
        assert_send_sync::<OnceCell<Pdfium>>();
        assert_send_sync::<PdfiumRasterizer>();
    }

    #[test]
    fn upsample_scales_by_dpi() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(72, 36, Rgb([9, 9, 9])));
        let out = upsample_to_dpi(&img, 144);
        assert_eq!((out.width(), out.height()), (144, 72));
    }

    #[test]
    fn upsample_skips_oversized_result() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2000, 100));
        let out = upsample_to_dpi(&img, 200);
        assert_eq!((out.width(), out.height()), (2000, 100));
    }

    #[test]
    fn load_image_converts_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(20, 10, image::Luma([128]))
            .save(&path)
            .unwrap();

        let page = PdfiumRasterizer::new().load_image(&path, 200, false).unwrap();
        assert!(matches!(page.original, DynamicImage::ImageRgb8(_)));
        assert_eq!((page.original.width(), page.original.height()), (20, 10));
        assert!(page.upsampled.is_none());
    }

    #[test]
    fn fitz_preprocess_keeps_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        RgbImage::from_pixel(72, 36, Rgb([1, 2, 3])).save(&path).unwrap();

        let page = PdfiumRasterizer::new().load_image(&path, 144, true).unwrap();
        assert_eq!((page.original.width(), page.original.height()), (72, 36));
        let sent = page.to_send();
        assert_eq!((sent.width(), sent.height()), (144, 72));
    }

    #[test]
    fn load_image_reports_decode_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = PdfiumRasterizer::new().load_image(&path, 200, false).unwrap_err();
        assert!(matches!(err, OcrError::ImageDecode { .. }));
    }
}
