//! Image encoding: `DynamicImage` → base64 PNG data URI.
//!
//! Both backends accept images as data URIs inside the JSON request body: the
//! chat-completion endpoint as an `image_url` part, the prediction endpoint as
//! a file input. PNG is lossless, which matters far more than payload size
//! when the model has to read small print.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page image ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// `data:image/png;base64,…`
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
}

/// Encode an image as a PNG data URI.
pub fn encode_png(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    Ok(EncodedImage {
        data_uri: png_data_uri(img)?,
        width: img.width(),
        height: img.height(),
    })
}

/// PNG-encode and base64-wrap an image.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(format!("data:image/png;base64,{b64}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 6, Rgb([255, 0, 0])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!((data.width, data.height), (10, 6));

        let b64 = data
            .data_uri
            .strip_prefix("data:image/png;base64,")
            .expect("data URI prefix");
        let decoded = STANDARD.decode(b64).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
