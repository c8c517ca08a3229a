//! Screenshot decode, crop and lossless encode.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder as _, ImageError, RgbaImage, imageops, load_from_memory};
use std::fmt::{Display, Formatter};
use std::fs::{read, rename, write};
use std::io;
use std::path::Path;

/// Origin-anchored crop size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub width: u32,
    pub height: u32,
}

/// Failure of one capture attempt.
#[derive(Debug)]
pub enum CaptureError {
    /// The screenshot payload could not be decoded.
    Decode(String),
    /// The screenshot is smaller than the crop rectangle.
    TooSmall {
        actual: (u32, u32),
        wanted: (u32, u32),
    },
    Encode(String),
    Io(io::Error),
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "malformed capture: {msg}"),
            Self::TooSmall { actual, wanted } => write!(
                f,
                "capture is {}x{}, smaller than the {}x{} baseline",
                actual.0, actual.1, wanted.0, wanted.1
            ),
            Self::Encode(msg) => write!(f, "PNG encode failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Decode a raw screenshot into RGBA pixels.
///
/// # Errors
///
/// Returns [`CaptureError::Decode`] if the payload is not a supported image.
pub fn decode(raw: &[u8]) -> Result<RgbaImage, CaptureError> {
    load_from_memory(raw)
        .map(|img| img.to_rgba8())
        .map_err(|err| CaptureError::Decode(err.to_string()))
}

/// Crop `img` to `rect`, anchored at the origin.
///
/// # Errors
///
/// Returns [`CaptureError::TooSmall`] if the image does not cover the rectangle.
pub fn crop(mut img: RgbaImage, rect: CropRect) -> Result<RgbaImage, CaptureError> {
    if img.width() < rect.width || img.height() < rect.height {
        return Err(CaptureError::TooSmall {
            actual: (img.width(), img.height()),
            wanted: (rect.width, rect.height),
        });
    }
    if img.width() == rect.width && img.height() == rect.height {
        return Ok(img);
    }
    Ok(imageops::crop(&mut img, 0, 0, rect.width, rect.height).to_image())
}

/// Encode RGBA pixels as PNG.
///
/// Filtering is off and the compression level fixed, so the same pixels
/// always produce the same bytes.
///
/// # Errors
///
/// Returns [`CaptureError::Encode`] if the encoder rejects the buffer.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buf, CompressionType::Default, FilterType::NoFilter);
    encoder
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|err| CaptureError::Encode(err.to_string()))?;
    Ok(buf)
}

/// Write bytes next to `path` and rename them into place.
///
/// # Errors
///
/// Returns an error if either file operation fails.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    write(&tmp, bytes)?;
    rename(&tmp, path)
}

/// Decode `raw`, crop it to `rect` and write the PNG to `path`.
///
/// # Errors
///
/// Returns an error if decoding, cropping, encoding or writing fails.
pub fn capture_to_file(raw: &[u8], rect: CropRect, path: &Path) -> Result<(), CaptureError> {
    let cropped = crop(decode(raw)?, rect)?;
    let png = encode_png(&cropped)?;
    write_atomically(path, &png)?;
    Ok(())
}

/// Dimensions of an image file, read from its header.
///
/// # Errors
///
/// Returns an error if the file is missing or not a supported image.
pub fn image_dimensions(path: &Path) -> Result<CropRect, CaptureError> {
    let (width, height) = image::image_dimensions(path).map_err(|err| match err {
        ImageError::IoError(io_err) => CaptureError::Io(io_err),
        other => CaptureError::Decode(other.to_string()),
    })?;
    Ok(CropRect { width, height })
}

/// Base64 of an encoded image file, for logs where the file will not survive.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn encode_diagnostic(path: &Path) -> io::Result<String> {
    Ok(BASE64_STANDARD.encode(read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |px, py| {
            Rgba([(px * 7) as u8, (py * 11) as u8, ((px + py) * 3) as u8, 255])
        })
    }

    #[test]
    fn crop_is_origin_anchored() -> Result<(), CaptureError> {
        let img = gradient(20, 10);
        let cropped = crop(img.clone(), CropRect { width: 8, height: 4 })?;
        assert_eq!(cropped.dimensions(), (8, 4));
        assert_eq!(cropped.get_pixel(7, 3), img.get_pixel(7, 3));
        assert_eq!(cropped.get_pixel(0, 0), img.get_pixel(0, 0));
        Ok(())
    }

    #[test]
    fn crop_rejects_small_capture() {
        let result = crop(gradient(5, 5), CropRect { width: 6, height: 5 });
        assert!(matches!(result, Err(CaptureError::TooSmall { .. })));
    }

    #[test]
    fn encoding_is_byte_stable() -> Result<(), CaptureError> {
        let img = gradient(16, 16);
        let first = encode_png(&img)?;
        let second = encode_png(&decode(&first)?)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode(b"not a png"), Err(CaptureError::Decode(_))));
    }

    #[test]
    fn capture_file_and_diagnostic() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("case.png");
        let raw = encode_png(&gradient(30, 30))?;
        capture_to_file(&raw, CropRect { width: 12, height: 9 }, &path)?;

        assert_eq!(image_dimensions(&path)?, CropRect { width: 12, height: 9 });
        let encoded = encode_diagnostic(&path)?;
        assert_eq!(BASE64_STANDARD.decode(encoded)?, read(&path)?);
        Ok(())
    }
}
