//! Raster decoding and resolution capping.
//!
//! Source bytes (a file or a `data:` URL) are decoded to RGBA8 and, if the
//! larger side exceeds `max_dim`, resampled down with a bicubic filter while
//! preserving the aspect ratio.

use crate::error::DecodeError;
use base64::Engine;
use image::imageops::FilterType;

/// Default cap on the larger image dimension
pub const DEFAULT_MAX_DIM: u32 = 2048;

/// Decoded RGBA8 raster, row-major
#[derive(Clone, Debug, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl RasterImage {
    /// Wrap an RGBA buffer, checking it matches the dimensions
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(DecodeError::BufferSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self { width, height, rgba })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Image decoding capability
pub trait Codec {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, DecodeError>;
}

/// Codec backed by the `image` crate
#[derive(Clone, Debug)]
pub struct ImageCodec {
    /// Maximum size of the larger dimension after decoding
    pub max_dim: u32,
    pub filter: FilterType,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            max_dim: DEFAULT_MAX_DIM,
            filter: FilterType::CatmullRom,
        }
    }
}

impl ImageCodec {
    pub fn with_max_dim(max_dim: u32) -> Self {
        Self {
            max_dim,
            ..Default::default()
        }
    }
}

impl Codec for ImageCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, DecodeError> {
        let payload = strip_data_url(bytes)?;
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let img = image::load_from_memory(&payload)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;
        let (src_w, src_h) = (img.width(), img.height());
        if src_w == 0 || src_h == 0 {
            return Err(DecodeError::Empty);
        }

        let rgba = match capped_dimensions(src_w, src_h, self.max_dim) {
            Some((w, h)) => {
                log::debug!("Downscaling {}x{} -> {}x{}", src_w, src_h, w, h);
                img.resize_exact(w, h, self.filter).to_rgba8()
            }
            None => img.to_rgba8(),
        };

        let (width, height) = rgba.dimensions();
        RasterImage::from_rgba(width, height, rgba.into_raw())
    }
}

/// Target size when the larger side exceeds `max_dim`, `None` if no scaling is needed
pub fn capped_dimensions(width: u32, height: u32, max_dim: u32) -> Option<(u32, u32)> {
    let larger = width.max(height);
    if max_dim == 0 || larger <= max_dim {
        return None;
    }
    let scale = max_dim as f64 / larger as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_dim);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_dim);
    Some((w, h))
}

/// Return the binary payload of a `data:` URL, or the input unchanged
fn strip_data_url(bytes: &[u8]) -> Result<std::borrow::Cow<'_, [u8]>, DecodeError> {
    if !bytes.starts_with(b"data:") {
        return Ok(std::borrow::Cow::Borrowed(bytes));
    }

    let comma = bytes
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| DecodeError::DataUrl("missing ',' separator".to_string()))?;
    let header = &bytes[..comma];
    let body = &bytes[comma + 1..];

    if !header.ends_with(b";base64") {
        return Err(DecodeError::DataUrl("only base64 data URLs are supported".to_string()));
    }

    let body: Vec<u8> = body.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map(std::borrow::Cow::Owned)
        .map_err(|e| DecodeError::DataUrl(e.to_string()))
}
