use std::fmt;
use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::engine::DetectedFace;
use crate::errors::{SessionError, SessionResult};

pub const DEFAULT_DISPLAY_MAX_DIMENSION: u32 = 1270;

const JPEG_QUALITY: u8 = 90;
const BOX_COLOR: Rgb<u8> = Rgb([0, 242, 255]);
const BOX_THICKNESS: u32 = 2;
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_RADIUS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            _ => None,
        }
    }
}

/// Opaque encoded image. Travels as a `data:` URL wherever it is serialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EncodedImage {
    format: ImageFormat,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(format: ImageFormat, bytes: Vec<u8>) -> Self {
        Self { format, bytes }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime(),
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn from_data_url(url: &str) -> SessionResult<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| SessionError::Validation("image is not a data URL".into()))?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| SessionError::Validation("data URL is not base64 encoded".into()))?;
        let format = ImageFormat::from_mime(mime)
            .ok_or_else(|| SessionError::Validation(format!("unsupported image type {mime}")))?;
        let bytes = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| SessionError::Validation(format!("invalid base64 payload: {err}")))?;
        Ok(Self { format, bytes })
    }

    pub fn decode(&self) -> SessionResult<RgbImage> {
        image::load_from_memory(&self.bytes)
            .map(|img| img.to_rgb8())
            .map_err(|err| SessionError::Detection(format!("failed to decode image: {err}")))
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl From<EncodedImage> for String {
    fn from(image: EncodedImage) -> Self {
        image.to_data_url()
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_data_url(&value)
    }
}

/// Output of one successful detection call. `raw_image` is what gets enrolled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedFrame {
    pub display_image: EncodedImage,
    pub raw_image: EncodedImage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationSample {
    pub similarity_score: f64,
    pub stream_image: Option<EncodedImage>,
}

/// Shrinks `image` so its longest side is at most `max_dimension`. Never upscales.
pub fn downscale(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_dimension == 0 || longest <= max_dimension {
        return image.clone();
    }
    let ratio = f64::from(max_dimension) / f64::from(longest);
    let new_width = ((f64::from(width) * ratio).round() as u32).max(1);
    let new_height = ((f64::from(height) * ratio).round() as u32).max(1);
    imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

pub fn annotate(image: &mut RgbImage, face: &DetectedFace) {
    let bbox = &face.bounding_box;
    for offset in 0..i64::from(BOX_THICKNESS) {
        let (left, top) = (bbox.left + offset, bbox.top + offset);
        let (right, bottom) = (bbox.right - offset, bbox.bottom - offset);
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            put_pixel(image, x, top, BOX_COLOR);
            put_pixel(image, x, bottom, BOX_COLOR);
        }
        for y in top..=bottom {
            put_pixel(image, left, y, BOX_COLOR);
            put_pixel(image, right, y, BOX_COLOR);
        }
    }

    for &(cx, cy) in &face.landmarks {
        for dy in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
            for dx in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
                if dx * dx + dy * dy <= LANDMARK_RADIUS * LANDMARK_RADIUS {
                    put_pixel(image, cx + dx, cy + dy, LANDMARK_COLOR);
                }
            }
        }
    }
}

fn put_pixel(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

pub fn encode_jpeg(image: &RgbImage) -> SessionResult<EncodedImage> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|err| SessionError::Detection(format!("failed to encode JPEG frame: {err}")))?;
    Ok(EncodedImage::new(ImageFormat::Jpeg, buffer))
}

pub fn encode_png(image: &RgbImage) -> SessionResult<EncodedImage> {
    let mut cursor = Cursor::new(Vec::new());
    PngEncoder::new(&mut cursor)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|err| SessionError::Detection(format!("failed to encode PNG frame: {err}")))?;
    Ok(EncodedImage::new(ImageFormat::Png, cursor.into_inner()))
}
