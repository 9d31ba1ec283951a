//! V4L2 camera access for the local backend.

use std::path::PathBuf;

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::debug;
use v4l::buffer::Type;
use v4l::capability::{Capabilities, Flags as CapabilityFlags};
use v4l::format::{Format, FourCC};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use crate::errors::{SessionError, SessionResult};

const STREAM_BUFFERS: u32 = 4;

/// An opened camera that yields one RGB frame per call.
pub trait CameraSource: Send {
    fn grab(&mut self) -> SessionResult<RgbImage>;
}

/// Acquires the camera. Dropping the returned source releases it.
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> SessionResult<Box<dyn CameraSource>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLocator {
    Index(u32),
    Path(PathBuf),
}

impl DeviceLocator {
    pub fn from_option(device: Option<String>) -> Self {
        match device {
            Some(text) => {
                if let Ok(index) = text.parse::<u32>() {
                    DeviceLocator::Index(index)
                } else {
                    DeviceLocator::Path(PathBuf::from(text))
                }
            }
            None => DeviceLocator::Index(0),
        }
    }

    pub fn display(&self) -> String {
        match self {
            DeviceLocator::Index(i) => format!("/dev/video{i}"),
            DeviceLocator::Path(path) => path.display().to_string(),
        }
    }

    fn open(&self) -> SessionResult<v4l::Device> {
        let result = match self {
            DeviceLocator::Index(index) => v4l::Device::new(*index as usize),
            DeviceLocator::Path(path) => v4l::Device::with_path(path),
        };
        result.map_err(|err| {
            SessionError::Device(format!(
                "failed to open {} (it may be in use): {err}",
                self.display()
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub device: DeviceLocator,
    pub pixel_format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub warmup_frames: u32,
}

#[derive(Debug, Clone)]
pub struct V4lCameraOpener {
    config: CameraConfig,
}

impl V4lCameraOpener {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl CameraOpener for V4lCameraOpener {
    fn open(&self) -> SessionResult<Box<dyn CameraSource>> {
        Ok(Box::new(V4lCamera::open(&self.config)?))
    }
}

pub struct V4lCamera {
    // Declared before `_device` so streaming stops before the handle closes.
    stream: Stream<'static>,
    _device: v4l::Device,
    format: Format,
}

impl V4lCamera {
    pub fn open(config: &CameraConfig) -> SessionResult<Self> {
        let device = config.device.open()?;
        let label = config.device.display();
        let device_error =
            |err: std::io::Error| SessionError::Device(format!("{label}: {err}"));

        let caps = device.query_caps().map_err(device_error)?;
        ensure_capabilities(&caps).map_err(|reason| {
            SessionError::Device(format!("{label} lacks capture support: {reason}"))
        })?;
        debug!(target: "camera", device = %label, driver = %caps.driver, card = %caps.card, "opened");

        let fourcc = parse_fourcc(&config.pixel_format).ok_or_else(|| {
            SessionError::Device(format!("invalid pixel format '{}'", config.pixel_format))
        })?;
        let formats = device.enum_formats().map_err(device_error)?;
        if !formats.iter().any(|desc| desc.fourcc == fourcc) {
            return Err(SessionError::Device(format!(
                "{label} does not support pixel format {}",
                config.pixel_format
            )));
        }

        let mut format = device.format().map_err(device_error)?;
        format.fourcc = fourcc;
        if let Some(width) = config.width {
            format.width = width;
        }
        if let Some(height) = config.height {
            format.height = height;
        }
        let format = device.set_format(&format).map_err(device_error)?;
        debug!(
            target: "camera",
            pixel_format = %fourcc_to_string(format.fourcc),
            width = format.width,
            height = format.height,
            "negotiated format"
        );

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(device_error)?;
        for idx in 0..config.warmup_frames {
            stream.next().map_err(|err| {
                SessionError::Device(format!("failed to read warm-up frame {}: {err}", idx + 1))
            })?;
        }

        Ok(Self {
            stream,
            _device: device,
            format,
        })
    }
}

impl CameraSource for V4lCamera {
    fn grab(&mut self) -> SessionResult<RgbImage> {
        let (data, _) = self
            .stream
            .next()
            .map_err(|err| SessionError::Device(format!("failed to read frame: {err}")))?;
        convert_frame_to_image(data, &self.format)
    }
}

fn ensure_capabilities(caps: &Capabilities) -> Result<(), String> {
    let flags = caps.capabilities;
    let mut reasons = Vec::new();
    if !flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
        reasons.push("missing VIDEO_CAPTURE");
    }
    if !flags.intersects(CapabilityFlags::READ_WRITE | CapabilityFlags::STREAMING) {
        reasons.push("missing READ_WRITE or STREAMING");
    }
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(reasons.join(", "))
    }
}

fn parse_fourcc(code: &str) -> Option<FourCC> {
    if code.is_empty() || code.len() > 4 {
        return None;
    }
    let mut repr = [b' '; 4];
    for (i, byte) in code.as_bytes().iter().enumerate() {
        repr[i] = *byte;
    }
    Some(FourCC::new(&repr))
}

fn fourcc_to_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr)
        .trim_matches(|c| c == char::from(0) || c == ' ')
        .to_string()
}

pub fn convert_frame_to_image(data: &[u8], format: &Format) -> SessionResult<RgbImage> {
    let pixel_format = fourcc_to_string(format.fourcc);
    convert_raw(data, &pixel_format, format.width, format.height)
}

fn convert_raw(data: &[u8], pixel_format: &str, width: u32, height: u32) -> SessionResult<RgbImage> {
    let expected_pixels = width as usize * height as usize;
    let short_frame = |expected: usize| {
        SessionError::Detection(format!(
            "expected {expected} bytes for {pixel_format} frame, got {}",
            data.len()
        ))
    };
    let buffer_error = || SessionError::Detection("failed to build image buffer".into());

    match pixel_format {
        "Y16" => {
            if data.len() < expected_pixels * 2 {
                return Err(short_frame(expected_pixels * 2));
            }
            let luma = data[..expected_pixels * 2]
                .chunks_exact(2)
                .map(|pair| pair[1])
                .collect();
            let gray = GrayImage::from_vec(width, height, luma).ok_or_else(buffer_error)?;
            Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
        }
        "GREY" | "Y08" => {
            if data.len() < expected_pixels {
                return Err(short_frame(expected_pixels));
            }
            let gray = GrayImage::from_vec(width, height, data[..expected_pixels].to_vec())
                .ok_or_else(buffer_error)?;
            Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
        }
        "YUYV" => {
            let expected_bytes = expected_pixels * 2;
            if data.len() < expected_bytes || expected_pixels % 2 != 0 {
                return Err(short_frame(expected_bytes));
            }
            let mut rgb = Vec::with_capacity(expected_pixels * 3);
            for chunk in data[..expected_bytes].chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            RgbImage::from_vec(width, height, rgb).ok_or_else(buffer_error)
        }
        "MJPG" | "JPEG" => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|err| SessionError::Detection(format!("failed to decode MJPG frame: {err}"))),
        other => Err(SessionError::Device(format!(
            "unsupported conversion from pixel format {other}"
        ))),
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = f32::from(y) - 16.0;
    let d = f32::from(u) - 128.0;
    let e = f32::from(v) - 128.0;
    let clamp = |value: f32| value.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}
