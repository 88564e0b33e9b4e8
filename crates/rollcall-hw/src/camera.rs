//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError, DARK_FRAME_RATIO};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    CaptureNotSupported,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel formats the capture path can turn into grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y channel is kept.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Motion-JPEG; each buffer is a full JPEG image.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device (e.g., "/dev/video0") and negotiate 640×480.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::CaptureNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        // Drivers may substitute another format; accept any we can convert.
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV, GREY or MJPG)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Start a memory-mapped capture stream.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("create mmap stream: {e}")))?;
        Ok(FrameStream {
            camera: self,
            stream,
        })
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CameraError> {
        match self.pixel_format {
            PixelFormat::Yuyv => Ok((
                frame::yuyv_to_grayscale(buf, self.width, self.height)?,
                self.width,
                self.height,
            )),
            PixelFormat::Grey => Ok((
                frame::grey_to_grayscale(buf, self.width, self.height)?,
                self.width,
                self.height,
            )),
            PixelFormat::Mjpg => {
                let image = frame::mjpeg_to_grayscale(buf)?;
                let (w, h) = image.dimensions();
                Ok((image.into_raw(), w, h))
            }
        }
    }

    /// List V4L2 video capture devices among /dev/video0..15.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

/// An active capture stream borrowing its [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Dequeue the next frame, converted to grayscale and tagged if dark.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue buffer: {e}")))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let sequence = meta.sequence;

        let (data, width, height) = self.camera.to_grayscale(&buf[..used])?;
        let is_dark = frame::is_dark_frame(&data, DARK_FRAME_RATIO);

        Ok(Frame {
            data,
            width,
            height,
            sequence,
            is_dark,
        })
    }

    /// Next frame that is not dark, trying at most `max_attempts` buffers.
    pub fn next_lit_frame(&mut self, max_attempts: usize) -> Result<Option<Frame>, CameraError> {
        for _ in 0..max_attempts {
            let frame = self.next_frame()?;
            if !frame.is_dark {
                return Ok(Some(frame));
            }
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
        }
        Ok(None)
    }

    /// Drop frames while auto exposure settles.
    pub fn discard(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.next_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
    }
}
