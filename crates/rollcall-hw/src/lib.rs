//! rollcall-hw: webcam capture.
//!
//! V4L2 capture with YUYV, GREY and MJPG buffers converted to grayscale.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
