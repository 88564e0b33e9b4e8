//! Captured frames and raw-buffer conversion to grayscale.

use image::GrayImage;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn into_image(self) -> Result<GrayImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        let actual = self.data.len();
        GrayImage::from_raw(self.width, self.height, self.data)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Keep the Y channel of packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per pixel pair).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Copy the first `width * height` bytes of a GREY buffer.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    grey.get(..expected)
        .map(<[u8]>::to_vec)
        .ok_or(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        })
}

/// Decode one MJPG frame and convert it to luma.
pub fn mjpeg_to_grayscale(jpeg: &[u8]) -> Result<GrayImage, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?;
    Ok(decoded.to_luma8())
}

/// True if more than `ratio` of the pixels are below 32.
pub fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > ratio
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
}
