//! # Camera Frame Module
//!
//! Frame types shared between the vehicle and the operator, and the two
//! encodings frames leave the vehicle in: base64 JPEG `video_frame` events
//! for the message channel, and multipart JPEG parts for an HTTP byte
//! stream.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use image::{DynamicImage, GenericImageView, ImageResult};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Boundary marker used between parts of the multipart video stream.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// The Content-Type reported by the multipart stream.
///
/// The full stream header is `multipart/x-mixed-replace; boundary=frame`;
/// each part carries `image/jpeg`.
pub const MULTIPART_MIME_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A decoded frame held on the vehicle side.
#[derive(Clone)]
pub struct CamImage {
    /// UTC timestamp at which the frame was acquired
    pub timestamp: DateTime<Utc>,

    /// The image itself
    pub image: DynamicImage,
}

/// An encoded frame as it travels over the operator link.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CamFrame {
    /// UTC timestamp at which the frame was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Width of the frame in pixels
    pub width: u32,

    /// Height of the frame in pixels
    pub height: u32,

    /// JPEG image data, encoded in base64
    pub b64_data: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("Frame data is not valid base64: {0}")]
    Base64Error(base64::DecodeError),

    #[error("Frame data is not a valid JPEG: {0}")]
    ImageError(image::ImageError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamImage {
    /// Encode this image as JPEG bytes with the given quality (1-100).
    pub fn to_jpeg(&self, quality: u8) -> ImageResult<Vec<u8>> {
        let mut data = Vec::<u8>::new();
        self.image
            .write_to(&mut data, image::ImageOutputFormat::Jpeg(quality))?;
        Ok(data)
    }

    /// Convert this image into an encoded frame with the given JPEG quality.
    pub fn to_cam_frame(&self, quality: u8) -> ImageResult<CamFrame> {
        let (width, height) = self.image.dimensions();

        Ok(CamFrame {
            timestamp: self.timestamp,
            width,
            height,
            b64_data: base64::encode(self.to_jpeg(quality)?),
        })
    }
}

impl CamFrame {
    /// Decode this frame back into a camera image.
    pub fn to_cam_image(&self) -> Result<CamImage, FrameDecodeError> {
        let raw_data = base64::decode(&self.b64_data).map_err(FrameDecodeError::Base64Error)?;

        let image = image::load_from_memory_with_format(&raw_data, image::ImageFormat::Jpeg)
            .map_err(FrameDecodeError::ImageError)?;

        Ok(CamImage {
            timestamp: self.timestamp,
            image,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Write one JPEG part of the multipart video stream to the given sink.
///
/// Parts are framed as:
///
/// ```text
/// --frame\r\n
/// Content-Type: image/jpeg\r\n
/// \r\n
/// <jpeg bytes>\r\n
/// ```
pub fn write_multipart_part<W: Write>(sink: &mut W, jpeg: &[u8]) -> io::Result<()> {
    write!(sink, "--{}\r\n", MULTIPART_BOUNDARY)?;
    sink.write_all(b"Content-Type: image/jpeg\r\n\r\n")?;
    sink.write_all(jpeg)?;
    sink.write_all(b"\r\n")?;
    sink.flush()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
