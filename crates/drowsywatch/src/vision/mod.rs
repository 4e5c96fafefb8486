//! Frame sources, face detectors and landmark predictors.
//!
//! Face detection and landmark prediction are provided by external models.
//! This module defines the seams they plug into and the backends that
//! implement them.

pub mod replay;

#[cfg(feature = "opencv")]
pub mod opencv_backend;

use std::sync::Arc;

use image::{GrayImage, RgbImage};

use crate::config::{CameraBackend, Config};
use crate::ear::Landmarks;
use crate::error::{Error, Result};

/// A captured frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number within the stream, starting at 0.
    pub index: u64,
    /// Pixels in RGB order.
    pub image: RgbImage,
}

impl Frame {
    /// Wrap an image as frame `index`.
    #[must_use]
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Luma conversion of this frame.
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

/// A detected face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FaceRect {
    /// Create a face rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Something that yields frames, such as a camera device.
///
/// `Ok(None)` signals the end of the stream; the caller stops reading and
/// drops the source, which releases the device.
pub trait FrameSource: Send {
    /// The name of this source (for logging).
    fn name(&self) -> &'static str;

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails. Callers treat this the same as
    /// the end of the stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Finds faces in a grayscale frame.
pub trait FaceDetector: Send {
    /// Detect face regions.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model fails.
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<FaceRect>>;
}

/// Maps a face region to 68 facial landmarks.
pub trait LandmarkPredictor: Send {
    /// Predict landmarks for one face.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails or yields the wrong number of points.
    fn predict(&mut self, gray: &GrayImage, face: &FaceRect) -> Result<Landmarks>;
}

/// Everything one video stream needs, opened together.
pub struct CaptureSession {
    /// Where frames come from.
    pub source: Box<dyn FrameSource>,
    /// Face detector for this stream.
    pub detector: Box<dyn FaceDetector>,
    /// Landmark predictor for this stream.
    pub predictor: Box<dyn LandmarkPredictor>,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("source", &self.source.name())
            .finish_non_exhaustive()
    }
}

/// Opens a fresh capture session for each stream request.
pub trait VisionBackend: Send + Sync + std::fmt::Debug {
    /// Backend name (for logging).
    fn name(&self) -> &'static str;

    /// Open the camera and models.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or a model cannot be opened.
    fn open(&self) -> Result<CaptureSession>;
}

/// Build the backend selected in `config`.
///
/// # Errors
///
/// Returns an error if the selected backend is missing required settings or
/// was not compiled in.
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn VisionBackend>> {
    match config.camera.backend {
        CameraBackend::Replay => {
            let dir = config.camera.replay_dir.clone().ok_or_else(|| {
                Error::config_validation("camera.replay_dir is required for the replay backend")
            })?;
            Ok(Arc::new(replay::ReplayBackend::new(dir)))
        }
        #[cfg(feature = "opencv")]
        CameraBackend::Opencv => Ok(Arc::new(opencv_backend::OpencvBackend::new(
            config.camera.index,
            config.camera.face_cascade.clone(),
            config.model.path.clone(),
        ))),
        #[cfg(not(feature = "opencv"))]
        CameraBackend::Opencv => Err(Error::config_validation(
            "camera backend 'opencv' requires building with the `opencv` feature",
        )),
    }
}
