//! `OpenCV` backend: live camera, Haar cascade faces, LBF facemark landmarks.

use std::path::PathBuf;

use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Point2f, Rect, Size, Vector},
    face, imgproc, objdetect,
    prelude::*,
    videoio,
};
use tracing::{info, warn};

use super::{CaptureSession, FaceDetector, FaceRect, Frame, FrameSource, LandmarkPredictor, VisionBackend};
use crate::ear::{Landmarks, Point};
use crate::error::{Error, Result};

const SOURCE_NAME: &str = "opencv";

/// Opens the camera, cascade and facemark model for each stream.
#[derive(Debug, Clone)]
pub struct OpencvBackend {
    index: i32,
    cascade: PathBuf,
    model: PathBuf,
}

impl OpencvBackend {
    /// Configure a backend for camera `index`.
    #[must_use]
    pub fn new(index: i32, cascade: PathBuf, model: PathBuf) -> Self {
        Self {
            index,
            cascade,
            model,
        }
    }
}

impl VisionBackend for OpencvBackend {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn open(&self) -> Result<CaptureSession> {
        let capture = videoio::VideoCapture::new(self.index, videoio::CAP_ANY)
            .map_err(|e| Error::camera(SOURCE_NAME, e.to_string()))?;
        if !capture
            .is_opened()
            .map_err(|e| Error::camera(SOURCE_NAME, e.to_string()))?
        {
            return Err(Error::camera(
                SOURCE_NAME,
                format!("unable to open camera {}", self.index),
            ));
        }

        let cascade_path = self.cascade.to_string_lossy();
        let cascade = objdetect::CascadeClassifier::new(&cascade_path)?;
        if cascade.empty()? {
            return Err(Error::vision(format!(
                "face cascade not loaded from {cascade_path}"
            )));
        }

        let mut facemark = face::create_facemark_lbf()?;
        facemark.load_model(&self.model.to_string_lossy())?;

        info!(index = self.index, "Opened camera");
        Ok(CaptureSession {
            source: Box::new(CameraSource {
                capture,
                next_index: 0,
            }),
            detector: Box::new(CascadeDetector { cascade }),
            predictor: Box::new(FacemarkPredictor { facemark }),
        })
    }
}

/// A `VideoCapture` device. Dropping it releases the camera.
pub struct CameraSource {
    capture: videoio::VideoCapture,
    next_index: u64,
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

fn bgr_to_rgb_image(frame: &Mat) -> Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let rgb = if rgb.is_continuous() { rgb } else { rgb.try_clone()? };

    let width = u32::try_from(rgb.cols()).map_err(|e| Error::vision(e.to_string()))?;
    let height = u32::try_from(rgb.rows()).map_err(|e| Error::vision(e.to_string()))?;
    RgbImage::from_raw(width, height, rgb.data_bytes()?.to_vec())
        .ok_or_else(|| Error::vision("frame buffer size does not match its dimensions"))
}

fn gray_to_mat(gray: &GrayImage) -> Result<Mat> {
    let rows = i32::try_from(gray.height()).map_err(|e| Error::vision(e.to_string()))?;
    let cols = i32::try_from(gray.width()).map_err(|e| Error::vision(e.to_string()))?;
    Ok(Mat::new_rows_cols_with_data(rows, cols, gray.as_raw())?.try_clone()?)
}

impl FrameSource for CameraSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .map_err(|e| Error::camera(SOURCE_NAME, e.to_string()))?;
        if !ok || frame.empty() {
            warn!("Camera returned no frame");
            return Ok(None);
        }

        let image = bgr_to_rgb_image(&frame)?;
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Haar cascade frontal face detector.
pub struct CascadeDetector {
    cascade: objdetect::CascadeClassifier,
}

impl std::fmt::Debug for CascadeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeDetector").finish_non_exhaustive()
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<FaceRect>> {
        let mat = gray_to_mat(gray)?;
        let mut faces = Vector::<Rect>::new();
        self.cascade.detect_multi_scale(
            &mat,
            &mut faces,
            1.1,
            3,
            0,
            Size::new(30, 30),
            Size::new(0, 0),
        )?;

        Ok(faces
            .iter()
            .filter_map(|r| {
                Some(FaceRect::new(
                    u32::try_from(r.x).ok()?,
                    u32::try_from(r.y).ok()?,
                    u32::try_from(r.width).ok()?,
                    u32::try_from(r.height).ok()?,
                ))
            })
            .collect())
    }
}

/// LBF facemark 68-point landmark predictor.
pub struct FacemarkPredictor {
    facemark: core::Ptr<face::FacemarkLBF>,
}

impl std::fmt::Debug for FacemarkPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacemarkPredictor").finish_non_exhaustive()
    }
}

fn to_cv_rect(face: &FaceRect) -> Result<Rect> {
    let convert = |v: u32| i32::try_from(v).map_err(|e| Error::vision(e.to_string()));
    Ok(Rect::new(
        convert(face.x)?,
        convert(face.y)?,
        convert(face.width)?,
        convert(face.height)?,
    ))
}

impl LandmarkPredictor for FacemarkPredictor {
    fn predict(&mut self, gray: &GrayImage, face: &FaceRect) -> Result<Landmarks> {
        let mat = gray_to_mat(gray)?;
        let faces = Vector::<Rect>::from_iter([to_cv_rect(face)?]);
        let mut shapes = Vector::<Vector<Point2f>>::new();

        if !self.facemark.fit(&mat, &faces, &mut shapes)? || shapes.is_empty() {
            return Err(Error::vision("facemark did not fit the face"));
        }

        let shape = shapes.get(0)?;
        Landmarks::new(
            shape
                .iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect(),
        )
    }
}
