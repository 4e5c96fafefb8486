//! Replay backend: still images with iBUG `.pts` landmark annotations.
//!
//! Frames are the image files of a directory, played once in file-name order.
//! A frame `frame_001.png` may carry a sidecar `frame_001.pts` holding the 68
//! landmarks of the face in it; frames without one have no face. The detector
//! reports the annotation's bounding box and the predictor returns its points,
//! so the rest of the pipeline runs exactly as it would on a live camera.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::GrayImage;
use tracing::{debug, info};

use super::{CaptureSession, FaceDetector, FaceRect, Frame, FrameSource, LandmarkPredictor, VisionBackend};
use crate::ear::{Landmarks, Point};
use crate::error::{Error, Result};

const SOURCE_NAME: &str = "replay";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Landmarks of the frame most recently read, shared within one session.
type Annotation = Arc<Mutex<Option<Landmarks>>>;

/// Parse the contents of an iBUG `.pts` file.
///
/// ```text
/// version: 1
/// n_points: 68
/// {
/// 123.4 56.7
/// ...
/// }
/// ```
///
/// # Errors
///
/// Returns a message describing the first malformed line.
pub fn parse_pts(text: &str) -> std::result::Result<Vec<Point>, String> {
    let mut declared: Option<usize> = None;
    let mut points = Vec::new();
    let mut in_body = false;
    let mut closed = false;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if in_body {
            if line == "}" {
                closed = true;
                break;
            }
            let mut parts = line.split_whitespace();
            let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(format!("line {}: expected 'x y'", lineno + 1));
            };
            let x = x
                .parse::<f64>()
                .map_err(|e| format!("line {}: bad x: {e}", lineno + 1))?;
            let y = y
                .parse::<f64>()
                .map_err(|e| format!("line {}: bad y: {e}", lineno + 1))?;
            points.push(Point::new(x, y));
        } else if line == "{" {
            in_body = true;
        } else if let Some(n) = line.strip_prefix("n_points:") {
            declared = Some(
                n.trim()
                    .parse()
                    .map_err(|e| format!("line {}: bad n_points: {e}", lineno + 1))?,
            );
        } else if !line.starts_with("version:") {
            return Err(format!("line {}: unexpected header '{line}'", lineno + 1));
        }
    }

    if !closed {
        return Err("missing closing '}'".to_string());
    }
    if let Some(n) = declared {
        if n != points.len() {
            return Err(format!("n_points is {n} but {} points follow", points.len()));
        }
    }
    Ok(points)
}

/// Read and validate a `.pts` sidecar.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is malformed, or does not
/// hold exactly 68 points.
pub fn read_pts(path: &Path) -> Result<Landmarks> {
    let text = fs::read_to_string(path)?;
    let points = parse_pts(&text).map_err(|message| Error::LandmarkParse {
        path: path.to_path_buf(),
        message,
    })?;
    Landmarks::new(points)
}

/// Serialise landmarks in `.pts` form.
#[must_use]
pub fn format_pts(landmarks: &Landmarks) -> String {
    let mut out = format!("version: 1\nn_points: {}\n{{\n", landmarks.points().len());
    for p in landmarks.points() {
        out.push_str(&format!("{:.3} {:.3}\n", p.x, p.y));
    }
    out.push_str("}\n");
    out
}

fn lock(annotation: &Annotation) -> Result<std::sync::MutexGuard<'_, Option<Landmarks>>> {
    annotation
        .lock()
        .map_err(|_| Error::internal("replay annotation lock poisoned"))
}

/// Plays a directory of annotated stills.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    dir: PathBuf,
}

impl ReplayBackend {
    /// Replay the images in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn frame_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::camera(SOURCE_NAME, format!("cannot read {}: {e}", self.dir.display()))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl VisionBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn open(&self) -> Result<CaptureSession> {
        let paths = self.frame_paths()?;
        info!(dir = %self.dir.display(), frames = paths.len(), "Opened replay source");

        let annotation: Annotation = Arc::new(Mutex::new(None));
        Ok(CaptureSession {
            source: Box::new(ReplaySource {
                paths: paths.into_iter(),
                next_index: 0,
                annotation: Arc::clone(&annotation),
            }),
            detector: Box::new(AnnotationDetector {
                annotation: Arc::clone(&annotation),
            }),
            predictor: Box::new(AnnotationPredictor { annotation }),
        })
    }
}

/// Reads image files in order and publishes their annotations.
#[derive(Debug)]
pub struct ReplaySource {
    paths: std::vec::IntoIter<PathBuf>,
    next_index: u64,
    annotation: Annotation,
}

impl FrameSource for ReplaySource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.next() else {
            return Ok(None);
        };

        let image = image::open(&path)
            .map_err(|e| Error::camera(SOURCE_NAME, format!("{}: {e}", path.display())))?
            .to_rgb8();

        let sidecar = path.with_extension("pts");
        let landmarks = if sidecar.exists() {
            Some(read_pts(&sidecar)?)
        } else {
            None
        };
        debug!(
            frame = %path.display(),
            annotated = landmarks.is_some(),
            "Read replay frame"
        );
        *lock(&self.annotation)? = landmarks;

        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Reports the bounding box of the current frame's annotation as a face.
#[derive(Debug)]
pub struct AnnotationDetector {
    annotation: Annotation,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_to(value: f64, limit: u32) -> u32 {
    value.clamp(0.0, f64::from(limit)) as u32
}

impl FaceDetector for AnnotationDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Vec<FaceRect>> {
        let guard = lock(&self.annotation)?;
        let Some(landmarks) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let (width, height) = gray.dimensions();
        let (min_x, min_y, max_x, max_y) = landmarks.bounds();
        let x = clamp_to(min_x.floor(), width);
        let y = clamp_to(min_y.floor(), height);
        let right = clamp_to(max_x.ceil(), width);
        let bottom = clamp_to(max_y.ceil(), height);
        Ok(vec![FaceRect::new(x, y, right - x, bottom - y)])
    }
}

/// Returns the current frame's annotated landmarks.
#[derive(Debug)]
pub struct AnnotationPredictor {
    annotation: Annotation,
}

impl LandmarkPredictor for AnnotationPredictor {
    fn predict(&mut self, _gray: &GrayImage, _face: &FaceRect) -> Result<Landmarks> {
        lock(&self.annotation)?
            .clone()
            .ok_or_else(|| Error::vision("no annotation for detected face"))
    }
}
