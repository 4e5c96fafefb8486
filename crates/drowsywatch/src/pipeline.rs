//! Per-frame drowsiness detection and the streaming loop around it.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::alert::AlertDispatcher;
use crate::config::DetectionConfig;
use crate::ear::is_drowsy;
use crate::error::Result;
use crate::multipart;
use crate::overlay;
use crate::vision::{CaptureSession, FaceDetector, FaceRect, Frame, LandmarkPredictor, VisionBackend};

/// The measurement for one face in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceReading {
    /// Where the face was found.
    #[serde(skip)]
    pub face: FaceRect,
    /// Average eye aspect ratio of both eyes.
    pub ear: f64,
    /// Whether `ear` is below the threshold.
    pub drowsy: bool,
}

/// The outcome of processing one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    /// Frame sequence number.
    pub index: u64,
    /// One reading per face with usable landmarks.
    pub faces: Vec<FaceReading>,
    /// Whether any face in the frame is drowsy.
    pub drowsy: bool,
}

impl FrameReport {
    /// The lowest EAR in the frame.
    #[must_use]
    pub fn min_ear(&self) -> Option<f64> {
        self.faces.iter().map(|f| f.ear).reduce(f64::min)
    }
}

/// Face detection, landmark prediction, EAR thresholding and overlay.
pub struct FramePipeline {
    detector: Box<dyn FaceDetector>,
    predictor: Box<dyn LandmarkPredictor>,
    threshold: f64,
    overlay: bool,
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("threshold", &self.threshold)
            .field("overlay", &self.overlay)
            .finish_non_exhaustive()
    }
}

impl FramePipeline {
    /// Build a pipeline around a detector and predictor.
    #[must_use]
    pub fn new(
        detector: Box<dyn FaceDetector>,
        predictor: Box<dyn LandmarkPredictor>,
        settings: &DetectionConfig,
    ) -> Self {
        Self {
            detector,
            predictor,
            threshold: settings.ear_threshold,
            overlay: settings.overlay,
        }
    }

    /// Measure every face in `frame` and, if any is drowsy, draw the warning
    /// onto it.
    ///
    /// A face whose landmarks cannot be predicted is logged and left out of
    /// the report.
    ///
    /// # Errors
    ///
    /// Returns an error if face detection fails.
    pub fn process(&mut self, frame: &mut Frame) -> Result<FrameReport> {
        let gray = frame.to_gray();
        let faces = self.detector.detect(&gray)?;

        let mut readings = Vec::with_capacity(faces.len());
        for face in faces {
            let landmarks = match self.predictor.predict(&gray, &face) {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    warn!(frame = frame.index, ?face, error = %e, "Landmark prediction failed");
                    continue;
                }
            };
            let ear = landmarks.average_ear();
            readings.push(FaceReading {
                face,
                ear,
                drowsy: is_drowsy(ear, self.threshold),
            });
        }

        let drowsy = readings.iter().any(|r| r.drowsy);
        if drowsy && self.overlay {
            overlay::draw_warning(&mut frame.image);
        }

        debug!(
            frame = frame.index,
            faces = readings.len(),
            drowsy,
            "Processed frame"
        );
        Ok(FrameReport {
            index: frame.index,
            faces: readings,
            drowsy,
        })
    }
}

/// Encode an RGB image as JPEG.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}

/// Stream the camera as multipart JPEG chunks.
///
/// A fresh capture session is opened on a blocking thread. Each frame is
/// processed, drowsy frames are dispatched as alerts before the frame is
/// sent, and the chunk is handed over through a one-slot channel. The loop
/// ends when the source ends or fails, or when the returned stream is
/// dropped; the camera is released when the loop ends.
///
/// Must be called from within a tokio runtime.
pub fn video_stream(
    backend: Arc<dyn VisionBackend>,
    detection: DetectionConfig,
    dispatcher: AlertDispatcher,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
    let (tx, rx) = mpsc::channel::<Bytes>(1);
    let handle = Handle::current();

    tokio::task::spawn_blocking(move || {
        run_capture(backend.as_ref(), &detection, &dispatcher, &handle, &tx);
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    })
}

fn run_capture(
    backend: &dyn VisionBackend,
    detection: &DetectionConfig,
    dispatcher: &AlertDispatcher,
    handle: &Handle,
    tx: &mpsc::Sender<Bytes>,
) {
    let CaptureSession {
        mut source,
        detector,
        predictor,
    } = match backend.open() {
        Ok(session) => session,
        Err(e) => {
            warn!(backend = backend.name(), error = %e, "Could not open capture session");
            return;
        }
    };
    info!(source = source.name(), "Video stream started");

    let mut pipeline = FramePipeline::new(detector, predictor, detection);
    let mut frames = 0u64;
    let mut alerts = 0u64;

    loop {
        let mut frame = match source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(source = source.name(), "Frame source exhausted");
                break;
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "Frame read failed");
                break;
            }
        };

        let report = match pipeline.process(&mut frame) {
            Ok(report) => report,
            Err(e) => {
                warn!(frame = frame.index, error = %e, "Frame processing failed");
                break;
            }
        };

        if let Some(ear) = report.min_ear().filter(|_| report.drowsy) {
            alerts += 1;
            let outcome = handle.block_on(dispatcher.dispatch(ear));
            debug!(frame = report.index, ?outcome, "Dispatched drowsiness alert");
        }

        let jpeg = match encode_jpeg(&frame.image, detection.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(frame = frame.index, error = %e, "JPEG encoding failed");
                break;
            }
        };

        if tx.blocking_send(multipart::jpeg_part(&jpeg)).is_err() {
            debug!("Stream client disconnected");
            break;
        }
        frames += 1;
    }

    info!(frames, alerts, "Video stream ended");
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use futures::StreamExt;
    use image::Rgb;

    use super::*;
    use crate::alert::testing::RecordingChannel;
    use crate::contact::{ContactInfo, ContactStore};
    use crate::ear::fixtures::face;
    use crate::ear::Landmarks;
    use crate::error::Error;
    use crate::vision::replay::{format_pts, ReplayBackend};
    use crate::vision::FrameSource;

    const OPEN: f64 = 10.0;
    const CLOSED: f64 = 2.0;

    fn write_frame(dir: &Path, name: &str, opening: Option<f64>) {
        RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]))
            .save(dir.join(format!("{name}.png")))
            .unwrap();
        if let Some(opening) = opening {
            let landmarks = Landmarks::new(face(opening)).unwrap();
            std::fs::write(dir.join(format!("{name}.pts")), format_pts(&landmarks)).unwrap();
        }
    }

    fn first_frame(dir: &Path, detection: &DetectionConfig) -> (Frame, FramePipeline) {
        let CaptureSession {
            mut source,
            detector,
            predictor,
        } = ReplayBackend::new(dir).open().unwrap();
        let frame = source.read_frame().unwrap().unwrap();
        (frame, FramePipeline::new(detector, predictor, detection))
    }

    fn label_pixel(frame: &Frame) -> Rgb<u8> {
        let top = overlay::WARNING_ORIGIN.1 - 7 * overlay::WARNING_SCALE;
        *frame.image.get_pixel(overlay::WARNING_ORIGIN.0, top)
    }

    #[test]
    fn test_open_eyes_are_alert() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "f0", Some(OPEN));
        let (mut frame, mut pipeline) = first_frame(dir.path(), &DetectionConfig::default());

        let report = pipeline.process(&mut frame).unwrap();

        assert_eq!(report.faces.len(), 1);
        assert!(report.faces[0].ear > 0.25);
        assert!(!report.drowsy);
        assert_ne!(label_pixel(&frame), overlay::WARNING_COLOR);
    }

    #[test]
    fn test_closed_eyes_are_drowsy_and_labelled() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "f0", Some(CLOSED));
        let (mut frame, mut pipeline) = first_frame(dir.path(), &DetectionConfig::default());

        let report = pipeline.process(&mut frame).unwrap();

        assert!(report.faces[0].ear < 0.25);
        assert!(report.drowsy);
        assert_eq!(report.min_ear(), Some(report.faces[0].ear));
        assert_eq!(label_pixel(&frame), overlay::WARNING_COLOR);
    }

    #[test]
    fn test_overlay_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "f0", Some(CLOSED));
        let detection = DetectionConfig {
            overlay: false,
            ..DetectionConfig::default()
        };
        let (mut frame, mut pipeline) = first_frame(dir.path(), &detection);

        assert!(pipeline.process(&mut frame).unwrap().drowsy);
        assert_ne!(label_pixel(&frame), overlay::WARNING_COLOR);
    }

    #[test]
    fn test_no_face_is_not_drowsy() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "f0", None);
        let (mut frame, mut pipeline) = first_frame(dir.path(), &DetectionConfig::default());

        let report = pipeline.process(&mut frame).unwrap();
        assert!(report.faces.is_empty());
        assert!(!report.drowsy);
        assert_eq!(report.min_ear(), None);
    }

    #[test]
    fn test_encode_jpeg_decodes() {
        let image = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    fn dispatcher_with_contact() -> (AlertDispatcher, Arc<RecordingChannel>) {
        let store = ContactStore::new();
        store.save(ContactInfo::new("A", "+15551234567").unwrap());
        let channel = Arc::new(RecordingChannel::needing_contact());
        (AlertDispatcher::new(store).with_channel(channel.clone()), channel)
    }

    #[tokio::test]
    async fn test_stream_emits_one_part_per_frame_and_alerts_drowsy_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "f0", Some(OPEN));
        write_frame(dir.path(), "f1", Some(CLOSED));
        write_frame(dir.path(), "f2", None);
        write_frame(dir.path(), "f3", Some(CLOSED));
        let (dispatcher, channel) = dispatcher_with_contact();

        let chunks: Vec<Bytes> = video_stream(
            Arc::new(ReplayBackend::new(dir.path())),
            DetectionConfig::default(),
            dispatcher,
        )
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            let parts = multipart::split_parts(chunk);
            assert_eq!(parts.len(), 1);
            image::load_from_memory(parts[0]).unwrap();
        }
        assert_eq!(channel.count(), 2);
    }

    #[tokio::test]
    async fn test_stream_of_missing_source_is_empty() {
        let (dispatcher, channel) = dispatcher_with_contact();
        let chunks: Vec<_> = video_stream(
            Arc::new(ReplayBackend::new("/nonexistent/frames")),
            DetectionConfig::default(),
            dispatcher,
        )
        .collect()
        .await;

        assert!(chunks.is_empty());
        assert_eq!(channel.count(), 0);
    }

    #[derive(Debug)]
    struct BrokenCamera;

    impl FrameSource for BrokenCamera {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn read_frame(&mut self) -> Result<Option<Frame>> {
            Err(Error::camera("broken", "device unplugged"))
        }
    }

    #[derive(Debug)]
    struct BrokenBackend;

    impl VisionBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn open(&self) -> Result<CaptureSession> {
            let replay = ReplayBackend::new(std::env::temp_dir()).open()?;
            Ok(CaptureSession {
                source: Box::new(BrokenCamera),
                ..replay
            })
        }
    }

    #[tokio::test]
    async fn test_stream_ends_on_read_failure() {
        let (dispatcher, _channel) = dispatcher_with_contact();
        let chunks: Vec<_> =
            video_stream(Arc::new(BrokenBackend), DetectionConfig::default(), dispatcher)
                .collect()
                .await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_capture() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_frame(dir.path(), &format!("f{i}"), Some(CLOSED));
        }
        let (dispatcher, channel) = dispatcher_with_contact();

        let first: Vec<_> = video_stream(
            Arc::new(ReplayBackend::new(dir.path())),
            DetectionConfig::default(),
            dispatcher,
        )
        .take(1)
        .collect()
        .await;
        assert_eq!(first.len(), 1);

        // The loop can run at most one frame ahead of the closed channel.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(channel.count() <= 3);
    }
}
