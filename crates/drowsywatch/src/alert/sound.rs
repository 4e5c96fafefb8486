//! Local audible alert played on the default output device.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tracing::{debug, warn};

use super::{Alert, AlertChannel};
use crate::error::{Error, Result};

const CHANNEL: &str = "sound";

fn sound_error(message: impl std::fmt::Display) -> Error {
    Error::alert_send(CHANNEL, message.to_string())
}

/// A decoded WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    /// Interleaved samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Channels per frame.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
}

impl WavClip {
    /// Decode a WAV file, converting integer samples to float.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded.
    #[allow(clippy::cast_precision_loss)]
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| sound_error(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sound_error)?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(sound_error)?
            }
        };

        Ok(Self {
            samples,
            channels: spec.channels.max(1),
            sample_rate: spec.sample_rate.max(1),
        })
    }

    /// Number of frames.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback length.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// The sample for output frame `frame` and channel `channel` on a device
    /// running at `out_rate`, or `None` past the end of the clip.
    ///
    /// Rates are matched by nearest-frame lookup and extra output channels
    /// repeat the clip's channels.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample_for(&self, frame: usize, channel: usize, out_rate: u32) -> Option<f32> {
        let source_frame =
            (frame as u64 * u64::from(self.sample_rate) / u64::from(out_rate.max(1))) as usize;
        if source_frame >= self.frames() {
            return None;
        }
        let source_channel = channel % usize::from(self.channels);
        self.samples
            .get(source_frame * usize::from(self.channels) + source_channel)
            .copied()
    }
}

/// Plays a WAV file each time an alert fires.
#[derive(Debug, Clone)]
pub struct SoundAlert {
    path: PathBuf,
}

impl SoundAlert {
    /// Play the WAV file at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

/// Fill `out` from `clip`, advancing `cursor`; flags `done` at the end.
fn fill<T: cpal::Sample + cpal::FromSample<f32>>(
    out: &mut [T],
    clip: &WavClip,
    out_channels: usize,
    out_rate: u32,
    cursor: &mut usize,
    done: &AtomicBool,
) {
    for frame in out.chunks_mut(out_channels) {
        for (channel, slot) in frame.iter_mut().enumerate() {
            let sample = clip.sample_for(*cursor, channel, out_rate);
            if sample.is_none() {
                done.store(true, Ordering::SeqCst);
            }
            *slot = T::from_sample(sample.unwrap_or(0.0));
        }
        *cursor += 1;
    }
}

fn play_blocking(clip: WavClip) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| sound_error("no output device available"))?;
    let supported = device.default_output_config().map_err(sound_error)?;
    let config = supported.config();
    let out_channels = usize::from(config.channels);
    let out_rate = config.sample_rate.0;
    debug!(
        device = %device.name().unwrap_or_default(),
        channels = out_channels,
        rate = out_rate,
        "Playing alert sound"
    );

    let done = Arc::new(AtomicBool::new(false));
    let (finished_tx, finished_rx) = mpsc::channel::<()>();
    let err_fn = |err| warn!("Error on the alert output stream: {}", err);
    let timeout = Some(Duration::from_millis(200));
    let length = clip.duration();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let done = Arc::clone(&done);
            let mut cursor = 0;
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill(data, &clip, out_channels, out_rate, &mut cursor, &done);
                    if done.load(Ordering::SeqCst) {
                        let _ = finished_tx.send(());
                    }
                },
                err_fn,
                timeout,
            )
        }
        SampleFormat::I16 => {
            let done = Arc::clone(&done);
            let mut cursor = 0;
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    fill(data, &clip, out_channels, out_rate, &mut cursor, &done);
                    if done.load(Ordering::SeqCst) {
                        let _ = finished_tx.send(());
                    }
                },
                err_fn,
                timeout,
            )
        }
        other => return Err(sound_error(format!("unsupported sample format {other:?}"))),
    }
    .map_err(sound_error)?;

    stream.play().map_err(sound_error)?;
    // The callback may never report completion if the device stalls.
    let _ = finished_rx.recv_timeout(length + Duration::from_secs(1));
    Ok(())
}

#[async_trait::async_trait]
impl AlertChannel for SoundAlert {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    fn needs_contact(&self) -> bool {
        false
    }

    async fn notify(&self, _alert: &Alert) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || play_blocking(WavClip::load(&path)?))
            .await
            .map_err(|e| Error::internal(format!("sound task failed: {e}")))?
    }
}
