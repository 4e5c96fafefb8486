//! `drowsywatch` - Webcam drowsiness detection served to the browser
//!
//! Frames from a camera pass through a face detector and a 68-point landmark
//! predictor. The eye aspect ratio of both eyes decides whether the driver is
//! drowsy; drowsy frames are labelled and trigger an SMS to the saved
//! emergency contact.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alert;
pub mod cli;
pub mod config;
pub mod contact;
pub mod ear;
pub mod error;
pub mod logging;
pub mod model;
pub mod multipart;
pub mod overlay;
pub mod pipeline;
pub mod server;
pub mod vision;

pub use alert::{Alert, AlertChannel, AlertDispatcher, AlertOutcome, TwilioSms};
pub use config::Config;
pub use contact::{ContactInfo, ContactStore};
pub use ear::{eye_aspect_ratio, is_drowsy, EyePoints, Landmarks, Point, DROWSY_EAR_THRESHOLD};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use pipeline::{FramePipeline, FrameReport};
pub use server::AppState;
