//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::CameraBackend;

/// Serve command arguments.
///
/// Flags override the corresponding configuration values.
#[derive(Debug, Default, Args)]
pub struct ServeCommand {
    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Vision backend
    #[arg(short, long, value_parser = parse_backend)]
    pub backend: Option<CameraBackend>,

    /// Directory of frames for the replay backend
    #[arg(long, value_name = "DIR")]
    pub replay_dir: Option<PathBuf>,

    /// Play the alert sound on drowsy frames
    #[arg(long)]
    pub sound: bool,
}

impl ServeCommand {
    /// Apply the flags to `config`.
    pub fn apply(&self, config: &mut crate::Config) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(backend) = self.backend {
            config.camera.backend = backend;
        }
        if let Some(dir) = &self.replay_dir {
            config.camera.replay_dir = Some(dir.clone());
            if self.backend.is_none() {
                config.camera.backend = CameraBackend::Replay;
            }
        }
        if self.sound {
            config.sound.enabled = true;
        }
    }
}

fn parse_backend(value: &str) -> Result<CameraBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "opencv" => Ok(CameraBackend::Opencv),
        "replay" => Ok(CameraBackend::Replay),
        other => Err(format!("unknown backend '{other}' (expected opencv or replay)")),
    }
}

/// Landmark model commands.
#[derive(Debug, Subcommand)]
pub enum ModelCommand {
    /// Download the landmark model if it is missing
    Fetch {
        /// Download even if the file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Show where the landmark model is expected
    Path,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
