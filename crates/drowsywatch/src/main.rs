//! `drowsywatch` - CLI for the drowsiness detection server
//!
//! This binary runs the web server and manages its model and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use drowsywatch::cli::{Cli, Command, ConfigCommand, ModelCommand, ServeCommand};
use drowsywatch::model::{self, ModelStatus};
use drowsywatch::{init_logging, server, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config, &serve_cmd).await,
        Command::Model(model_cmd) => handle_model(&config, model_cmd).await,
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn handle_serve(mut config: Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    cmd.apply(&mut config);
    config.validate().context("invalid serve options")?;
    server::serve(&config).await?;
    Ok(())
}

async fn handle_model(config: &Config, cmd: ModelCommand) -> anyhow::Result<()> {
    match cmd {
        ModelCommand::Fetch { force } => {
            let status = if force {
                let bytes = model::download(&config.model.url, &config.model.path).await?;
                ModelStatus::Downloaded {
                    path: config.model.path.clone(),
                    bytes,
                }
            } else {
                let mut model_config = config.model.clone();
                model_config.auto_download = true;
                model::ensure_model(&model_config).await?
            };
            match status {
                ModelStatus::Present(path) => {
                    println!("Model already present: {}", path.display());
                }
                ModelStatus::Downloaded { path, bytes } => {
                    println!("Downloaded {bytes} bytes to {}", path.display());
                }
            }
        }
        ModelCommand::Path => {
            println!("{}", config.model.path.display());
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = config.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Address:            {}", config.bind_address());
                println!();
                println!("[Detection]");
                println!("  EAR threshold:      {}", config.detection.ear_threshold);
                println!("  JPEG quality:       {}", config.detection.jpeg_quality);
                println!("  Overlay:            {}", config.detection.overlay);
                println!();
                println!("[Camera]");
                println!("  Backend:            {}", config.camera.backend);
                println!("  Index:              {}", config.camera.index);
                if let Some(dir) = &config.camera.replay_dir {
                    println!("  Replay dir:         {}", dir.display());
                }
                println!();
                println!("[Model]");
                println!("  Path:               {}", config.model.path.display());
                println!("  Auto download:      {}", config.model.auto_download);
                println!();
                println!("[SMS]");
                println!("  Enabled:            {}", config.sms.enabled);
                println!("  Ready:              {}", config.sms_ready());
                println!(
                    "  From:               {}",
                    config.sms.from_phone.as_deref().unwrap_or("(not set)")
                );
                println!();
                println!("[Sound]");
                println!("  Enabled:            {}", config.sound.enabled);
                println!("  File:               {}", config.sound.path.display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)).and_then(|config| config.validate()) {
                Ok(()) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
