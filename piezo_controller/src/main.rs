use std::path::PathBuf;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{
    command_executor::create_analog_io,
    communication::run_communication_layer,
    config::{create_default_config, init_config},
    controller_service::{create_controller, run_controller},
};

pub mod command_executor;
pub mod commands;
pub mod communication;
pub mod config;
pub mod controller_service;
pub mod logging;
pub mod models;

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;

    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let io = create_analog_io(&config);
    let controller = create_controller(config.stage.clone(), io)
        .context("Failed to create position controller")?;

    let (command_tx, command_rx) = mpsc::channel(32);
    let controller_task = tokio::spawn(run_controller(command_rx, controller));

    tokio::select! {
        result = run_communication_layer(&config.socket_path, command_tx) => {
            if let Err(e) = &result {
                error!("Communication layer stopped: {:#}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    controller_task.abort();

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)
            .with_context(|| format!("Failed to remove socket file {:?}", config.socket_path))?;
    }

    Ok(())
}
