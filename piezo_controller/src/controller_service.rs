use std::sync::Arc;

use anyhow::Result;
use piezo::{AnalogIo, PositionController, PositionControllerConfig};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::models::{Command, CommandEnvelope, CommandError, CommandResponse};

fn to_command_error(e: impl std::fmt::Display) -> CommandError {
    e.to_string().into()
}

/// Executes commands one at a time, in arrival order, against the stage.
pub async fn run_controller<A: AnalogIo>(
    mut command_rx: mpsc::Receiver<CommandEnvelope>,
    controller: Arc<Mutex<PositionController<A>>>,
) -> Result<()> {
    while let Some(envelope) = command_rx.recv().await {
        let CommandEnvelope { command, response } = envelope;
        debug!("Executing {:?}", command);

        let mut controller = controller.lock().await;

        let result = match command {
            Command::Move(request) => controller
                .go_to_position(request)
                .await
                .map(|_| CommandResponse::Success)
                .map_err(to_command_error),
            Command::Step(deltas) => controller
                .step(deltas)
                .await
                .map(CommandResponse::Step)
                .map_err(to_command_error),
            Command::Check(request) => controller
                .validate(&request)
                .map(|_| CommandResponse::Success)
                .map_err(to_command_error),
            Command::GetPosition => controller
                .get_current_position()
                .await
                .map(CommandResponse::Position)
                .map_err(to_command_error),
            Command::GetVoltage => controller
                .get_current_voltage()
                .await
                .map(CommandResponse::Voltage)
                .map_err(to_command_error),
        };

        let _ = response.send(result);
    }

    info!("Command channel closed, controller service stopping");
    Ok(())
}

pub fn create_controller<A: AnalogIo>(
    config: PositionControllerConfig,
    io: A,
) -> Result<Arc<Mutex<PositionController<A>>>> {
    Ok(Arc::new(Mutex::new(PositionController::new(config, io)?)))
}
