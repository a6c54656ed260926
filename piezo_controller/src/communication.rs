use std::path::Path;

use anyhow::{Context as _, Result};
use piezo::StagePosition;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands::parse_command;
use crate::models::{CommandEnvelope, CommandResponse, CommandResult};

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.4}", value),
        None => "unknown".to_string(),
    }
}

pub fn format_response(result: &CommandResult) -> String {
    match result {
        Ok(CommandResponse::Success) => "OK\n".to_string(),
        Ok(CommandResponse::Step(report)) => {
            format!("Step: x={} y={} z={}\n", report.x, report.y, report.z)
        }
        Ok(CommandResponse::Position(position)) => {
            let values = match position {
                StagePosition::Commanded(values) => *values,
                StagePosition::Measured(values) => values.map(Some),
            };
            format!(
                "Position: {} {} {}\n",
                format_value(values.x),
                format_value(values.y),
                format_value(values.z)
            )
        }
        Ok(CommandResponse::Voltage(volts)) => {
            format!("Voltage: {:.4} {:.4} {:.4}\n", volts.x, volts.y, volts.z)
        }
        Err(err) => format!("{}\n", err),
    }
}

async fn handle_line(line: &str, command_tx: &mpsc::Sender<CommandEnvelope>) -> String {
    let (envelope, receiver) = match parse_command(line) {
        Ok(parsed) => parsed,
        Err(err) => return format!("{}\n", err),
    };

    if command_tx.send(envelope).await.is_err() {
        return "Error: Failed to process command\n".to_string();
    }

    match receiver.await {
        Ok(result) => format_response(&result),
        Err(_) => "Error: Failed to receive response\n".to_string(),
    }
}

async fn serve_client(socket: UnixStream, command_tx: mpsc::Sender<CommandEnvelope>) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading from socket: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        debug!("Received command: {}", line.trim());
        let response = handle_line(&line, &command_tx).await;

        if let Err(e) = writer.write_all(response.as_bytes()).await {
            warn!("Error writing to socket: {}", e);
            break;
        }
    }
}

pub async fn run_communication_layer(
    socket_path: &Path,
    command_tx: mpsc::Sender<CommandEnvelope>,
) -> Result<()> {
    // A stale socket from a previous run would make bind fail.
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove existing socket file {:?}", socket_path))?;
    }

    let listener = tokio::net::UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind to socket {:?}", socket_path))?;
    info!("Listening on {:?}", socket_path);

    loop {
        let (socket, _) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        tokio::spawn(serve_client(socket, command_tx.clone()));
    }
}

#[cfg(test)]
mod tests {
    use piezo::{PerAxis, StepOutcome};

    use super::*;
    use crate::models::CommandError;

    #[test]
    fn formats_responses() {
        assert_eq!(format_response(&Ok(CommandResponse::Success)), "OK\n");

        let position = StagePosition::Commanded(PerAxis::new(Some(1.5), None, Some(40.02)));
        assert_eq!(
            format_response(&Ok(CommandResponse::Position(position))),
            "Position: 1.5000 unknown 40.0200\n"
        );

        let position = StagePosition::Measured(PerAxis::new(8.0, 8.0, 8.0));
        assert_eq!(
            format_response(&Ok(CommandResponse::Position(position))),
            "Position: 8.0000 8.0000 8.0000\n"
        );

        let volts = PerAxis::new(-1.0, -1.0, -1.0);
        assert_eq!(
            format_response(&Ok(CommandResponse::Voltage(volts))),
            "Voltage: -1.0000 -1.0000 -1.0000\n"
        );

        let report = PerAxis::new(
            StepOutcome::Moved { from: 1.0, to: 2.0 },
            StepOutcome::Skipped,
            StepOutcome::OutOfRange { target: 41.0 },
        );
        assert_eq!(
            format_response(&Ok(CommandResponse::Step(report))),
            "Step: x=2.000 y=skipped z=out_of_range(41.000)\n"
        );

        let err: CommandResult = Err(CommandError::from("boom"));
        assert_eq!(format_response(&err), "Error: boom\n");
    }

    #[tokio::test]
    async fn serves_commands_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("piezo.sock");
        let (command_tx, mut command_rx) = mpsc::channel::<CommandEnvelope>(4);

        let server_path = socket_path.clone();
        tokio::spawn(async move { run_communication_layer(&server_path, command_tx).await });

        // Answers every command with OK.
        tokio::spawn(async move {
            while let Some(envelope) = command_rx.recv().await {
                let _ = envelope.response.send(Ok(CommandResponse::Success));
            }
        });

        let mut client = loop {
            match UnixStream::connect(&socket_path).await {
                Ok(client) => break client,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        client
            .write_all(b"move:1:_:2\nfly:away\nmove:1:x:2\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "OK");
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "Error: Invalid command format"
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "Error: value 'x' is not a valid number"
        );
    }
}
