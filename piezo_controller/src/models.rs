use std::fmt;

use piezo::{PerAxis, StagePosition, StepReport};
use tokio::sync::oneshot;

pub type CommandResult = Result<CommandResponse, CommandError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub message: String,
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        CommandError { message }
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        CommandError {
            message: message.to_string(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Success,
    Step(StepReport),
    Position(StagePosition),
    Voltage(PerAxis<f64>),
}

/// Per-axis micron values, `None` for axes the client left out.
pub type AxisRequest = PerAxis<Option<f64>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move(AxisRequest),
    Step(AxisRequest),
    Check(AxisRequest),
    GetPosition,
    GetVoltage,
}

#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: Command,
    pub response: oneshot::Sender<CommandResult>,
}
