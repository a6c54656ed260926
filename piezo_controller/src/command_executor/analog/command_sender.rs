use std::io;

use async_trait::async_trait;
use icpcon::{M7017, M7024, OutputRange};
use piezo::{AnalogIo, ChannelRegistry, IoError};
use utilities::command_executor::CommandSender;

use super::{
    ChannelKind,
    commands::{AnalogCommand, AnalogResponse},
    parse_channel,
};

/// Async face of the ICP DAS backend.
///
/// Names are checked here so the executor thread only ever sees valid
/// module channels.
#[derive(Clone)]
pub struct AnalogCommandSender {
    sender: CommandSender<AnalogCommand>,
    device: String,
    output_range: OutputRange,
    registry: ChannelRegistry,
}

fn unexpected_response() -> IoError {
    io::Error::other("Unexpected response type").into()
}

impl AnalogCommandSender {
    pub fn new(
        sender: CommandSender<AnalogCommand>,
        device: impl Into<String>,
        output_range: OutputRange,
    ) -> Self {
        Self {
            sender,
            device: device.into(),
            output_range,
            registry: ChannelRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    fn resolve(&self, device: &str, channel: &str, kind: ChannelKind) -> Result<u8, IoError> {
        if device != self.device {
            return Err(IoError::UnknownDevice(device.to_string()));
        }

        let available = match kind {
            ChannelKind::Output => M7024::CHANNELS,
            ChannelKind::Input => M7017::CHANNELS,
        };

        match parse_channel(channel) {
            Some((found, n)) if found == kind && n < available => Ok(n),
            _ => Err(IoError::UnknownChannel {
                device: device.to_string(),
                channel: channel.to_string(),
            }),
        }
    }
}

#[async_trait]
impl AnalogIo for AnalogCommandSender {
    async fn write_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), IoError> {
        let module_channel = self.resolve(device, channel, ChannelKind::Output)?;

        let (min, max) = self.output_range.limits();
        if !(min..=max).contains(&volts) {
            return Err(IoError::VoltageOutOfRange {
                channel: channel.to_string(),
                volts,
            });
        }

        let _lease = self.registry.acquire(device, channel)?;
        let response = self
            .sender
            .send_command(AnalogCommand::SetVoltage {
                channel: module_channel,
                volts,
            })
            .await?;

        match response {
            AnalogResponse::Ok => Ok(()),
            _ => Err(unexpected_response()),
        }
    }

    async fn read_voltage(&self, device: &str, channel: &str) -> Result<f64, IoError> {
        let module_channel = self.resolve(device, channel, ChannelKind::Input)?;

        let _lease = self.registry.acquire(device, channel)?;
        let response = self
            .sender
            .send_command(AnalogCommand::GetVoltage {
                channel: module_channel,
            })
            .await?;

        match response {
            AnalogResponse::Voltage(volts) => Ok(volts),
            _ => Err(unexpected_response()),
        }
    }
}
