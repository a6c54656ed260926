use std::io;

use commands::AnalogCommand;
use icpcon::{IcpconError, M7017, M7024};
use tracing::warn;
use utilities::{command_executor::DeviceHandler, lazy_tcp::LazyTcpStream};

pub mod command_sender;
pub mod commands;

const MODULE_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Output,
    Input,
}

/// Splits `ao2` / `ai5` style channel names into kind and module channel.
pub fn parse_channel(name: &str) -> Option<(ChannelKind, u8)> {
    let (kind, number) = if let Some(number) = name.strip_prefix("ao") {
        (ChannelKind::Output, number)
    } else if let Some(number) = name.strip_prefix("ai") {
        (ChannelKind::Input, number)
    } else {
        return None;
    };

    // Only the canonical spelling, so one module channel has one name.
    let n: u8 = number.parse().ok()?;
    (n.to_string() == number).then_some((kind, n))
}

pub struct AnalogHandler {
    tcp_stream: LazyTcpStream,
    output: M7024,
    input: Option<M7017>,
}

impl DeviceHandler for AnalogHandler {
    type Command = AnalogCommand;
}

impl AnalogHandler {
    pub fn new(tcp_stream: LazyTcpStream, output: M7024, input: Option<M7017>) -> Self {
        Self {
            tcp_stream,
            output,
            input,
        }
    }

    // Bytes of a timed out reply may still arrive, so start the next
    // request on a fresh connection.
    fn drop_connection_on_error<T>(&mut self, result: Result<T, IcpconError>) -> io::Result<T> {
        result.map_err(|e| {
            warn!("Module transfer failed, dropping connection: {}", e);
            self.tcp_stream.disconnect();
            e.into()
        })
    }

    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> io::Result<()> {
        let result = self
            .output
            .set_voltage(&mut self.tcp_stream, channel, volts, MODULE_RETRIES);
        self.drop_connection_on_error(result)
    }

    pub fn get_voltage(&mut self, channel: u8) -> io::Result<f64> {
        let input = self.input.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "No input module configured")
        })?;

        let result = input.get_voltage(&mut self.tcp_stream, channel, MODULE_RETRIES);
        self.drop_connection_on_error(result)
    }
}
