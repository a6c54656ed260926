use std::io;

use utilities::command_executor::Command;

use super::AnalogHandler;

#[derive(Debug, Clone)]
pub enum AnalogCommand {
    SetVoltage { channel: u8, volts: f64 },
    GetVoltage { channel: u8 },
}

#[derive(Debug)]
pub enum AnalogResponse {
    Ok,
    Voltage(f64),
}

impl Command for AnalogCommand {
    type Response = AnalogResponse;
    type Handler = AnalogHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            AnalogCommand::SetVoltage { channel, volts } => {
                handler.set_voltage(channel, volts)?;
                Ok(AnalogResponse::Ok)
            }
            AnalogCommand::GetVoltage { channel } => {
                let volts = handler.get_voltage(channel)?;
                Ok(AnalogResponse::Voltage(volts))
            }
        }
    }
}
