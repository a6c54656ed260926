//! ICP DAS I-7000/M-7000 analog modules spoken to over Modbus RTU.
//!
//! Both modules use the 16-bit two's complement data format where
//! `0x7FFF` is positive full scale and `0x8001` negative full scale.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utilities::modbus::{Modbus, ModbusError};

pub const FULL_SCALE_VOLTS: f64 = 10.0;
const FULL_SCALE_CODE: f64 = 32767.0;

#[derive(Debug, thiserror::Error)]
pub enum IcpconError {
    #[error(transparent)]
    Modbus(#[from] ModbusError),

    #[error("Channel {channel} does not exist, module has {available} channels")]
    InvalidChannel { channel: u8, available: u8 },

    #[error("{volts} V is outside of the {min}..{max} V output range")]
    VoltageOutOfRange { volts: f64, min: f64, max: f64 },

    #[error("Expected {expected} registers, received {received}")]
    InvalidResponseLength { expected: usize, received: usize },
}

impl From<IcpconError> for std::io::Error {
    fn from(error: IcpconError) -> Self {
        match error {
            IcpconError::Modbus(error) => error.into(),
            IcpconError::VoltageOutOfRange { .. } | IcpconError::InvalidChannel { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, error.to_string())
            }
            _ => std::io::Error::other(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputRange {
    /// -10..+10 V
    #[default]
    #[serde(rename = "bipolar_10v")]
    Bipolar10V,
    /// 0..+10 V
    #[serde(rename = "unipolar_10v")]
    Unipolar10V,
}

impl OutputRange {
    pub fn limits(&self) -> (f64, f64) {
        match self {
            OutputRange::Bipolar10V => (-FULL_SCALE_VOLTS, FULL_SCALE_VOLTS),
            OutputRange::Unipolar10V => (0.0, FULL_SCALE_VOLTS),
        }
    }
}

pub fn volts_to_code(volts: f64) -> u16 {
    let code = (volts / FULL_SCALE_VOLTS * FULL_SCALE_CODE).round();
    code.clamp(-FULL_SCALE_CODE, FULL_SCALE_CODE) as i16 as u16
}

pub fn code_to_volts(code: u16) -> f64 {
    // 0x8000 is the under-range marker, read it as negative full scale.
    let code = (code as i16).max(-(FULL_SCALE_CODE as i16));
    code as f64 / FULL_SCALE_CODE * FULL_SCALE_VOLTS
}

fn with_retries<T>(
    retries: u8,
    mut op: impl FnMut() -> Result<T, IcpconError>,
) -> Result<T, IcpconError> {
    let attempts = retries.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// M-7024: four channel analog output module.
pub struct M7024 {
    client: Modbus,
    range: OutputRange,
}

impl M7024 {
    pub const CHANNELS: u8 = 4;

    pub fn new(id: u8, range: OutputRange) -> Self {
        Self {
            client: Modbus::new(id),
            range,
        }
    }

    pub fn set_voltage(
        &self,
        client: &mut (impl Write + Read),
        channel: u8,
        volts: f64,
        retries: u8,
    ) -> Result<(), IcpconError> {
        check_channel(channel, Self::CHANNELS)?;

        let (min, max) = self.range.limits();
        if !volts.is_finite() || volts < min || volts > max {
            return Err(IcpconError::VoltageOutOfRange { volts, min, max });
        }

        let code = volts_to_code(volts);
        debug!(
            "M-7024 {}: AO{} <- {:.4} V (0x{:04X})",
            self.client.id(),
            channel,
            volts,
            code
        );

        with_retries(retries, || {
            self.client
                .write_single_register(client, channel as u16, code)
                .map_err(IcpconError::from)
        })
    }
}

/// M-7017: eight channel analog input module.
pub struct M7017 {
    client: Modbus,
}

impl M7017 {
    pub const CHANNELS: u8 = 8;

    pub fn new(id: u8) -> Self {
        Self {
            client: Modbus::new(id),
        }
    }

    pub fn get_voltage(
        &self,
        client: &mut (impl Write + Read),
        channel: u8,
        retries: u8,
    ) -> Result<f64, IcpconError> {
        check_channel(channel, Self::CHANNELS)?;

        let volts = with_retries(retries, || {
            let response = self.client.read_input_registers(client, channel as u16, 1)?;
            first_register(&response).map(code_to_volts)
        })?;

        debug!("M-7017 {}: AI{} -> {:.4} V", self.client.id(), channel, volts);
        Ok(volts)
    }
}

fn check_channel(channel: u8, available: u8) -> Result<(), IcpconError> {
    if channel >= available {
        return Err(IcpconError::InvalidChannel { channel, available });
    }
    Ok(())
}

fn first_register(response: &[u16]) -> Result<u16, IcpconError> {
    response
        .first()
        .copied()
        .ok_or(IcpconError::InvalidResponseLength {
            expected: 1,
            received: 0,
        })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use utilities::modbus::MockTransport;

    use super::*;

    #[test]
    fn code_conversion() {
        assert_eq!(volts_to_code(10.0), 0x7FFF);
        assert_eq!(volts_to_code(-10.0), 0x8001);
        assert_eq!(volts_to_code(0.0), 0x0000);
        assert_eq!(volts_to_code(5.0), 16384);

        assert_relative_eq!(code_to_volts(0x7FFF), 10.0);
        assert_relative_eq!(code_to_volts(0x8001), -10.0);
        assert_relative_eq!(code_to_volts(0x8000), -10.0);
        assert_relative_eq!(code_to_volts(16384), 5.0, epsilon = 1e-3);
    }

    #[test]
    fn m7024_writes_channel_register() {
        let module = M7024::new(3, OutputRange::Bipolar10V);
        let mut transport = MockTransport::new();
        transport.respond(&[0x03, 0x06, 0x00, 0x02, 0x40, 0x00]);

        module.set_voltage(&mut transport, 2, 5.0, 1).unwrap();

        assert_eq!(&transport.written[..6], &[0x03, 0x06, 0x00, 0x02, 0x40, 0x00]);
    }

    #[test]
    fn m7024_rejects_values_outside_output_range() {
        let module = M7024::new(1, OutputRange::Unipolar10V);
        let mut transport = MockTransport::new();

        let err = module.set_voltage(&mut transport, 0, -0.5, 1).unwrap_err();
        assert!(matches!(err, IcpconError::VoltageOutOfRange { .. }));

        let err = module.set_voltage(&mut transport, 0, 10.5, 1).unwrap_err();
        assert!(matches!(err, IcpconError::VoltageOutOfRange { .. }));

        let err = module.set_voltage(&mut transport, 4, 1.0, 1).unwrap_err();
        assert!(matches!(
            err,
            IcpconError::InvalidChannel {
                channel: 4,
                available: 4
            }
        ));

        assert!(transport.written.is_empty());
    }

    #[test]
    fn m7024_retries_failed_write() {
        let module = M7024::new(1, OutputRange::Bipolar10V);
        let mut transport = MockTransport::new();
        transport.respond(&[0x01, 0x86, 0x06]);
        transport.respond(&[0x01, 0x06, 0x00, 0x00, 0x00, 0x00]);

        module.set_voltage(&mut transport, 0, 0.0, 2).unwrap();
    }

    #[test]
    fn m7017_reads_single_channel() {
        let module = M7017::new(2);
        let mut transport = MockTransport::new();
        transport.respond(&[0x02, 0x04, 0x02, 0x0C, 0xCD]);

        let volts = module.get_voltage(&mut transport, 5, 1).unwrap();

        assert_relative_eq!(volts, 1.0, epsilon = 1e-3);
        assert_eq!(&transport.written[..6], &[0x02, 0x04, 0x00, 0x05, 0x00, 0x01]);
    }
}
