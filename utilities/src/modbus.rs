//! Modbus RTU framing over any byte stream (serial line or TCP gateway).

use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CRC error: expected 0x{expected:04X}, received 0x{received:04X}")]
    InvalidCrc { expected: u16, received: u16 },

    #[error("Invalid slave ID: expected {expected}, received {received}")]
    InvalidSlaveId { expected: u8, received: u8 },

    #[error("Invalid function code: expected 0x{expected:02X}, received 0x{received:02X}")]
    InvalidFunctionCode { expected: u8, received: u8 },

    #[error(
        "Modbus exception (function 0x{function_code:02X}): {} (0x{exception_code:02X})",
        exception_name(*exception_code)
    )]
    ExceptionResponse {
        function_code: u8,
        exception_code: u8,
    },

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl From<ModbusError> for std::io::Error {
    fn from(error: ModbusError) -> Self {
        match error {
            ModbusError::IoError(error) => error,
            _ => std::io::Error::other(error.to_string()),
        }
    }
}

fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed To Respond",
        _ => "Unknown Exception",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadInputRegisters = 0x04,
    WriteSingleRegister = 0x06,
}

pub fn calculate_crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Builds a request frame: slave id, function, two big-endian words, CRC.
fn frame(id: u8, function: FunctionCode, first: u16, second: u16) -> Vec<u8> {
    let mut request = Vec::with_capacity(8);
    request.push(id);
    request.push(function as u8);
    request.extend_from_slice(&first.to_be_bytes());
    request.extend_from_slice(&second.to_be_bytes());

    let crc = calculate_crc16(&request);
    request.extend_from_slice(&crc.to_le_bytes());
    request
}

#[derive(Debug, Clone)]
pub struct Modbus {
    id: u8,
}

impl Modbus {
    pub fn new(id: u8) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    fn send_receive<T: Read + Write>(
        &self,
        client: &mut T,
        request: &[u8],
        function: FunctionCode,
    ) -> Result<Vec<u8>, ModbusError> {
        client.write_all(request)?;

        let mut header = [0u8; 2];
        client.read_exact(&mut header)?;

        if header[1] & 0x80 == 0x80 {
            let mut rest = [0u8; 3];
            client.read_exact(&mut rest)?;

            let frame = [header[0], header[1], rest[0]];
            self.check_crc(&frame, u16::from_le_bytes([rest[1], rest[2]]))?;

            return Err(ModbusError::ExceptionResponse {
                function_code: header[1] & 0x7F,
                exception_code: rest[0],
            });
        }

        let mut response = header.to_vec();
        let payload_len = match function {
            FunctionCode::ReadInputRegisters => {
                let mut byte_count = [0u8; 1];
                client.read_exact(&mut byte_count)?;
                response.push(byte_count[0]);
                byte_count[0] as usize
            }
            // Echo of address and value.
            FunctionCode::WriteSingleRegister => 4,
        };

        let mut payload = vec![0u8; payload_len + 2];
        client.read_exact(&mut payload)?;
        response.extend_from_slice(&payload);

        if response[0] != self.id {
            return Err(ModbusError::InvalidSlaveId {
                expected: self.id,
                received: response[0],
            });
        }

        if response[1] != function as u8 {
            return Err(ModbusError::InvalidFunctionCode {
                expected: function as u8,
                received: response[1],
            });
        }

        let data_len = response.len() - 2;
        let received_crc = u16::from_le_bytes([response[data_len], response[data_len + 1]]);
        self.check_crc(&response[..data_len], received_crc)?;

        response.truncate(data_len);
        Ok(response)
    }

    fn check_crc(&self, data: &[u8], received: u16) -> Result<(), ModbusError> {
        let expected = calculate_crc16(data);
        if expected != received {
            return Err(ModbusError::InvalidCrc { expected, received });
        }
        Ok(())
    }

    fn read_registers<T: Read + Write>(
        &self,
        client: &mut T,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        if count == 0 || count > 125 {
            return Err(ModbusError::ProtocolError(
                "Invalid register count. Must be between 1 and 125".to_string(),
            ));
        }

        let request = frame(self.id, function, address, count);
        let response = self.send_receive(client, &request, function)?;

        let byte_count = response[2] as usize;
        if byte_count != (count * 2) as usize {
            return Err(ModbusError::ProtocolError(format!(
                "Unexpected byte count. Expected {}, received {}",
                count * 2,
                byte_count
            )));
        }

        Ok(response[3..]
            .chunks_exact(2)
            .map(|word| u16::from_be_bytes([word[0], word[1]]))
            .collect())
    }

    pub fn read_input_registers<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_registers(client, FunctionCode::ReadInputRegisters, address, count)
    }

    pub fn read_input_register<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
    ) -> Result<u16, ModbusError> {
        let registers = self.read_input_registers(client, address, 1)?;
        Ok(registers[0])
    }

    pub fn write_single_register<T: Read + Write>(
        &self,
        client: &mut T,
        address: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        let request = frame(self.id, FunctionCode::WriteSingleRegister, address, value);
        let response = self.send_receive(client, &request, FunctionCode::WriteSingleRegister)?;

        let resp_address = u16::from_be_bytes([response[2], response[3]]);
        if resp_address != address {
            return Err(ModbusError::ProtocolError(format!(
                "Unexpected register address in response. Expected {}, received {}",
                address, resp_address
            )));
        }

        let resp_value = u16::from_be_bytes([response[4], response[5]]);
        if resp_value != value {
            return Err(ModbusError::ProtocolError(format!(
                "Unexpected register value in response. Expected {}, received {}",
                value, resp_value
            )));
        }

        Ok(())
    }
}

/// Scripted byte stream for exercising device drivers without hardware.
///
/// Everything written is captured, reads are served from the queued
/// responses.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct MockTransport {
    pub written: Vec<u8>,
    responses: std::collections::VecDeque<u8>,
}

#[cfg(any(test, feature = "test-util"))]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response frame, appending its CRC.
    pub fn respond(&mut self, frame: &[u8]) {
        let crc = calculate_crc16(frame);
        self.responses.extend(frame.iter().copied());
        self.responses.extend(crc.to_le_bytes());
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.responses.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_known_frame() {
        // Read holding registers 0..1 from slave 1.
        assert_eq!(calculate_crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
    }

    #[test]
    fn read_input_registers_decodes_words() {
        let modbus = Modbus::new(2);
        let mut transport = MockTransport::new();
        transport.respond(&[0x02, 0x04, 0x04, 0x12, 0x34, 0xFF, 0xFE]);

        let registers = modbus.read_input_registers(&mut transport, 0, 2).unwrap();

        assert_eq!(registers, vec![0x1234, 0xFFFE]);
        assert_eq!(&transport.written[..6], &[0x02, 0x04, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn write_single_register_checks_echo() {
        let modbus = Modbus::new(1);
        let mut transport = MockTransport::new();
        transport.respond(&[0x01, 0x06, 0x00, 0x03, 0x40, 0x00]);

        modbus
            .write_single_register(&mut transport, 3, 0x4000)
            .unwrap();

        let mut transport = MockTransport::new();
        transport.respond(&[0x01, 0x06, 0x00, 0x03, 0x00, 0x00]);
        let err = modbus
            .write_single_register(&mut transport, 3, 0x4000)
            .unwrap_err();
        assert!(matches!(err, ModbusError::ProtocolError(_)));
    }

    #[test]
    fn exception_response_is_reported() {
        let modbus = Modbus::new(1);
        let mut transport = MockTransport::new();
        transport.respond(&[0x01, 0x86, 0x02]);

        let err = modbus
            .write_single_register(&mut transport, 9, 1)
            .unwrap_err();

        assert!(matches!(
            err,
            ModbusError::ExceptionResponse {
                function_code: 0x06,
                exception_code: 0x02
            }
        ));
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let modbus = Modbus::new(1);
        let mut transport = MockTransport::new();
        transport.respond(&[0x01, 0x04, 0x02, 0x00, 0x01]);
        // Flip the last CRC byte.
        if let Some(last) = transport.responses.back_mut() {
            *last ^= 0xFF;
        }

        let err = modbus.read_input_register(&mut transport, 0).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidCrc { .. }));
    }

    #[test]
    fn wrong_slave_is_rejected() {
        let modbus = Modbus::new(1);
        let mut transport = MockTransport::new();
        transport.respond(&[0x05, 0x04, 0x02, 0x00, 0x01]);

        let err = modbus.read_input_register(&mut transport, 0).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::InvalidSlaveId {
                expected: 1,
                received: 5
            }
        ));
    }
}
