//! In-memory analog I/O backend.
//!
//! Outputs keep the last written voltage, inputs hold whatever was set on
//! them. An output can be wired to an input so that written voltages show up
//! as feedback, which is how a stage with position sensors behaves when it
//! tracks its command perfectly.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use tracing::debug;

use crate::{
    analog_io::{AnalogIo, ChannelRegistry},
    error::IoError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub device: String,
    pub channel: String,
    pub volts: f64,
}

#[derive(Debug, Default)]
struct SimulatedState {
    voltages: HashMap<String, f64>,
    loopback: HashMap<String, String>,
    failing: HashSet<String>,
    writes: Vec<WriteRecord>,
    reads: usize,
}

#[derive(Debug)]
pub struct SimulatedAnalogIo {
    device: String,
    registry: ChannelRegistry,
    state: Mutex<SimulatedState>,
}

impl SimulatedAnalogIo {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            registry: ChannelRegistry::new(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Mirror every write on `output` into `input`.
    pub fn with_loopback(self, output: &str, input: &str) -> Self {
        self.lock()
            .loopback
            .insert(output.to_string(), input.to_string());
        self
    }

    pub fn set_voltage(&self, channel: &str, volts: f64) {
        self.lock().voltages.insert(channel.to_string(), volts);
    }

    pub fn voltage(&self, channel: &str) -> Option<f64> {
        self.lock().voltages.get(channel).copied()
    }

    /// Make every following access to `channel` fail with a device fault.
    pub fn fail_channel(&self, channel: &str) {
        self.lock().failing.insert(channel.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_device(&self, device: &str) -> Result<(), IoError> {
        if device != self.device {
            return Err(IoError::UnknownDevice(device.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AnalogIo for SimulatedAnalogIo {
    async fn write_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), IoError> {
        self.check_device(device)?;
        let _lease = self.registry.acquire(device, channel)?;

        let mut state = self.lock();
        if state.failing.contains(channel) {
            return Err(IoError::Device(format!("simulated fault on {channel}")));
        }

        debug!("Simulated write {:.4} V to {}/{}", volts, device, channel);
        state.voltages.insert(channel.to_string(), volts);
        if let Some(input) = state.loopback.get(channel).cloned() {
            state.voltages.insert(input, volts);
        }
        state.writes.push(WriteRecord {
            device: device.to_string(),
            channel: channel.to_string(),
            volts,
        });

        Ok(())
    }

    async fn read_voltage(&self, device: &str, channel: &str) -> Result<f64, IoError> {
        self.check_device(device)?;
        let _lease = self.registry.acquire(device, channel)?;

        let mut state = self.lock();
        if state.failing.contains(channel) {
            return Err(IoError::Device(format!("simulated fault on {channel}")));
        }

        state.reads += 1;
        state
            .voltages
            .get(channel)
            .copied()
            .ok_or_else(|| IoError::UnknownChannel {
                device: device.to_string(),
                channel: channel.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_mirrors_writes() {
        let io = SimulatedAnalogIo::new("Dev1").with_loopback("ao0", "ai0");

        io.write_voltage("Dev1", "ao0", 2.5).await.unwrap();

        assert_eq!(io.read_voltage("Dev1", "ai0").await.unwrap(), 2.5);
        assert_eq!(io.voltage("ao0"), Some(2.5));
        assert_eq!(io.read_count(), 1);
        assert_eq!(
            io.writes(),
            vec![WriteRecord {
                device: "Dev1".into(),
                channel: "ao0".into(),
                volts: 2.5
            }]
        );
    }

    #[tokio::test]
    async fn unknown_input_and_device_are_errors() {
        let io = SimulatedAnalogIo::new("Dev1");

        assert!(matches!(
            io.read_voltage("Dev1", "ai5").await,
            Err(IoError::UnknownChannel { .. })
        ));
        assert!(matches!(
            io.write_voltage("Dev9", "ao0", 1.0).await,
            Err(IoError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn injected_fault_releases_channel() {
        let io = SimulatedAnalogIo::new("Dev1");
        io.fail_channel("ao1");

        let err = io.write_voltage("Dev1", "ao1", 1.0).await.unwrap_err();
        assert!(matches!(err, IoError::Device(_)));
        assert!(io.registry().is_idle());
        assert!(io.writes().is_empty());

        io.clear_failures();
        io.write_voltage("Dev1", "ao1", 1.0).await.unwrap();
    }
}
