//! Voltage I/O seam between the position controller and the hardware.
//!
//! Backends implement [`AnalogIo`]. Each call is expected to hold a
//! [`ChannelLease`] for the channel it touches, which plays the role of a
//! short-lived hardware task: acquired on entry, released on every exit path
//! when the lease is dropped.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use tracing::trace;

use crate::error::IoError;

/// Analog voltage access on named channels scoped to a device.
#[async_trait::async_trait]
pub trait AnalogIo: Send + Sync {
    async fn write_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), IoError>;

    async fn read_voltage(&self, device: &str, channel: &str) -> Result<f64, IoError>;
}

#[async_trait::async_trait]
impl<T: AnalogIo + ?Sized> AnalogIo for Arc<T> {
    async fn write_voltage(&self, device: &str, channel: &str, volts: f64) -> Result<(), IoError> {
        (**self).write_voltage(device, channel, volts).await
    }

    async fn read_voltage(&self, device: &str, channel: &str) -> Result<f64, IoError> {
        (**self).read_voltage(device, channel).await
    }
}

/// Tracks which channels currently have an open task.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    open: Arc<Mutex<HashSet<String>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `device/channel` for the lifetime of the returned lease.
    pub fn acquire(&self, device: &str, channel: &str) -> Result<ChannelLease, IoError> {
        let key = format!("{device}/{channel}");
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());

        if !open.insert(key.clone()) {
            return Err(IoError::ChannelBusy {
                device: device.to_string(),
                channel: channel.to_string(),
            });
        }

        trace!("Opened channel task {}", key);
        Ok(ChannelLease {
            key,
            open: self.open.clone(),
        })
    }

    pub fn open_channels(&self) -> Vec<String> {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        let mut channels: Vec<String> = open.iter().cloned().collect();
        channels.sort();
        channels
    }

    pub fn is_idle(&self) -> bool {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

/// An open channel task, closed on drop.
#[derive(Debug)]
pub struct ChannelLease {
    key: String,
    open: Arc<Mutex<HashSet<String>>>,
}

impl ChannelLease {
    pub fn name(&self) -> &str {
        &self.key
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        open.remove(&self.key);
        trace!("Closed channel task {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_released_on_drop() {
        let registry = ChannelRegistry::new();

        {
            let lease = registry.acquire("Dev1", "ao0").unwrap();
            assert_eq!(lease.name(), "Dev1/ao0");
            assert_eq!(registry.open_channels(), vec!["Dev1/ao0".to_string()]);
        }

        assert!(registry.is_idle());
    }

    #[test]
    fn second_lease_on_same_channel_is_busy() {
        let registry = ChannelRegistry::new();
        let _lease = registry.acquire("Dev1", "ao0").unwrap();

        let err = registry.acquire("Dev1", "ao0").unwrap_err();
        assert!(matches!(err, IoError::ChannelBusy { .. }));

        // Different channels and devices are independent.
        let _other = registry.acquire("Dev1", "ao1").unwrap();
        let _other_device = registry.acquire("Dev2", "ao0").unwrap();
        assert_eq!(registry.open_channels().len(), 3);
    }
}
