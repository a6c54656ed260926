use crate::axis::Axis;

/// Rejection of a requested position before any hardware is touched.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{axis} value {value} is not a valid number")]
    InvalidType { axis: Axis, value: f64 },

    #[error("{axis} value {value:.2} is outside the allowed range [{min:.2}, {max:.2}]")]
    OutOfRange {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl ValidationError {
    pub fn axis(&self) -> Axis {
        match self {
            ValidationError::InvalidType { axis, .. } | ValidationError::OutOfRange { axis, .. } => {
                *axis
            }
        }
    }
}

/// Fault reported by an analog I/O backend.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("channel {channel} on {device} is already in use")]
    ChannelBusy { device: String, channel: String },

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("unknown channel {channel} on {device}")]
    UnknownChannel { device: String, channel: String },

    #[error("{volts:.4} V is outside the output range of {channel}")]
    VoltageOutOfRange { channel: String, volts: f64 },

    #[error("device fault: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to write {volts:.4} V to {axis} channel {channel}: {source}")]
    HardwareWriteFailure {
        axis: Axis,
        channel: String,
        volts: f64,
        #[source]
        source: IoError,
    },

    #[error("failed to read {axis} feedback channel {channel}: {source}")]
    HardwareReadFailure {
        axis: Axis,
        channel: String,
        #[source]
        source: IoError,
    },

    #[error("{0} position is unknown, command an absolute move first")]
    UnknownPosition(Axis),
}

impl ControlError {
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            ControlError::Validation(ValidationError::OutOfRange { .. })
        )
    }
}

/// Invalid stage configuration, detected before a controller is built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("device name must not be empty")]
    EmptyDeviceName,

    #[error("{axis} {kind} channel name must not be empty")]
    EmptyChannelName { axis: Axis, kind: &'static str },

    #[error("channel {0} is assigned more than once")]
    DuplicateChannel(String),

    #[error("scale must be a positive finite number, got {0}")]
    InvalidScale(f64),

    #[error("position range [{min}, {max}] is invalid, min must be below max")]
    InvalidRange { min: f64, max: f64 },

    #[error("settle time must be a non-negative finite number of seconds, got {0}")]
    InvalidSettleTime(f64),
}
