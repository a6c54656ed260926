//! Open-loop position control for three-axis piezo nanopositioning stages
//! driven by analog voltages.
//!
//! [`PositionController`] turns micron targets into voltages, keeps every
//! command inside the configured travel range and, when the stage has
//! feedback channels, reads the actual position back. Voltage access goes
//! through the [`AnalogIo`] trait so the same controller drives real
//! hardware or [`SimulatedAnalogIo`].

pub mod analog_io;
pub mod axis;
pub mod config;
pub mod controller;
pub mod error;
pub mod simulated;
pub mod step;

pub use analog_io::{AnalogIo, ChannelLease, ChannelRegistry};
pub use axis::{Axis, PerAxis};
pub use config::PositionControllerConfig;
pub use controller::{NO_FEEDBACK_VOLTAGE, PositionController, StagePosition};
pub use error::{ConfigError, ControlError, IoError, ValidationError};
pub use simulated::SimulatedAnalogIo;
pub use step::{StepOutcome, StepReport};
