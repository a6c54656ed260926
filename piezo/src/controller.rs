use tracing::{debug, error, info, instrument, warn};

use crate::{
    analog_io::AnalogIo,
    axis::{Axis, PerAxis},
    config::PositionControllerConfig,
    error::{ConfigError, ControlError, IoError, ValidationError},
    step::{StepOutcome, StepReport},
};

/// Voltage reported for every axis when the stage has no feedback channels.
pub const NO_FEEDBACK_VOLTAGE: f64 = -1.0;

/// Where the stage is, as far as the controller can tell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StagePosition {
    /// Last successfully written position per axis. `None` until the axis has
    /// been commanded for the first time.
    Commanded(PerAxis<Option<f64>>),
    /// Position converted from the feedback channels.
    Measured(PerAxis<f64>),
}

impl StagePosition {
    pub fn axis(&self, axis: Axis) -> Option<f64> {
        match self {
            StagePosition::Commanded(position) => position[axis],
            StagePosition::Measured(position) => Some(position[axis]),
        }
    }

    pub fn values(&self) -> PerAxis<Option<f64>> {
        PerAxis::from_fn(|axis| self.axis(axis))
    }
}

/// Open-loop position control of a three-axis piezo stage.
///
/// Mutating calls take `&mut self`; a controller shared between tasks must be
/// wrapped in a lock by its owner, two concurrent moves on one stage are not
/// supported.
pub struct PositionController<A: AnalogIo> {
    config: PositionControllerConfig,
    io: A,

    last_commanded_position: PerAxis<Option<f64>>,
}

impl<A: AnalogIo> PositionController<A> {
    /// Does not touch the hardware.
    pub fn new(config: PositionControllerConfig, io: A) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            device = %config.device_name,
            feedback = config.has_feedback(),
            "Initializing position controller"
        );

        Ok(Self {
            config,
            io,
            last_commanded_position: PerAxis::none(),
        })
    }

    pub fn config(&self) -> &PositionControllerConfig {
        &self.config
    }

    pub fn io(&self) -> &A {
        &self.io
    }

    pub fn last_commanded_position(&self) -> PerAxis<Option<f64>> {
        self.last_commanded_position
    }

    pub fn validate_value(&self, axis: Axis, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::InvalidType { axis, value });
        }

        if !self.config.contains(value) {
            return Err(ValidationError::OutOfRange {
                axis,
                value,
                min: self.config.min_position,
                max: self.config.max_position,
            });
        }

        Ok(())
    }

    /// Checks every present axis without moving anything.
    pub fn validate(&self, request: &PerAxis<Option<f64>>) -> Result<(), ValidationError> {
        for (axis, value) in request.present() {
            self.validate_value(axis, *value)?;
        }
        Ok(())
    }

    /// Moves the requested axes to absolute positions in microns.
    ///
    /// Axes are handled in X, Y, Z order and each one is committed as soon as
    /// its write succeeds. When an axis fails, the axes before it stay where
    /// they were sent and the axes after it are not attempted.
    #[instrument(skip(self), fields(device = %self.config.device_name))]
    pub async fn go_to_position(
        &mut self,
        request: PerAxis<Option<f64>>,
    ) -> Result<(), ControlError> {
        let mut moved = Vec::with_capacity(3);
        let mut result = Ok(());

        for (axis, microns) in request.present() {
            if let Err(e) = self.write_axis(axis, *microns).await {
                result = Err(e);
                break;
            }
            moved.push(format!("{axis}: {microns:.2}"));
        }

        if moved.is_empty() {
            return result;
        }

        info!("Go to position {}", moved.join(" "));

        // Settle even when a later axis failed: earlier axes did move.
        tokio::time::sleep(self.config.settle_time()).await;
        debug!("Last write: {:?}", self.last_commanded_position);

        result
    }

    async fn write_axis(&mut self, axis: Axis, microns: f64) -> Result<(), ControlError> {
        self.validate_value(axis, microns)?;

        let volts = self.config.microns_to_volts(microns);
        let channel = self.config.write_channel(axis);

        if let Err(source) = self
            .io
            .write_voltage(&self.config.device_name, channel, volts)
            .await
        {
            error!("Failed to write {:.4} V to {} ({}): {}", volts, axis, channel, source);
            return Err(ControlError::HardwareWriteFailure {
                axis,
                channel: channel.to_string(),
                volts,
                source,
            });
        }

        self.last_commanded_position[axis] = Some(microns);
        Ok(())
    }

    /// Nudges the requested axes by relative amounts in microns.
    ///
    /// All deltas are taken from one position snapshot. A step that would
    /// leave the travel range is logged and reported as
    /// [`StepOutcome::OutOfRange`] while the other axes still step; every
    /// other failure is returned.
    #[instrument(skip(self), fields(device = %self.config.device_name))]
    pub async fn step(&mut self, deltas: PerAxis<Option<f64>>) -> Result<StepReport, ControlError> {
        let mut report = StepReport::default();

        let requested: Vec<(Axis, f64)> = deltas
            .present()
            .filter(|(_, delta)| **delta != 0.0)
            .map(|(axis, delta)| (axis, *delta))
            .collect();

        if requested.is_empty() {
            return Ok(report);
        }

        let snapshot = self.get_current_position().await?;

        let mut plan = Vec::with_capacity(requested.len());
        for (axis, delta) in requested {
            let from = snapshot
                .axis(axis)
                .ok_or(ControlError::UnknownPosition(axis))?;
            plan.push((axis, from, from + delta));
        }

        for (axis, from, to) in plan {
            match self.go_to_position(PerAxis::only(axis, to)).await {
                Ok(()) => report[axis] = StepOutcome::Moved { from, to },
                Err(e) if e.is_out_of_range() => {
                    warn!(
                        "Trying to step {} outside of allowed range ({:.2}, {:.2}): {}",
                        axis, self.config.min_position, self.config.max_position, e
                    );
                    report[axis] = StepOutcome::OutOfRange { target: to };
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Current stage position in microns.
    ///
    /// Without feedback channels this is the last commanded position, with
    /// unset axes reported as unknown.
    pub async fn get_current_position(&self) -> Result<StagePosition, ControlError> {
        if !self.config.has_feedback() {
            return Ok(StagePosition::Commanded(self.last_commanded_position));
        }

        let voltages = self.get_current_voltage().await?;
        let measured = PerAxis::from_fn(|axis| {
            let microns = self.config.volts_to_microns(voltages[axis]);
            let clamped = microns.clamp(self.config.min_position, self.config.max_position);
            if clamped != microns {
                warn!(
                    "Measured {} position {:.3} is outside of the travel range, reporting {:.3}",
                    axis, microns, clamped
                );
            }
            clamped
        });

        Ok(StagePosition::Measured(measured))
    }

    /// Raw feedback voltages, or [`NO_FEEDBACK_VOLTAGE`] on every axis when
    /// the stage has no feedback channels.
    pub async fn get_current_voltage(&self) -> Result<PerAxis<f64>, ControlError> {
        let Some(channels) = &self.config.read_channels else {
            return Ok(PerAxis::new(
                NO_FEEDBACK_VOLTAGE,
                NO_FEEDBACK_VOLTAGE,
                NO_FEEDBACK_VOLTAGE,
            ));
        };

        let (x, y, z) = tokio::join!(
            self.read_axis(Axis::X, &channels[0]),
            self.read_axis(Axis::Y, &channels[1]),
            self.read_axis(Axis::Z, &channels[2])
        );

        let voltages = PerAxis::new(x?, y?, z?);
        debug!("Feedback voltages: {:?}", voltages);
        Ok(voltages)
    }

    async fn read_axis(&self, axis: Axis, channel: &str) -> Result<f64, ControlError> {
        let result = match self
            .io
            .read_voltage(&self.config.device_name, channel)
            .await
        {
            Ok(volts) if !volts.is_finite() => Err(IoError::Device(format!(
                "non-finite reading {volts}"
            ))),
            result => result,
        };

        result.map_err(|source| {
            error!("Failed to read {} feedback ({}): {}", axis, channel, source);
            ControlError::HardwareReadFailure {
                axis,
                channel: channel.to_string(),
                source,
            }
        })
    }
}
