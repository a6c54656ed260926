use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    axis::{Axis, PerAxis},
    error::ConfigError,
};

/// Static description of one stage: where its channels live, how volts map
/// to microns and how far it may travel.
#[derive(Deserialize, Debug, Serialize, Clone, PartialEq)]
pub struct PositionControllerConfig {
    pub device_name: String,

    pub write_channels: [String; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_channels: Option<[String; 3]>,

    pub scale_microns_per_volt: f64,

    pub min_position: f64,
    pub max_position: f64,

    pub settle_time_seconds: f64,
}

impl Default for PositionControllerConfig {
    fn default() -> Self {
        Self {
            device_name: String::from("Dev1"),

            write_channels: [
                String::from("ao0"),
                String::from("ao1"),
                String::from("ao2"),
            ],
            read_channels: None,

            scale_microns_per_volt: 8.0,

            min_position: 0.01,
            max_position: 40.02,

            settle_time_seconds: 0.2,
        }
    }
}

impl PositionControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }

        let mut seen = HashSet::new();
        let read_channels = self.read_channels.iter().flatten().map(|c| ("read", c));
        let write_channels = self.write_channels.iter().map(|c| ("write", c));
        for (index, (kind, channel)) in write_channels.chain(read_channels).enumerate() {
            if channel.trim().is_empty() {
                return Err(ConfigError::EmptyChannelName {
                    axis: Axis::ALL[index % 3],
                    kind,
                });
            }
            if !seen.insert(channel.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.clone()));
            }
        }

        if !self.scale_microns_per_volt.is_finite() || self.scale_microns_per_volt <= 0.0 {
            return Err(ConfigError::InvalidScale(self.scale_microns_per_volt));
        }

        if !self.min_position.is_finite()
            || !self.max_position.is_finite()
            || self.min_position >= self.max_position
        {
            return Err(ConfigError::InvalidRange {
                min: self.min_position,
                max: self.max_position,
            });
        }

        if Duration::try_from_secs_f64(self.settle_time_seconds).is_err() {
            return Err(ConfigError::InvalidSettleTime(self.settle_time_seconds));
        }

        Ok(())
    }

    pub fn has_feedback(&self) -> bool {
        self.read_channels.is_some()
    }

    pub fn write_channel(&self, axis: Axis) -> &str {
        &self.write_channels[axis.index()]
    }

    pub fn read_channel(&self, axis: Axis) -> Option<&str> {
        self.read_channels
            .as_ref()
            .map(|channels| channels[axis.index()].as_str())
    }

    pub fn write_channels(&self) -> PerAxis<&str> {
        PerAxis::from_fn(|axis| self.write_channel(axis))
    }

    /// Zero for a settle time that would not pass [`validate`](Self::validate).
    pub fn settle_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.settle_time_seconds).unwrap_or(Duration::ZERO)
    }

    pub fn microns_to_volts(&self, microns: f64) -> f64 {
        microns / self.scale_microns_per_volt
    }

    pub fn volts_to_microns(&self, volts: f64) -> f64 {
        volts * self.scale_microns_per_volt
    }

    pub fn contains(&self, microns: f64) -> bool {
        (self.min_position..=self.max_position).contains(&microns)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PositionControllerConfig::default();

        assert_eq!(config.validate(), Ok(()));
        assert!(!config.has_feedback());
        assert_relative_eq!(config.settle_time().as_secs_f64(), 0.2, epsilon = 1e-9);
        assert_eq!(config.write_channel(Axis::Z), "ao2");
    }

    #[test]
    fn conversion_round_trip() {
        let config = PositionControllerConfig {
            scale_microns_per_volt: 7.3,
            ..Default::default()
        };

        for microns in [0.01, 1.0, 12.345, 33.3333, 40.02] {
            let volts = config.microns_to_volts(microns);
            assert_relative_eq!(config.volts_to_microns(volts), microns, epsilon = 1e-12);
        }
        assert_relative_eq!(config.microns_to_volts(16.0), 16.0 / 7.3);
    }

    #[test]
    fn rejects_bad_scale() {
        for scale in [0.0, -8.0, f64::NAN, f64::INFINITY] {
            let config = PositionControllerConfig {
                scale_microns_per_volt: scale,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidScale(_))
            ));
        }
    }

    #[test]
    fn rejects_inverted_or_empty_range() {
        let config = PositionControllerConfig {
            min_position: 10.0,
            max_position: 10.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRange {
                min: 10.0,
                max: 10.0
            })
        );
    }

    #[test]
    fn rejects_negative_settle_time() {
        let config = PositionControllerConfig {
            settle_time_seconds: -0.1,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSettleTime(-0.1)));
    }

    #[test]
    fn rejects_settle_time_beyond_duration_range() {
        let config = PositionControllerConfig {
            settle_time_seconds: 1e20,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSettleTime(1e20)));
        assert_eq!(config.settle_time(), Duration::ZERO);

        let config = PositionControllerConfig {
            settle_time_seconds: f64::INFINITY,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_channel_problems() {
        let config = PositionControllerConfig {
            device_name: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyDeviceName));

        let config = PositionControllerConfig {
            read_channels: Some(["ai0".into(), "ao1".into(), "ai2".into()]),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateChannel("ao1".to_string()))
        );

        let config = PositionControllerConfig {
            read_channels: Some(["ai0".into(), "".into(), "ai2".into()]),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyChannelName {
                axis: Axis::Y,
                kind: "read"
            })
        );
    }

    #[test]
    fn toml_without_read_channels() {
        let config: PositionControllerConfig = toml::from_str(
            r#"
            device_name = "Dev2"
            write_channels = ["ao0", "ao1", "ao2"]
            scale_microns_per_volt = 10.0
            min_position = 0.0
            max_position = 100.0
            settle_time_seconds = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(config.device_name, "Dev2");
        assert_eq!(config.read_channel(Axis::X), None);
        assert_eq!(config.validate(), Ok(()));
    }
}
