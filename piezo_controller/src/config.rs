use anyhow::Context as _;
use icpcon::{M7017, M7024, OutputRange};
use piezo::PositionControllerConfig;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::command_executor::analog::{ChannelKind, parse_channel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory channels, outputs looped back onto the feedback inputs.
    Simulated,
    /// ICP DAS M-7024 (outputs) and optional M-7017 (feedback) behind a
    /// Modbus TCP-to-RTU gateway.
    Icpcon {
        ip: String,
        port: u16,
        output_module_id: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_module_id: Option<u8>,
        #[serde(default)]
        output_range: OutputRange,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub socket_path: PathBuf,
    pub stage: PositionControllerConfig,
    pub backend: BackendConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/piezo_controller.sock"),
            stage: PositionControllerConfig::default(),
            backend: BackendConfig::Simulated,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stage
            .validate()
            .map_err(|e| ConfigError::ValidationError {
                message: e.to_string(),
            })?;

        let BackendConfig::Icpcon {
            input_module_id, ..
        } = &self.backend
        else {
            return Ok(());
        };

        for channel in &self.stage.write_channels {
            match parse_channel(channel) {
                Some((ChannelKind::Output, n)) if n < M7024::CHANNELS => {}
                _ => {
                    return Err(ConfigError::ValidationError {
                        message: format!("{} is not an M-7024 output (ao0..ao3)", channel),
                    });
                }
            }
        }

        if let Some(read_channels) = &self.stage.read_channels {
            if input_module_id.is_none() {
                return Err(ConfigError::ValidationError {
                    message: "read channels need an input_module_id".to_string(),
                });
            }

            for channel in read_channels {
                match parse_channel(channel) {
                    Some((ChannelKind::Input, n)) if n < M7017::CHANNELS => {}
                    _ => {
                        return Err(ConfigError::ValidationError {
                            message: format!("{} is not an M-7017 input (ai0..ai7)", channel),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = AppConfig::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            } else {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, AppConfig)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    });
    manager.save(&AppConfig::default())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icpcon_config() -> AppConfig {
        AppConfig {
            backend: BackendConfig::Icpcon {
                ip: "192.168.1.50".to_string(),
                port: 4001,
                output_module_id: 1,
                input_module_id: Some(2),
                output_range: OutputRange::Unipolar10V,
            },
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let manager = ConfigManager::with_options(ConfigOptions::with_path(&path));
        let config = manager.load().unwrap();

        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // Second load reads the file that was just written.
        assert_eq!(manager.load().unwrap(), AppConfig::default());
    }

    #[test]
    fn missing_file_without_create_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_options(ConfigOptions {
            config_path: dir.path().join("absent.toml"),
            create_if_missing: false,
        });

        let err = manager.load().unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn icpcon_backend_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        create_default_config(Some(&path)).unwrap();

        let manager = ConfigManager::with_options(ConfigOptions::with_path(&path));
        manager.save(&icpcon_config()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("kind = \"icpcon\""));
        assert!(content.contains("output_range = \"unipolar_10v\""));

        assert_eq!(manager.load().unwrap(), icpcon_config());
    }

    #[test]
    fn invalid_stage_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let manager = ConfigManager::with_options(ConfigOptions::with_path(&path));

        let mut config = AppConfig::default();
        config.stage.scale_microns_per_volt = 0.0;
        manager.save(&config).unwrap();

        let err = manager.load().unwrap_err();
        assert!(err.to_string().contains("validation failed"), "{err}");
    }

    #[test]
    fn icpcon_channels_must_exist_on_modules() {
        let mut config = icpcon_config();
        config.stage.write_channels[2] = "ao4".to_string();
        assert!(config.validate().is_err());

        // Another spelling of ao1 would put two axes on one output.
        let mut config = icpcon_config();
        config.stage.write_channels[2] = "ao01".to_string();
        assert!(config.validate().is_err());

        let mut config = icpcon_config();
        config.stage.read_channels = Some(["ai0".into(), "ai1".into(), "ao2".into()]);
        assert!(config.validate().is_err());

        let mut config = icpcon_config();
        config.stage.read_channels = Some(["ai0".into(), "ai1".into(), "ai7".into()]);
        assert!(config.validate().is_ok());

        if let BackendConfig::Icpcon {
            input_module_id, ..
        } = &mut config.backend
        {
            *input_module_id = None;
        }
        assert!(config.validate().is_err());
    }
}
