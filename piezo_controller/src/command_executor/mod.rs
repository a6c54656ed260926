use std::{sync::Arc, time::Duration};

use icpcon::{M7017, M7024};
use piezo::{AnalogIo, SimulatedAnalogIo};
use tracing::info;
use utilities::{command_executor::CommandExecutor, lazy_tcp::LazyTcpStream};

use crate::config::{AppConfig, BackendConfig};
use analog::{AnalogHandler, command_sender::AnalogCommandSender};

pub mod analog;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
pub const CONNECT_RETRIES: u32 = 3;

/// Builds the voltage backend selected in the configuration.
///
/// Hardware backends get their own executor thread which lives as long as
/// the returned handle.
pub fn create_analog_io(config: &AppConfig) -> Arc<dyn AnalogIo> {
    let stage = &config.stage;

    match &config.backend {
        BackendConfig::Simulated => {
            let mut io = SimulatedAnalogIo::new(stage.device_name.clone());
            if let Some(read_channels) = &stage.read_channels {
                for (output, input) in stage.write_channels.iter().zip(read_channels) {
                    io = io.with_loopback(output, input);
                    io.set_voltage(input, 0.0);
                }
            }
            info!("Using simulated analog I/O for {}", stage.device_name);
            Arc::new(io)
        }
        BackendConfig::Icpcon {
            ip,
            port,
            output_module_id,
            input_module_id,
            output_range,
        } => {
            let tcp_stream = LazyTcpStream::new(
                format!("{}:{}", ip, port),
                CONNECT_RETRIES,
                READ_TIMEOUT,
                WRITE_TIMEOUT,
                CONNECT_TIMEOUT,
            );
            let handler = AnalogHandler::new(
                tcp_stream,
                M7024::new(*output_module_id, *output_range),
                input_module_id.map(M7017::new),
            );

            let executor = CommandExecutor::new(handler);
            let sender =
                AnalogCommandSender::new(executor.sender(), &stage.device_name, *output_range);
            executor.spawn();

            info!(
                "Using ICP DAS modules at {}:{} (output {}, input {:?})",
                ip, port, output_module_id, input_module_id
            );
            Arc::new(sender)
        }
    }
}
