pub mod command_executor;
pub mod lazy_tcp;
pub mod modbus;
