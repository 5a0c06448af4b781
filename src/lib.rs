pub mod bus;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod messages;
pub mod motor;
pub mod protocol;
pub mod runtime;
pub mod shutdown;
pub mod transport;
pub mod watchdog;
