// Library exports for the Warden process supervisor

pub mod config;
pub mod error;
pub mod logs;
pub mod process;
pub mod watch;
