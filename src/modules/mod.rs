pub mod event_log;
pub mod host;
pub mod monitor;
pub mod registry;
