pub mod log;

pub use log::LogAlertSink;
