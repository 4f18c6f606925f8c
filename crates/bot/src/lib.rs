//! Process wiring for the arbitrage bot

pub mod logging;
pub mod settings;
pub mod shutdown;

pub use logging::{init_logging, LogFormat};
pub use shutdown::ShutdownController;
