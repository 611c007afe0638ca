//! Runtime adapters for Mender (config, logging, on-disk projects).

pub mod config;
pub mod logging;
pub mod workspace;

pub use config::{LoggingSettings, MenderConfig};
pub use logging::init_logging;
pub use workspace::{load_snapshot, DiskStore};
