pub mod config;
pub mod usage;

pub use config::{load_config, save_config, validate_config};
pub use usage::UsageRecorder;
