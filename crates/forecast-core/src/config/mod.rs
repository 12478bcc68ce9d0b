#[allow(clippy::module_inception)]
pub mod config;
pub use config::{ForecastConfig, ServerConfig, ToolCallPolicy};
