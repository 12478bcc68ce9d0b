pub mod cities;
pub mod weather;

use std::sync::Arc;

use forecast_core::{CapabilityRegistry, Implementation, McpServer};

pub use cities::{cities_resource, CITIES_URI};
pub use weather::{lookup, WeatherReport, WeatherTool, TOOL_NAME};

pub const SERVER_NAME: &str = "Weather Data Fetcher";
pub const SERVER_VERSION: &str = "1.0.0";

pub fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register_tool(Arc::new(WeatherTool));
    registry.register_resource(Arc::new(cities_resource()));
    registry
}

/// The weather provider, ready to serve over any byte stream.
pub fn server() -> McpServer {
    McpServer::new(
        Implementation {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
        },
        registry(),
    )
}
