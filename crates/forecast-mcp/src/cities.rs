use forecast_core::{ResourceDescriptor, StaticResource};

pub const CITIES_URI: &str = "weather://cities";

const CITIES_TEXT: &str = "Supported Cities:\n- Aleppo (Syria)\n- Istanbul (Turkey)";

/// Plain-text list of the cities the weather tool knows about.
pub fn cities_resource() -> StaticResource {
    StaticResource::new(
        ResourceDescriptor {
            uri: CITIES_URI.to_string(),
            name: "cities".to_string(),
            description: Some("List of supported cities".to_string()),
            mime_type: Some("text/plain".to_string()),
        },
        CITIES_TEXT,
    )
}
