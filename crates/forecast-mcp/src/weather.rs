use anyhow::Result;
use async_trait::async_trait;
use forecast_core::{CallToolResult, ToolHandler};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

pub const TOOL_NAME: &str = "getWeatherDataByCityName";

/// What the provider knows about one city. `temp` is always present, `null`
/// when the city is unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub temp: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl WeatherReport {
    fn known(temp: &'static str, forecast: &'static str) -> Self {
        Self {
            temp: Some(temp),
            forecast: Some(forecast),
            error: None,
        }
    }

    fn unavailable() -> Self {
        Self {
            temp: None,
            forecast: None,
            error: Some("Weather data not available for this city"),
        }
    }
}

/// Canned weather for the supported cities; the match ignores case.
pub fn lookup(city: &str) -> WeatherReport {
    match city.trim().to_lowercase().as_str() {
        "aleppo" => WeatherReport::known("21°C", "Sunny with clear skies"),
        "istanbul" => WeatherReport::known("18°C", "Partly cloudy with mild breeze"),
        _ => WeatherReport::unavailable(),
    }
}

pub struct WeatherTool;

#[async_trait]
impl ToolHandler for WeatherTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> Option<&str> {
        Some("Get weather data for Aleppo or Istanbul")
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "Name of the city to get weather for" }
            },
            "required": ["city"]
        })
    }

    async fn call(&self, args: Value) -> Result<CallToolResult> {
        let city = args["city"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing city argument"))?;
        let report = lookup(city);
        debug!("weather for {}: {:?}", city, report);
        Ok(CallToolResult::ok(serde_json::to_string(&report)?))
    }
}
