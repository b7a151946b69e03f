//! Weather tool backed by Open-Meteo (geocoding + current forecast).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolResult};

const GEOCODE_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub struct WeatherTool {
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Поточна погода в місті"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "назва міста"}
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(city) = args.get("city").and_then(Value::as_str) else {
            return ToolResult::error("city required");
        };

        let geo: Value = match self
            .client
            .get(GEOCODE_URL)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => return ToolResult::error(format!("geocoding parse failed: {e}")),
            },
            Err(e) => {
                debug!(error = %e, city, "geocoding failed");
                return ToolResult::error("geocoding failed");
            }
        };

        let Some(place) = geo.pointer("/results/0") else {
            return ToolResult::error(format!("місто не знайдено: {city}"));
        };
        let lat = place["latitude"].as_f64().unwrap_or_default();
        let lon = place["longitude"].as_f64().unwrap_or_default();
        let resolved = place["name"].as_str().unwrap_or(city);

        let forecast: Value = match self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => return ToolResult::error(format!("forecast parse failed: {e}")),
            },
            Err(e) => {
                debug!(error = %e, city, "forecast failed");
                return ToolResult::error("forecast failed");
            }
        };

        let current = forecast.get("current_weather").cloned().unwrap_or(json!({}));
        ToolResult::success(json!({
            "city": resolved,
            "temperature_c": current.get("temperature"),
            "wind_kmh": current.get("windspeed"),
            "weather_code": current.get("weathercode"),
        }))
    }
}
