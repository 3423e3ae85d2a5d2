use std::future::ready;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tagcall_core::tool::{
    Error as ToolError, Schema, Tool, ToolExample, ToolResult,
};

const CONDITIONS: [&str; 5] =
    ["sunny", "partly cloudy", "overcast", "rainy", "windy"];

/// Input of [`WeatherTool`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WeatherParameters {
    /// City name, e.g. Bern.
    pub location: String,
}

/// Reports the current weather of a city.
///
/// The report is made up from the city name, so asking twice gives the
/// same answer.
pub struct WeatherTool {
    parameters: Schema,
    examples: Vec<ToolExample>,
}

impl WeatherTool {
    /// Creates a new weather tool.
    pub fn new() -> Self {
        WeatherTool {
            parameters: super::parameters_of::<WeatherParameters>(),
            examples: vec![
                ToolExample::new(
                    "What's the weather like in Bern?",
                    json!({ "location": "Bern" }),
                ),
                ToolExample::new(
                    "Do I need an umbrella in London today?",
                    json!({ "location": "London" }),
                ),
            ],
        }
    }
}

impl Default for WeatherTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for WeatherTool {
    type Input = WeatherParameters;

    fn name(&self) -> &str {
        "getWeather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location."
    }

    fn parameters(&self) -> &Schema {
        &self.parameters
    }

    fn examples(&self) -> &[ToolExample] {
        &self.examples
    }

    fn execute(
        &self,
        input: WeatherParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(report(input.location.trim()))
    }
}

fn report(location: &str) -> ToolResult {
    if location.is_empty() {
        return Err(ToolError::invalid_input()
            .with_reason("`location` must not be empty"));
    }
    let seed = super::seed_of(location);
    let condition = CONDITIONS[seed as usize % CONDITIONS.len()];
    let celsius = (seed / 7 % 35) as i32 - 5;
    Ok(format!("The weather in {location} is {condition}, {celsius}°C."))
}
