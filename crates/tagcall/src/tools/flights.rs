use std::future::ready;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tagcall_core::tool::{
    Error as ToolError, Schema, Tool, ToolExample, ToolResult,
};

const AIRLINES: [&str; 4] = ["LX", "LH", "UA", "BA"];
const MAX_RESULTS: u32 = 3;

/// Input of [`FlightSearchTool`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FlightSearchParameters {
    /// Departure city.
    pub from: String,
    /// Arrival city.
    pub to: String,
    /// Travel date as YYYY-MM-DD.
    pub date: String,
}

/// Lists flights between two cities on a given day.
///
/// Like [`WeatherTool`](super::WeatherTool), the results are made up from
/// the input and stable across calls.
pub struct FlightSearchTool {
    parameters: Schema,
    examples: Vec<ToolExample>,
}

impl FlightSearchTool {
    /// Creates a new flight search tool.
    pub fn new() -> Self {
        FlightSearchTool {
            parameters: super::parameters_of::<FlightSearchParameters>(),
            examples: vec![
                ToolExample::new(
                    "Find me a flight from Zurich to Berlin on May 5th 2025",
                    json!({
                        "from": "Zurich",
                        "to": "Berlin",
                        "date": "2025-05-05",
                    }),
                ),
                ToolExample::new(
                    "Are there any flights from New York to San Francisco on 2025-05-10?",
                    json!({
                        "from": "New York",
                        "to": "San Francisco",
                        "date": "2025-05-10",
                    }),
                ),
            ],
        }
    }
}

impl Default for FlightSearchTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FlightSearchTool {
    type Input = FlightSearchParameters;

    fn name(&self) -> &str {
        "searchFlights"
    }

    fn description(&self) -> &str {
        "Search for flights between two cities on a given date."
    }

    fn parameters(&self) -> &Schema {
        &self.parameters
    }

    fn examples(&self) -> &[ToolExample] {
        &self.examples
    }

    fn execute(
        &self,
        input: FlightSearchParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(search(&input))
    }
}

fn search(input: &FlightSearchParameters) -> ToolResult {
    let from = input.from.trim();
    let to = input.to.trim();
    let date = input.date.trim();
    if from.is_empty() || to.is_empty() {
        return Err(ToolError::invalid_input()
            .with_reason("`from` and `to` must not be empty"));
    }
    if from.eq_ignore_ascii_case(to) {
        return Err(ToolError::invalid_input()
            .with_reason("`from` and `to` must be different cities"));
    }
    if !is_valid_date(date) {
        return Err(ToolError::invalid_input()
            .with_reason("`date` must be formatted as YYYY-MM-DD"));
    }

    let seed = super::seed_of(&format!("{from}|{to}|{date}"));
    let mut result = format!("Flights from {from} to {to} on {date}:");
    for idx in 0..MAX_RESULTS {
        let n = seed.wrapping_add(idx.wrapping_mul(7919));
        let airline = AIRLINES[n as usize % AIRLINES.len()];
        let number = 100 + n % 900;
        let departs = 6 * 60 + (n % 12) * 75 % (16 * 60);
        let duration = 60 + (seed % 360);
        let arrives = (departs + duration) % (24 * 60);
        let price = 90 + (n / 3) % 600;
        result.push_str(&format!(
            "\n- {airline} {number}: departs {}, arrives {}, {price} USD",
            clock(departs),
            clock(arrives),
        ));
    }
    Ok(result)
}

fn clock(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn is_valid_date(date: &str) -> bool {
    let parts = date.split('-').collect::<Vec<_>>();
    let &[year, month, day] = parts.as_slice() else {
        return false;
    };
    let digits = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(year, 4) || !digits(month, 2) || !digits(day, 2) {
        return false;
    }
    let (Ok(month), Ok(day)) = (month.parse::<u32>(), day.parse::<u32>())
    else {
        return false;
    };
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(from: &str, to: &str, date: &str) -> FlightSearchParameters {
        FlightSearchParameters {
            from: from.to_owned(),
            to: to.to_owned(),
            date: date.to_owned(),
        }
    }

    #[tokio::test]
    async fn test_search() {
        let tool = FlightSearchTool::new();
        let result = tool
            .execute(params("Zurich", "Berlin", "2025-05-05"))
            .await
            .unwrap();
        let mut lines = result.lines();
        assert_eq!(
            lines.next(),
            Some("Flights from Zurich to Berlin on 2025-05-05:")
        );
        assert_eq!(lines.filter(|l| l.starts_with("- ")).count(), 3);

        let again = tool
            .execute(params("Zurich", "Berlin", "2025-05-05"))
            .await
            .unwrap();
        assert_eq!(result, again);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let tool = FlightSearchTool::new();
        for input in [
            params("Zurich", "zurich", "2025-05-05"),
            params("", "Berlin", "2025-05-05"),
            params("Zurich", "Berlin", "May 5th"),
            params("Zurich", "Berlin", "2025-13-05"),
        ] {
            let err = tool.execute(input).await.unwrap_err();
            assert_eq!(err.kind(), tagcall_core::tool::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_dates() {
        assert!(is_valid_date("2025-05-10"));
        assert!(!is_valid_date("2025-5-10"));
        assert!(!is_valid_date("2025-05-32"));
        assert!(!is_valid_date("2025-05"));
    }

    #[test]
    fn test_parameters_keep_declaration_order() {
        let tool = FlightSearchTool::new();
        let names = tool
            .parameters()
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["from", "to", "date"]);
        assert_eq!(tool.examples().len(), 2);
    }
}
