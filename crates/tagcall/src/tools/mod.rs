//! The demo tools shipped with the CLI.

mod flights;
mod weather;

use schemars::{JsonSchema, schema_for};
use tagcall_core::tool::Schema;

pub use flights::{FlightSearchParameters, FlightSearchTool};
pub use weather::{WeatherParameters, WeatherTool};

/// Derives the tagged parameter schema of `T`.
fn parameters_of<T: JsonSchema>() -> Schema {
    let document = schema_for!(T).to_value();
    match Schema::from_json_schema(&document) {
        Ok(schema) => schema,
        Err(err) => {
            error!("cannot convert parameter schema: {err}");
            Schema::object()
        }
    }
}

/// Sums the characters of `text`, ignoring case, into a stable seed.
fn seed_of(text: &str) -> u32 {
    text.trim().chars().fold(7u32, |acc, ch| {
        acc.wrapping_mul(31)
            .wrapping_add(ch.to_lowercase().next().unwrap_or(ch) as u32)
    })
}
