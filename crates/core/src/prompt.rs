//! Rendering of the tool registry into system prompt text.

use std::fmt::{self, Display, Write};

use crate::markup::Markup;
use crate::tool::schema::{Property, Schema};
use crate::tool::{Registry, ToolSpec};

/// Renders the instructions teaching the model to call the tools in
/// `registry` with `markup`.
///
/// The output only depends on the registry contents and their order. An
/// empty registry renders to an empty string.
pub fn render(registry: &Registry, markup: &Markup) -> String {
    if registry.is_empty() {
        return String::new();
    }
    ToolsPrompt { registry, markup }.to_string()
}

/// Builds the system prompt actually sent to the model: `prefix` followed
/// by the rendered tools, if any.
pub fn system_prompt(
    prefix: &str,
    registry: &Registry,
    markup: &Markup,
) -> String {
    let tools = render(registry, markup);
    let prefix = prefix.trim_end();
    match (prefix.is_empty(), tools.is_empty()) {
        (_, true) => prefix.to_owned(),
        (true, false) => tools,
        (false, false) => format!("{prefix}\n\n{tools}"),
    }
}

struct ToolsPrompt<'a> {
    registry: &'a Registry,
    markup: &'a Markup,
}

impl Display for ToolsPrompt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Tools")?;
        writeln!(f)?;
        writeln!(
            f,
            "You can call the tools listed below. To call a tool, write a block in exactly this form:"
        )?;
        writeln!(f)?;
        writeln!(f, "{}", self.markup.template())?;
        writeln!(f)?;
        writeln!(
            f,
            "Write one block per call. You may call several tools at once. \
             The results will be sent back to you in the next message. \
             Only call the tools listed here. If no tool is needed, answer \
             directly without any block."
        )?;
        for (name, spec) in self.registry.list() {
            writeln!(f)?;
            self.write_tool(f, name, spec)?;
        }
        Ok(())
    }
}

impl ToolsPrompt<'_> {
    fn write_tool(
        &self,
        f: &mut fmt::Formatter<'_>,
        name: &str,
        spec: &ToolSpec,
    ) -> fmt::Result {
        writeln!(f, "## {name}")?;
        if !spec.description().is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", spec.description())?;
        }

        writeln!(f)?;
        let properties = spec.parameters().properties();
        if properties.is_empty() {
            writeln!(f, "Parameters: none")?;
        } else {
            writeln!(f, "Parameters:")?;
            write_properties(f, properties, 0)?;
        }

        if !spec.examples().is_empty() {
            writeln!(f)?;
            writeln!(f, "Examples:")?;
            for example in spec.examples() {
                writeln!(f, "- User: {}", example.query)?;
                writeln!(
                    f,
                    "  Call: {}",
                    self.markup.encode(name, &example.arguments)
                )?;
            }
        }
        Ok(())
    }
}

fn write_properties<W: Write>(
    f: &mut W,
    properties: &[Property],
    depth: usize,
) -> fmt::Result {
    for property in properties {
        let indent = "  ".repeat(depth);
        let necessity = if property.required {
            "required"
        } else {
            "optional"
        };
        write!(
            f,
            "{indent}- {} ({}, {necessity})",
            property.name, property.schema
        )?;
        if let Some(description) = property.schema.description() {
            write!(f, ": {description}")?;
        }
        writeln!(f)?;

        let nested = match &property.schema {
            Schema::Array { items, .. } => items.properties(),
            schema => schema.properties(),
        };
        write_properties(f, nested, depth + 1)?;
    }
    Ok(())
}
