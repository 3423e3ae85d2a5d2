//! Tagged description of tool parameters.
//!
//! The same [`Schema`] value drives prompt rendering and the optional
//! runtime validation of decoded arguments.

use std::fmt::{self, Display};

use serde_json::{Map, Value};

// Guards against self-referencing `$ref` chains.
const MAX_DEPTH: usize = 32;

/// Describes the shape of a value a tool accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    /// A string.
    String {
        /// Human-readable description.
        description: Option<String>,
    },
    /// Any JSON number.
    Number {
        /// Human-readable description.
        description: Option<String>,
    },
    /// An integral number.
    Integer {
        /// Human-readable description.
        description: Option<String>,
    },
    /// `true` or `false`.
    Boolean {
        /// Human-readable description.
        description: Option<String>,
    },
    /// One of a fixed set of values.
    Enum {
        /// Human-readable description.
        description: Option<String>,
        /// The allowed values.
        values: Vec<Value>,
    },
    /// A list whose items all share one schema.
    Array {
        /// Human-readable description.
        description: Option<String>,
        /// Schema of every item.
        items: Box<Schema>,
    },
    /// An object with named properties.
    Object {
        /// Human-readable description.
        description: Option<String>,
        /// Properties in declaration order.
        properties: Vec<Property>,
    },
}

/// A named property of an object schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Schema of the property value.
    pub schema: Schema,
    /// Whether the property must be present.
    pub required: bool,
}

/// Error returned when a JSON Schema document cannot be converted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The document uses a construct that has no tagged counterpart.
    #[error("unsupported schema at `{0}`")]
    Unsupported(String),
    /// A `$ref` points to nothing.
    #[error("unresolved reference `{0}`")]
    UnresolvedRef(String),
    /// References are nested too deep, most likely a cycle.
    #[error("schema is nested too deep")]
    TooDeep,
}

/// Error returned when a value doesn't match a schema.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("`{path}` {message}")]
pub struct ValidationError {
    /// Location of the offending value, `$` being the root.
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

impl Schema {
    /// A string schema.
    #[inline]
    pub fn string() -> Self {
        Schema::String { description: None }
    }

    /// A number schema.
    #[inline]
    pub fn number() -> Self {
        Schema::Number { description: None }
    }

    /// An integer schema.
    #[inline]
    pub fn integer() -> Self {
        Schema::Integer { description: None }
    }

    /// A boolean schema.
    #[inline]
    pub fn boolean() -> Self {
        Schema::Boolean { description: None }
    }

    /// An enumeration of string values.
    pub fn string_enum<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum {
            description: None,
            values: values.into_iter().map(|v| Value::String(v.into())).collect(),
        }
    }

    /// An array schema.
    #[inline]
    pub fn array(items: Schema) -> Self {
        Schema::Array {
            description: None,
            items: Box::new(items),
        }
    }

    /// An object schema without properties.
    #[inline]
    pub fn object() -> Self {
        Schema::Object {
            description: None,
            properties: vec![],
        }
    }

    /// Adds a required property. Does nothing on non-object schemas.
    #[inline]
    pub fn property<S: Into<String>>(self, name: S, schema: Schema) -> Self {
        self.push_property(name.into(), schema, true)
    }

    /// Adds an optional property. Does nothing on non-object schemas.
    #[inline]
    pub fn optional_property<S: Into<String>>(
        self,
        name: S,
        schema: Schema,
    ) -> Self {
        self.push_property(name.into(), schema, false)
    }

    fn push_property(mut self, name: String, schema: Schema, required: bool) -> Self {
        if let Schema::Object { properties, .. } = &mut self {
            properties.retain(|p| p.name != name);
            properties.push(Property {
                name,
                schema,
                required,
            });
        }
        self
    }

    /// Sets the description.
    pub fn described<S: Into<String>>(mut self, text: S) -> Self {
        *self.description_mut() = Some(text.into());
        self
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            Schema::String { description }
            | Schema::Number { description }
            | Schema::Integer { description }
            | Schema::Boolean { description }
            | Schema::Enum { description, .. }
            | Schema::Array { description, .. }
            | Schema::Object { description, .. } => description.as_deref(),
        }
    }

    fn description_mut(&mut self) -> &mut Option<String> {
        match self {
            Schema::String { description }
            | Schema::Number { description }
            | Schema::Integer { description }
            | Schema::Boolean { description }
            | Schema::Enum { description, .. }
            | Schema::Array { description, .. }
            | Schema::Object { description, .. } => description,
        }
    }

    /// Returns the properties of an object schema, empty otherwise.
    pub fn properties(&self) -> &[Property] {
        match self {
            Schema::Object { properties, .. } => properties,
            _ => &[],
        }
    }

    /// Converts a JSON Schema document, as produced by `schemars`.
    ///
    /// `$ref`s into `$defs` or `definitions` are inlined, and nullable
    /// types (`["string", "null"]` or an `anyOf` with a null branch) are
    /// reduced to their non-null part.
    pub fn from_json_schema(document: &Value) -> Result<Self, SchemaError> {
        convert(document, document, "$", 0)
    }

    /// Checks `value` against this schema.
    ///
    /// Optional object properties may be `null`, and properties the
    /// schema doesn't know about are accepted.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        validate_at(self, value, "$")
    }
}

impl Display for Schema {
    /// Writes the type name used in prompts, e.g. `array of string`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::String { .. } => f.write_str("string"),
            Schema::Number { .. } => f.write_str("number"),
            Schema::Integer { .. } => f.write_str("integer"),
            Schema::Boolean { .. } => f.write_str("boolean"),
            Schema::Enum { values, .. } => {
                f.write_str("one of ")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
            Schema::Array { items, .. } => write!(f, "array of {items}"),
            Schema::Object { .. } => f.write_str("object"),
        }
    }
}

fn convert(
    node: &Value,
    root: &Value,
    path: &str,
    depth: usize,
) -> Result<Schema, SchemaError> {
    if depth > MAX_DEPTH {
        return Err(SchemaError::TooDeep);
    }
    let Some(obj) = node.as_object() else {
        return Err(SchemaError::Unsupported(path.to_owned()));
    };
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    let mut schema = convert_untitled(obj, root, path, depth)?;
    if description.is_some() {
        *schema.description_mut() = description;
    }
    Ok(schema)
}

fn convert_untitled(
    obj: &Map<String, Value>,
    root: &Value,
    path: &str,
    depth: usize,
) -> Result<Schema, SchemaError> {
    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        let target = resolve_ref(root, reference)
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_owned()))?;
        return convert(target, root, path, depth + 1);
    }

    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        return Ok(Schema::Enum {
            description: None,
            values: values.iter().filter(|v| !v.is_null()).cloned().collect(),
        });
    }
    if let Some(value) = obj.get("const") {
        return Ok(Schema::Enum {
            description: None,
            values: vec![value.clone()],
        });
    }

    for key in ["anyOf", "oneOf"] {
        let Some(branches) = obj.get(key).and_then(Value::as_array) else {
            continue;
        };
        let non_null = branches
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) != Some("null"))
            .collect::<Vec<_>>();
        if let [single] = non_null.as_slice() {
            return convert(single, root, path, depth + 1);
        }
        // A union of string constants is how `schemars` renders some enums.
        let consts = non_null
            .iter()
            .map(|b| b.get("const").cloned())
            .collect::<Option<Vec<_>>>();
        if let Some(values) = consts {
            return Ok(Schema::Enum {
                description: None,
                values,
            });
        }
        return Err(SchemaError::Unsupported(path.to_owned()));
    }

    let ty = match obj.get("type") {
        Some(Value::String(ty)) => Some(ty.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|ty| *ty != "null"),
        _ => None,
    };
    let ty = match ty {
        Some(ty) => ty,
        None if obj.contains_key("properties") => "object",
        None => return Err(SchemaError::Unsupported(path.to_owned())),
    };

    let schema = match ty {
        "string" => Schema::string(),
        "number" => Schema::number(),
        "integer" => Schema::integer(),
        "boolean" => Schema::boolean(),
        "array" => {
            let items_path = format!("{path}[]");
            let items = match obj.get("items") {
                Some(items) => convert(items, root, &items_path, depth + 1)?,
                None => return Err(SchemaError::Unsupported(items_path)),
            };
            Schema::array(items)
        }
        "object" => {
            let required = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
                .unwrap_or_default();
            let mut properties = vec![];
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                for (name, prop) in props {
                    let prop_path = format!("{path}.{name}");
                    properties.push(Property {
                        name: name.clone(),
                        schema: convert(prop, root, &prop_path, depth + 1)?,
                        required: required.contains(&name.as_str()),
                    });
                }
            }
            Schema::Object {
                description: None,
                properties,
            }
        }
        _ => return Err(SchemaError::Unsupported(path.to_owned())),
    };
    Ok(schema)
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    if reference == "#" {
        return Some(root);
    }
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

fn validate_at(
    schema: &Schema,
    value: &Value,
    path: &str,
) -> Result<(), ValidationError> {
    let mismatch = |expected: &str| ValidationError {
        path: path.to_owned(),
        message: format!("expected {expected}, got {}", kind_of(value)),
    };

    match schema {
        Schema::String { .. } if !value.is_string() => Err(mismatch("string")),
        Schema::Number { .. } if !value.is_number() => Err(mismatch("number")),
        Schema::Integer { .. } if !is_integral(value) => {
            Err(mismatch("integer"))
        }
        Schema::Boolean { .. } if !value.is_boolean() => {
            Err(mismatch("boolean"))
        }
        Schema::Enum { values, .. } if !values.contains(value) => {
            Err(ValidationError {
                path: path.to_owned(),
                message: format!("must be {schema}"),
            })
        }
        Schema::Array { items, .. } => {
            let Some(elements) = value.as_array() else {
                return Err(mismatch("array"));
            };
            for (idx, element) in elements.iter().enumerate() {
                validate_at(items, element, &format!("{path}[{idx}]"))?;
            }
            Ok(())
        }
        Schema::Object { properties, .. } => {
            let Some(fields) = value.as_object() else {
                return Err(mismatch("object"));
            };
            for prop in properties {
                let prop_path = format!("{path}.{}", prop.name);
                match fields.get(&prop.name) {
                    None if prop.required => {
                        return Err(ValidationError {
                            path: prop_path,
                            message: "is required".to_owned(),
                        });
                    }
                    None => {}
                    Some(Value::Null) if !prop.required => {}
                    Some(field) => validate_at(&prop.schema, field, &prop_path)?,
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn flight_schema() -> Schema {
        Schema::object()
            .property("from", Schema::string().described("The departure city"))
            .property("to", Schema::string().described("The destination city"))
            .optional_property("passengers", Schema::integer())
    }

    #[test]
    fn test_builder() {
        let schema = flight_schema();
        let names = schema
            .properties()
            .iter()
            .map(|p| (p.name.as_str(), p.required))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![("from", true), ("to", true), ("passengers", false)]
        );
        assert_eq!(
            schema.properties()[0].schema.description(),
            Some("The departure city")
        );
        assert_eq!(Schema::array(Schema::string()).to_string(), "array of string");
        assert_eq!(
            Schema::string_enum(["c", "f"]).to_string(),
            r#"one of "c", "f""#
        );
    }

    #[test]
    fn test_from_json_schema() {
        let document = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "SearchParameters",
            "type": "object",
            "properties": {
                "route": {
                    "$ref": "#/$defs/Route",
                    "description": "Where to fly"
                },
                "date": {
                    "type": ["string", "null"],
                    "description": "Date in YYYY-MM-DD format"
                },
                "class": {
                    "anyOf": [
                        { "type": "string", "enum": ["economy", "business"] },
                        { "type": "null" }
                    ]
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["route"],
            "$defs": {
                "Route": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "to": { "type": "string" }
                    },
                    "required": ["from", "to"]
                }
            }
        });
        let schema = Schema::from_json_schema(&document).unwrap();
        let props = schema.properties();
        assert_eq!(props.len(), 4);

        let route = props.iter().find(|p| p.name == "route").unwrap();
        assert!(route.required);
        assert_eq!(route.schema.description(), Some("Where to fly"));
        assert_eq!(route.schema.properties().len(), 2);

        let date = props.iter().find(|p| p.name == "date").unwrap();
        assert!(!date.required);
        assert!(matches!(date.schema, Schema::String { .. }));

        let class = props.iter().find(|p| p.name == "class").unwrap();
        assert_eq!(
            class.schema,
            Schema::string_enum(["economy", "business"])
        );

        let tags = props.iter().find(|p| p.name == "tags").unwrap();
        assert_eq!(tags.schema, Schema::array(Schema::string()));
    }

    #[test]
    fn test_from_json_schema_errors() {
        let document = json!({
            "type": "object",
            "properties": { "x": { "$ref": "#/$defs/Missing" } }
        });
        assert_eq!(
            Schema::from_json_schema(&document),
            Err(SchemaError::UnresolvedRef("#/$defs/Missing".to_owned()))
        );

        let document = json!({
            "$ref": "#/$defs/Node",
            "$defs": { "Node": { "$ref": "#/$defs/Node" } }
        });
        assert_eq!(
            Schema::from_json_schema(&document),
            Err(SchemaError::TooDeep)
        );

        assert!(matches!(
            Schema::from_json_schema(&json!({ "type": "object", "properties": { "x": {} } })),
            Err(SchemaError::Unsupported(path)) if path == "$.x"
        ));
    }

    #[test]
    fn test_validate() {
        let schema = flight_schema();
        assert!(schema.validate(&json!({ "from": "Zurich", "to": "Berlin" })).is_ok());
        assert!(
            schema
                .validate(&json!({ "from": "Zurich", "to": "Berlin", "passengers": null, "extra": 1 }))
                .is_ok()
        );

        let err = schema.validate(&json!({ "from": "Zurich" })).unwrap_err();
        assert_eq!(err.path, "$.to");
        assert_eq!(err.to_string(), "`$.to` is required");

        let err = schema
            .validate(&json!({ "from": "Zurich", "to": 3 }))
            .unwrap_err();
        assert_eq!(err.message, "expected string, got number");

        let err = schema
            .validate(&json!({ "from": "a", "to": "b", "passengers": 1.5 }))
            .unwrap_err();
        assert_eq!(err.path, "$.passengers");
        assert!(schema
            .validate(&json!({ "from": "a", "to": "b", "passengers": 2.0 }))
            .is_ok());

        let list = Schema::array(Schema::string_enum(["a", "b"]));
        let err = list.validate(&json!(["a", "c"])).unwrap_err();
        assert_eq!(err.path, "$[1]");
    }
}
