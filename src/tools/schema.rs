//! Parameter schemas and argument validation.
//!
//! Each tool declares a [`ParamSchema`]: a flat list of named fields with a
//! primitive type and a required flag. The same declaration renders the JSON
//! Schema advertised in `tools/list` and drives [`validate`], which runs
//! before any backend call so a bad call has no side effects.
//!
//! Validation is shallow: required fields must be present and
//! present fields must have the declared primitive type. Unknown fields are
//! ignored so older servers accept arguments from newer clients.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Primitive JSON types a parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON boolean.
    Boolean,
}

impl FieldType {
    /// The JSON Schema type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    /// Whether `value` has this type.
    #[must_use]
    pub const fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_)) | (Self::Boolean, Value::Bool(_))
        )
    }
}

/// Name of the JSON type of `value`, for error messages.
const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Argument name as it appears on the wire.
    pub name: &'static str,
    /// Expected primitive type.
    pub kind: FieldType,
    /// Whether the argument must be present.
    pub required: bool,
    /// Human-readable description for the manifest.
    pub description: &'static str,
}

/// The declared parameters of one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    /// A schema with no parameters.
    #[must_use]
    pub const fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a required parameter.
    #[must_use]
    pub fn required(mut self, name: &'static str, kind: FieldType, description: &'static str) -> Self {
        self.fields.push(FieldSpec {
            name,
            kind,
            required: true,
            description,
        });
        self
    }

    /// All declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Names of the required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Renders the schema as a JSON Schema object.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.to_string(),
                    json!({ "type": f.kind.as_str(), "description": f.description }),
                )
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_fields().collect::<Vec<_>>(),
        })
    }
}

impl Serialize for ParamSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_schema().serialize(serializer)
    }
}

/// Why a field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum Problem {
    /// A required field is absent.
    Missing,
    /// The field has the wrong JSON type.
    WrongType {
        /// Declared type.
        expected: FieldType,
        /// Type actually received.
        found: &'static str,
    },
    /// The argument bag itself is not a JSON object.
    NotAnObject {
        /// Type actually received.
        found: &'static str,
    },
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Offending field (`arguments` when the whole bag is wrong).
    pub field: String,
    /// What was wrong with it.
    #[serde(flatten)]
    pub problem: Problem,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            Problem::Missing => write!(f, "missing required field '{}'", self.field),
            Problem::WrongType { expected, found } => write!(
                f,
                "field '{}' must be a {}, got {found}",
                self.field,
                expected.as_str()
            ),
            Problem::NotAnObject { found } => {
                write!(f, "{} must be an object, got {found}", self.field)
            }
        }
    }
}

/// A validated argument bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// Narrows the bag into a typed record. Unknown fields are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the record's own constraints are not met; after a
    /// successful [`validate`] against a matching schema this does not happen.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0))
    }
}

/// Checks `args` against `schema`.
///
/// A missing or `null` argument bag is treated as empty.
///
/// # Errors
///
/// Returns every violation found, in schema declaration order.
pub fn validate(args: &Value, schema: &ParamSchema) -> Result<Arguments, Vec<Violation>> {
    let map = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(vec![Violation {
                field: "arguments".to_string(),
                problem: Problem::NotAnObject {
                    found: json_type_name(other),
                },
            }])
        }
    };

    let violations: Vec<Violation> = schema
        .fields()
        .iter()
        .filter_map(|spec| match map.get(spec.name) {
            None if spec.required => Some(Violation {
                field: spec.name.to_string(),
                problem: Problem::Missing,
            }),
            None => None,
            Some(value) if spec.kind.matches(value) => None,
            Some(value) => Some(Violation {
                field: spec.name.to_string(),
                problem: Problem::WrongType {
                    expected: spec.kind,
                    found: json_type_name(value),
                },
            }),
        })
        .collect();

    if violations.is_empty() {
        Ok(Arguments(map))
    } else {
        Err(violations)
    }
}
