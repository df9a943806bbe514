//! Route input schemas and their normalized field descriptions.
//!
//! Validators attached to a route may be plain closures (no declared fields) or
//! schema objects able to describe themselves. Descriptions come in more than one
//! shape depending on which schema library produced them; [`describe`] converges all
//! of them on a single [`FieldDescriptor`] tree.

use serde_json::{Map, Number, Value};

/// A route input validator.
pub trait Validator {
    /// Validate (and coerce) an input value.
    ///
    /// # Errors
    ///
    /// Returns a human readable message when the value is rejected.
    fn validate(&self, value: Value) -> Result<Value, String>;

    /// Nested field metadata, when the validator can produce it.
    fn describe(&self) -> Option<Value> {
        None
    }
}

impl<F> Validator for F
where
    F: Fn(Value) -> Result<Value, String>,
{
    fn validate(&self, value: Value) -> Result<Value, String> {
        self(value)
    }
}

/// Accepts any value and describes itself with a fixed, pre-built description.
///
/// Useful for validators coming from elsewhere whose description tree is already known.
#[derive(Debug, Clone)]
pub struct Described(pub Value);

impl Validator for Described {
    fn validate(&self, value: Value) -> Result<Value, String> {
        Ok(value)
    }

    fn describe(&self) -> Option<Value> {
        Some(self.0.clone())
    }
}

// =====================
// Field descriptors
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
    Other(String),
}

impl FieldType {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "array" => FieldType::Array,
            "object" => FieldType::Object,
            "any" => FieldType::Any,
            other => FieldType::Other(other.to_string()),
        }
    }
}

/// One validated input field, possibly nested.
///
/// Arrays carry `items`, objects carry `children`; never both.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub items: Option<Vec<FieldDescriptor>>,
    pub children: Option<Vec<FieldDescriptor>>,
}

// Property names used for nested object fields, newest shape first.
const NESTED_KEYS: [&str; 2] = ["keys", "children"];

/// Normalize a validator's description into its top-level fields.
///
/// Absent validators, validators without a description and descriptions that are
/// not object-shaped all yield an empty list.
#[must_use]
pub fn describe(validator: Option<&dyn Validator>) -> Vec<FieldDescriptor> {
    validator
        .and_then(Validator::describe)
        .map(|description| fields_of(&description))
        .unwrap_or_default()
}

/// Normalize a raw description tree into its top-level fields.
#[must_use]
pub fn fields_of(description: &Value) -> Vec<FieldDescriptor> {
    nested_of(description)
        .map(|nested| {
            nested
                .iter()
                .map(|(name, desc)| field_from(name, desc))
                .collect()
        })
        .unwrap_or_default()
}

fn nested_of(description: &Value) -> Option<&Map<String, Value>> {
    NESTED_KEYS
        .iter()
        .find_map(|key| description.get(key).and_then(Value::as_object))
}

fn description_of(description: &Value) -> Option<String> {
    description
        .get("description")
        .and_then(Value::as_str)
        .or_else(|| description.pointer("/flags/description").and_then(Value::as_str))
        .map(ToString::to_string)
}

fn field_from(name: &str, description: &Value) -> FieldDescriptor {
    let field_type = description
        .get("type")
        .and_then(Value::as_str)
        .map_or(FieldType::Any, FieldType::parse);

    let (items, children) = if field_type == FieldType::Array {
        let items = description.get("items").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| field_from(&i.to_string(), item))
                .collect()
        });
        (items, None)
    } else {
        (None, nested_of(description).map(|_| fields_of(description)))
    };

    FieldDescriptor {
        name: name.to_string(),
        description: description_of(description),
        field_type,
        items,
        children,
    }
}

// =====================
// Schema builder
// =====================

#[derive(Debug, Clone)]
enum Kind {
    Any,
    String,
    Number,
    Boolean,
    Array(Vec<Schema>),
    Object(Vec<(String, Schema)>),
}

/// A small self-describing schema used to validate route inputs.
///
/// Strings supplied on the command line are coerced to numbers and booleans where
/// the schema asks for them; object schemas reject keys they do not declare.
#[derive(Debug, Clone)]
pub struct Schema {
    kind: Kind,
    description: Option<String>,
    required: bool,
}

#[must_use]
pub fn any() -> Schema {
    Schema::new(Kind::Any)
}

#[must_use]
pub fn string() -> Schema {
    Schema::new(Kind::String)
}

#[must_use]
pub fn number() -> Schema {
    Schema::new(Kind::Number)
}

#[must_use]
pub fn boolean() -> Schema {
    Schema::new(Kind::Boolean)
}

#[must_use]
pub fn array<I>(items: I) -> Schema
where
    I: IntoIterator<Item = Schema>,
{
    Schema::new(Kind::Array(items.into_iter().collect()))
}

#[must_use]
pub fn object<I, K>(keys: I) -> Schema
where
    I: IntoIterator<Item = (K, Schema)>,
    K: Into<String>,
{
    Schema::new(Kind::Object(
        keys.into_iter().map(|(k, s)| (k.into(), s)).collect(),
    ))
}

impl Schema {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            description: None,
            required: false,
        }
    }

    #[must_use]
    pub fn description<S: Into<String>>(mut self, text: S) -> Self {
        self.description = Some(text.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            Kind::Any => "any",
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Boolean => "boolean",
            Kind::Array(_) => "array",
            Kind::Object(_) => "object",
        }
    }

    fn description_tree(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".to_string(), Value::from(self.type_name()));

        let mut flags = Map::new();
        if let Some(text) = &self.description {
            flags.insert("description".to_string(), Value::from(text.as_str()));
        }
        if self.required {
            flags.insert("presence".to_string(), Value::from("required"));
        }
        if !flags.is_empty() {
            out.insert("flags".to_string(), Value::Object(flags));
        }

        match &self.kind {
            Kind::Array(items) if !items.is_empty() => {
                let items = items.iter().map(Schema::description_tree).collect();
                out.insert("items".to_string(), Value::Array(items));
            }
            Kind::Object(keys) => {
                let keys = keys
                    .iter()
                    .map(|(k, s)| (k.clone(), s.description_tree()))
                    .collect();
                out.insert("keys".to_string(), Value::Object(keys));
            }
            _ => {}
        }
        Value::Object(out)
    }

    fn check(&self, label: &str, value: Value) -> Result<Value, String> {
        match &self.kind {
            Kind::Any => Ok(value),
            Kind::String => match value {
                Value::String(_) => Ok(value),
                _ => Err(format!("\"{label}\" must be a string")),
            },
            Kind::Number => coerce_number(&value)
                .ok_or_else(|| format!("\"{label}\" must be a number")),
            Kind::Boolean => coerce_boolean(&value)
                .ok_or_else(|| format!("\"{label}\" must be a boolean")),
            Kind::Array(items) => {
                let values = match value {
                    Value::Array(values) => values,
                    single => vec![single],
                };
                let mut checked = Vec::with_capacity(values.len());
                for (i, item) in values.into_iter().enumerate() {
                    let item_label = format!("{label}[{i}]");
                    if items.is_empty() {
                        checked.push(item);
                        continue;
                    }
                    let matched = items
                        .iter()
                        .find_map(|schema| schema.check(&item_label, item.clone()).ok())
                        .ok_or_else(|| {
                            format!("\"{item_label}\" does not match any of the allowed types")
                        })?;
                    checked.push(matched);
                }
                Ok(Value::Array(checked))
            }
            Kind::Object(keys) => {
                let mut map = match value {
                    Value::Object(map) => map,
                    Value::String(text) => match serde_json::from_str::<Value>(&text) {
                        Ok(Value::Object(map)) => map,
                        _ => return Err(format!("\"{label}\" must be of type object")),
                    },
                    _ => return Err(format!("\"{label}\" must be of type object")),
                };
                if let Some(unknown) = map.keys().find(|k| !keys.iter().any(|(name, _)| name == *k)) {
                    return Err(format!("\"{}\" is not allowed", child_label(label, unknown)));
                }
                let mut checked = Map::new();
                for (name, schema) in keys {
                    match map.remove(name) {
                        Some(v) => {
                            checked.insert(name.clone(), schema.check(&child_label(label, name), v)?);
                        }
                        None if schema.required => {
                            return Err(format!("\"{}\" is required", child_label(label, name)));
                        }
                        None => {}
                    }
                }
                Ok(Value::Object(checked))
            }
        }
    }
}

impl Validator for Schema {
    fn validate(&self, value: Value) -> Result<Value, String> {
        self.check("value", value)
    }

    fn describe(&self) -> Option<Value> {
        Some(self.description_tree())
    }
}

fn child_label(parent: &str, name: &str) -> String {
    if parent == "value" {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(int) = text.parse::<i64>() {
                return Some(Value::from(int));
            }
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        }
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
        _ => None,
    }
}
