//! JSON-Schema backed implementation of the schema capability.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::error::{SchemaError, SetupError};
use crate::loader::navigate_fragment;
use crate::schema::{Schema, SchemaRef, ValidateOptions};

/// A compiled JSON Schema with strip/coerce/default semantics.
///
/// Before the payload is checked by `jsonschema`, it is cleaned against the
/// schema:
///
/// - keys not declared under `properties` are stripped (or flagged when
///   [`ValidateOptions::reject_unknown`] is set), unless `additionalProperties`
///   is `true` or a schema;
/// - missing properties with a `default` get that default;
/// - strings are coerced into a declared `integer`, `number` or `boolean`.
///
/// Internal `$ref`s are followed and `allOf`/`anyOf`/`oneOf` branches are
/// merged before a node is cleaned. Objects that still declare no
/// `properties` are treated as free-form and kept as-is.
pub struct JsonSchema {
    raw: Value,
    validator: jsonschema::Validator,
    optional: bool,
    partial: Option<Arc<JsonSchema>>,
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("raw", &self.raw)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

impl JsonSchema {
    /// Compile a schema. A missing value is rejected.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::InvalidSchema` if `jsonschema` cannot compile it.
    pub fn new(schema: Value) -> Result<Self, SetupError> {
        Self::compile(schema, false, true)
    }

    /// Compile a schema that also accepts a missing value.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::InvalidSchema` if `jsonschema` cannot compile it.
    pub fn optional(schema: Value) -> Result<Self, SetupError> {
        Self::compile(schema, true, true)
    }

    /// Compile into a shared handle.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::InvalidSchema` if `jsonschema` cannot compile it.
    pub fn shared(schema: Value) -> Result<SchemaRef, SetupError> {
        Ok(Arc::new(Self::new(schema)?))
    }

    /// The schema as written (annotations already resolved).
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn compile(schema: Value, optional: bool, with_partial: bool) -> Result<Self, SetupError> {
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| SetupError::InvalidSchema {
                message: e.to_string(),
            })?;

        // Only objects with a top-level `required` have a distinct partial form
        let partial = match schema.get("required") {
            Some(_) if with_partial => {
                let mut relaxed = schema.clone();
                if let Value::Object(map) = &mut relaxed {
                    map.remove("required");
                }
                Some(Arc::new(Self::compile(relaxed, optional, false)?))
            }
            _ => None,
        };

        Ok(Self {
            raw: schema,
            validator,
            optional,
            partial,
        })
    }

    fn check(&self, value: Value, options: ValidateOptions) -> Result<Value, Vec<SchemaError>> {
        let mut errors = Vec::new();
        let cleaned = clean_value(value, &self.raw, &self.raw, "", options, &mut errors);

        errors.extend(self.validator.iter_errors(&cleaned).map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        }));

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }
}

#[async_trait]
impl Schema for JsonSchema {
    async fn validate(
        &self,
        value: Option<Value>,
        options: ValidateOptions,
    ) -> Result<Option<Value>, Vec<SchemaError>> {
        match value {
            Some(value) => self.check(value, options).map(Some),
            None if self.optional => Ok(None),
            None => Err(vec![SchemaError::new("", "value is required")]),
        }
    }

    fn partial(&self) -> Option<SchemaRef> {
        self.partial
            .as_ref()
            .map(|partial| Arc::clone(partial) as SchemaRef)
    }

    fn describe(&self) -> Option<Value> {
        Some(self.raw.clone())
    }
}

/// `$ref` chains deeper than this are left unresolved.
const MAX_REF_DEPTH: usize = 32;

const COMBINATORS: [&str; 3] = ["allOf", "anyOf", "oneOf"];

fn needs_resolution(schema: &Map<String, Value>) -> bool {
    schema.contains_key("$ref") || COMBINATORS.iter().any(|k| schema.contains_key(*k))
}

/// The keywords that apply at one node: the node's own, then those of the
/// internal `$ref` target, then those of every combinator branch.
fn effective(schema: &Map<String, Value>, root: &Value, depth: usize) -> Map<String, Value> {
    let mut merged = schema.clone();
    if depth >= MAX_REF_DEPTH {
        return merged;
    }

    let internal_ref = schema
        .get("$ref")
        .and_then(Value::as_str)
        .filter(|r| r.starts_with('#'));
    if let Some(reference) = internal_ref {
        if let Ok(Value::Object(target)) = navigate_fragment(root, reference) {
            merged.remove("$ref");
            merge_keywords(&mut merged, effective(&target, root, depth + 1));
        }
    }

    for keyword in COMBINATORS {
        let Some(Value::Array(branches)) = schema.get(keyword) else {
            continue;
        };
        for branch in branches.iter().filter_map(Value::as_object) {
            merge_keywords(&mut merged, effective(branch, root, depth + 1));
        }
    }

    merged
}

fn merge_keywords(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match key.as_str() {
            "$ref" | "$defs" | "definitions" | "allOf" | "anyOf" | "oneOf" => {}
            "properties" => {
                let Value::Object(incoming) = value else {
                    continue;
                };
                let properties = target
                    .entry("properties")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(properties) = properties {
                    for (name, property) in incoming {
                        properties.entry(name).or_insert(property);
                    }
                }
            }
            "type" => {
                let mut types: Vec<Value> = declared_types(target)
                    .into_iter()
                    .map(|t| Value::String(t.to_string()))
                    .collect();
                let incoming = match value {
                    Value::String(t) => vec![Value::String(t)],
                    Value::Array(ts) => ts,
                    _ => Vec::new(),
                };
                for t in incoming {
                    if !types.contains(&t) {
                        types.push(t);
                    }
                }
                let merged = match types.len() {
                    1 => types.remove(0),
                    _ => Value::Array(types),
                };
                target.insert(key, merged);
            }
            _ => {
                target.entry(key).or_insert(value);
            }
        }
    }
}

fn clean_value(
    value: Value,
    schema: &Value,
    root: &Value,
    path: &str,
    options: ValidateOptions,
    errors: &mut Vec<SchemaError>,
) -> Value {
    let Some(schema_map) = schema.as_object() else {
        return value;
    };
    let schema_map = if needs_resolution(schema_map) {
        Cow::Owned(effective(schema_map, root, 0))
    } else {
        Cow::Borrowed(schema_map)
    };

    match value {
        Value::Object(map) if schema_map.contains_key("properties") => {
            Value::Object(clean_object(map, &schema_map, root, path, options, errors))
        }
        Value::Object(map) => match schema_map.get("additionalProperties") {
            // Free-form object whose values share one schema
            Some(additional @ Value::Object(_)) => Value::Object(
                map.into_iter()
                    .map(|(key, child)| {
                        let child_path = format!("{}/{}", path, key);
                        let cleaned =
                            clean_value(child, additional, root, &child_path, options, errors);
                        (key, cleaned)
                    })
                    .collect(),
            ),
            _ => Value::Object(map),
        },
        Value::Array(items) => match schema_map.get("items") {
            Some(item_schema @ Value::Object(_)) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{}/{}", path, i);
                        clean_value(item, item_schema, root, &item_path, options, errors)
                    })
                    .collect(),
            ),
            _ => Value::Array(items),
        },
        Value::String(s) => coerce_string(s, &schema_map),
        other => other,
    }
}

fn clean_object(
    mut map: Map<String, Value>,
    schema: &Map<String, Value>,
    root: &Value,
    path: &str,
    options: ValidateOptions,
    errors: &mut Vec<SchemaError>,
) -> Map<String, Value> {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let additional = schema.get("additionalProperties");
    let allows_unknown = matches!(additional, Some(Value::Bool(true)) | Some(Value::Object(_)));

    let unknown: Vec<String> = map
        .keys()
        .filter(|key| !properties.contains_key(*key))
        .cloned()
        .collect();

    if !unknown.is_empty() && !allows_unknown {
        if options.reject_unknown {
            errors.push(SchemaError::new(
                path,
                format!("contains unknown properties: {}", unknown.join(", ")),
            ));
        }
        for key in &unknown {
            map.remove(key);
        }
    }

    let mut result = Map::new();
    for (key, child) in map {
        let child_path = format!("{}/{}", path, key);
        let child_schema = properties
            .get(&key)
            .or(additional.filter(|a| a.is_object()));
        let cleaned = match child_schema {
            Some(child_schema) => {
                clean_value(child, child_schema, root, &child_path, options, errors)
            }
            None => child,
        };
        result.insert(key, cleaned);
    }

    for (key, property) in properties {
        if result.contains_key(key) {
            continue;
        }
        if let Some(default) = property.get("default") {
            result.insert(key.clone(), default.clone());
        }
    }

    result
}

fn declared_types(schema: &Map<String, Value>) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn coerce_string(s: String, schema: &Map<String, Value>) -> Value {
    let types = declared_types(schema);
    if types.is_empty() || types.contains(&"string") {
        return Value::String(s);
    }

    let trimmed = s.trim();
    if types.contains(&"integer") {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if types.contains(&"number") {
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    if types.contains(&"boolean") {
        match trimmed {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
    }
    if types.contains(&"null") && trimmed == "null" {
        return Value::Null;
    }

    Value::String(s)
}
