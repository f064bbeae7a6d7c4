//! Tier annotations - derives each tier's schema from one annotated schema.
//!
//! A property annotated with `crud_access` names the least privileged tier
//! that may see it, either for every operation (`"crud_access": "server"`) or
//! per operation (`"crud_access": { "read": "admin", "update": "omit" }`).
//! Resolving for a tier removes every property that tier may not see, so the
//! derived schemas nest by construction: admin ⊇ server ⊇ client.

use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::types::{json_type_name, AccessTier, Operation, ACCESS_ANNOTATION};

/// Access of a single property after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// No annotation - visible wherever the operation is.
    #[default]
    Everyone,
    /// Visible to this tier and every more privileged one.
    AtLeast(AccessTier),
    /// Never visible.
    Omit,
}

impl Access {
    /// Parse an annotation value. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "omit" => Some(Access::Omit),
            other => AccessTier::parse(other).map(Access::AtLeast),
        }
    }

    pub fn visible_to(&self, tier: AccessTier) -> bool {
        match self {
            Access::Everyone => true,
            Access::AtLeast(minimum) => tier.satisfies(*minimum),
            Access::Omit => false,
        }
    }
}

/// Which tier and operation to resolve an annotated schema for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub tier: AccessTier,
    /// List resolves as Read.
    pub operation: Operation,
}

impl ResolveOptions {
    pub fn new(tier: AccessTier, operation: Operation) -> Self {
        Self {
            tier,
            operation: operation.schema_operation(),
        }
    }
}

/// Resolve an annotated schema down to what `options.tier` may see.
///
/// Returns a standard JSON Schema with `crud_access` annotations removed.
///
/// # Errors
///
/// Returns `LoadError` if the schema contains invalid annotations.
pub fn resolve(schema: &Value, options: &ResolveOptions) -> Result<Value, LoadError> {
    resolve_value(schema, options, "")
}

/// Get the access of a single property for an operation.
///
/// # Errors
///
/// Returns `LoadError` if the annotation has an invalid type or unknown value.
pub fn get_access(prop: &Value, operation: Operation, path: &str) -> Result<Access, LoadError> {
    let Some(annotation) = prop.get(ACCESS_ANNOTATION) else {
        return Ok(Access::Everyone);
    };

    match annotation {
        Value::String(s) => parse_access_string(s, path),
        Value::Object(map) => match map.get(operation.schema_operation().as_str()) {
            Some(Value::String(s)) => parse_access_string(s, path),
            Some(other) => Err(LoadError::InvalidAnnotationType {
                path: format!("{}/{}", path, operation),
                actual: json_type_name(other).to_string(),
            }),
            None => Ok(Access::Everyone),
        },
        other => Err(LoadError::InvalidAnnotationType {
            path: path.to_string(),
            actual: json_type_name(other).to_string(),
        }),
    }
}

/// Recursively remove every `crud_access` annotation.
pub fn strip_annotations(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != ACCESS_ANNOTATION)
                .map(|(k, v)| (k.clone(), strip_annotations(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(strip_annotations).collect()),
        other => other.clone(),
    }
}

fn resolve_value(value: &Value, options: &ResolveOptions, path: &str) -> Result<Value, LoadError> {
    match value {
        Value::Object(map) => resolve_object(map, options, path),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, item)| resolve_value(item, options, &format!("{}/{}", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn resolve_object(
    map: &Map<String, Value>,
    options: &ResolveOptions,
    path: &str,
) -> Result<Value, LoadError> {
    let mut result = Map::new();
    let mut hidden: Vec<&str> = Vec::new();

    for (key, value) in map {
        if key == ACCESS_ANNOTATION || key == "required" {
            continue;
        }

        let child_path = format!("{}/{}", path, key);
        let resolved = match (key.as_str(), value) {
            ("properties", Value::Object(props)) => {
                let mut kept = Map::new();
                for (name, prop) in props {
                    let prop_path = format!("{}/{}", child_path, name);
                    if get_access(prop, options.operation, &prop_path)?.visible_to(options.tier) {
                        kept.insert(name.clone(), resolve_value(prop, options, &prop_path)?);
                    } else {
                        hidden.push(name);
                    }
                }
                Value::Object(kept)
            }
            ("$defs" | "definitions", Value::Object(defs)) => {
                let mut resolved = Map::new();
                for (name, def) in defs {
                    let def_path = format!("{}/{}", child_path, name);
                    resolved.insert(name.clone(), resolve_value(def, options, &def_path)?);
                }
                Value::Object(resolved)
            }
            _ => resolve_value(value, options, &child_path)?,
        };
        result.insert(key.clone(), resolved);
    }

    if let Some(required) = map.get("required") {
        let kept = match required {
            Value::Array(names) => Value::Array(
                names
                    .iter()
                    .filter(|n| n.as_str().map_or(true, |n| !hidden.contains(&n)))
                    .cloned()
                    .collect(),
            ),
            other => other.clone(),
        };
        result.insert("required".to_string(), kept);
    }

    Ok(Value::Object(result))
}

fn parse_access_string(s: &str, path: &str) -> Result<Access, LoadError> {
    Access::parse(s).ok_or_else(|| LoadError::UnknownAccess {
        path: path.to_string(),
        value: s.to_string(),
    })
}
