//! The schema capability consumed by the resolver and dispatcher.
//!
//! A [`Schema`] validates a possibly-absent JSON value and returns the cleaned
//! value (unknown keys stripped, defaults applied, scalars coerced) or the
//! full list of reasons it was rejected. The engine never looks inside a
//! schema; it only sequences calls to [`Schema::validate`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::SchemaError;
use crate::types::json_type_name;

/// Shared handle to a schema.
pub type SchemaRef = Arc<dyn Schema>;

/// Per-call validation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidateOptions {
    /// Flag unknown object keys as errors instead of silently stripping them.
    pub reject_unknown: bool,
}

impl ValidateOptions {
    pub fn rejecting_unknown() -> Self {
        Self {
            reject_unknown: true,
        }
    }
}

#[async_trait]
pub trait Schema: Send + Sync + fmt::Debug {
    /// Validate `value` (`None` when absent), returning the cleaned value.
    ///
    /// # Errors
    ///
    /// Returns every reason the value was rejected.
    async fn validate(
        &self,
        value: Option<Value>,
        options: ValidateOptions,
    ) -> Result<Option<Value>, Vec<SchemaError>>;

    /// The same schema with every top-level key optional.
    ///
    /// `None` means the schema has no distinct partial form.
    fn partial(&self) -> Option<SchemaRef> {
        None
    }

    /// JSON Schema description of the accepted shape; `None` if the value must be absent.
    fn describe(&self) -> Option<Value>;
}

/// Partial form of `schema`, or `schema` itself when it has none.
pub fn partial_of(schema: &SchemaRef) -> SchemaRef {
    schema.partial().unwrap_or_else(|| Arc::clone(schema))
}

/// Accepts only a missing value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Absent;

impl Absent {
    pub fn shared() -> SchemaRef {
        Arc::new(Absent)
    }
}

#[async_trait]
impl Schema for Absent {
    async fn validate(
        &self,
        value: Option<Value>,
        _options: ValidateOptions,
    ) -> Result<Option<Value>, Vec<SchemaError>> {
        match value {
            None => Ok(None),
            Some(other) => Err(vec![SchemaError::new(
                "",
                format!("must be absent, got {}", json_type_name(&other)),
            )]),
        }
    }

    fn describe(&self) -> Option<Value> {
        None
    }
}

/// The List response container: `{ items: [<read shape>], is_paginated: false }`.
#[derive(Debug, Clone)]
pub struct ListSchema {
    items: SchemaRef,
}

impl ListSchema {
    pub fn new(items: SchemaRef) -> Self {
        Self { items }
    }

    pub fn shared(items: SchemaRef) -> SchemaRef {
        Arc::new(Self::new(items))
    }
}

#[async_trait]
impl Schema for ListSchema {
    async fn validate(
        &self,
        value: Option<Value>,
        options: ValidateOptions,
    ) -> Result<Option<Value>, Vec<SchemaError>> {
        let mut map = match value {
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(vec![SchemaError::new(
                    "",
                    format!("expected object, got {}", json_type_name(&other)),
                )])
            }
            None => return Err(vec![SchemaError::new("", "value is required")]),
        };

        let mut errors = Vec::new();
        let mut items = Vec::new();

        match map.remove("items") {
            Some(Value::Array(raw_items)) => {
                for (i, item) in raw_items.into_iter().enumerate() {
                    match self.items.validate(Some(item), options).await {
                        Ok(Some(valid)) => items.push(valid),
                        Ok(None) => errors.push(SchemaError::new(
                            format!("/items/{}", i),
                            "list items must not be absent",
                        )),
                        Err(item_errors) => errors.extend(
                            item_errors
                                .into_iter()
                                .map(|e| e.nested(&format!("items/{}", i))),
                        ),
                    }
                }
            }
            Some(other) => errors.push(SchemaError::new(
                "/items",
                format!("expected array, got {}", json_type_name(&other)),
            )),
            None => errors.push(SchemaError::new("/items", "items is required")),
        }

        match map.remove("is_paginated") {
            Some(Value::Bool(false)) => {}
            Some(other) => errors.push(SchemaError::new(
                "/is_paginated",
                format!("must be false, got {}", other),
            )),
            None => errors.push(SchemaError::new("/is_paginated", "is_paginated is required")),
        }

        if options.reject_unknown && !map.is_empty() {
            let unknown: Vec<&str> = map.keys().map(String::as_str).collect();
            errors.push(SchemaError::new(
                "",
                format!("contains unknown properties: {}", unknown.join(", ")),
            ));
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut result = Map::new();
        result.insert("items".to_string(), Value::Array(items));
        result.insert("is_paginated".to_string(), Value::Bool(false));
        Ok(Some(Value::Object(result)))
    }

    fn describe(&self) -> Option<Value> {
        let items = self.items.describe().unwrap_or_else(|| json!(false));
        Some(json!({
            "type": "object",
            "properties": {
                "items": { "type": "array", "items": items },
                "is_paginated": { "type": "boolean", "const": false }
            },
            "required": ["items", "is_paginated"]
        }))
    }
}
