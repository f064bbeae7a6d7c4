//! Resource documents - one JSON file declaring a resource's tiers.
//!
//! ```json
//! {
//!   "name": "widget",
//!   "params": { "type": "object", "properties": { "widget_id": { "type": "string" } } },
//!   "operations": {
//!     "create": { "tier": "server", "schema": { "type": "object", "properties": { ... } } },
//!     "read": { "schema": { ... } },
//!     "delete": { "tier": "admin" }
//!   }
//! }
//! ```
//!
//! Each operation names the least privileged tier that has it; the schema is
//! resolved per tier through its `crud_access` annotations.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::access::{CrudSchema, TierSchemas};
use crate::annotations::{resolve, strip_annotations, ResolveOptions};
use crate::error::LoadError;
use crate::handlers::{CrudHandlers, CrudHandlersBuilder};
use crate::loader::{bundle_refs, is_url, load_json_auto, load_json_str};
use crate::schema::{Absent, SchemaRef};
use crate::types::{AccessTier, CrudConfig, Operation};
use crate::validator::JsonSchema;

/// One declared operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDocument {
    /// Least privileged tier with access.
    #[serde(default)]
    pub tier: AccessTier,
    /// Annotated schema. Create, Read and Update require one.
    #[serde(default)]
    pub schema: Option<Value>,
}

/// A parsed resource document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub operations: BTreeMap<Operation, OperationDocument>,
    #[serde(default)]
    pub config: CrudConfig,
}

impl ResourceDocument {
    /// Load a document from a file path or URL, bundling external `$ref`s
    /// relative to the document's directory.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` on IO, JSON, bundling, or structure errors.
    pub fn load(source: &str) -> Result<Self, LoadError> {
        let mut value = load_json_auto(source)?;
        if !is_url(source) {
            let base_dir = Path::new(source).parent().unwrap_or_else(|| Path::new("."));
            bundle_refs(&mut value, base_dir)?;
        }
        Self::from_value(value)
    }

    /// Parse a document from a JSON string. External `$ref`s are not bundled.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` on JSON or structure errors.
    pub fn from_json_str(content: &str) -> Result<Self, LoadError> {
        Self::from_value(load_json_str(content)?)
    }

    /// Interpret an already-loaded value.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidDocument` if the structure is wrong.
    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        let document: Self =
            serde_json::from_value(value).map_err(|e| LoadError::InvalidDocument {
                message: e.to_string(),
            })?;
        document.check()?;
        Ok(document)
    }

    fn check(&self) -> Result<(), LoadError> {
        for (operation, declared) in &self.operations {
            match operation {
                Operation::List => {
                    return Err(LoadError::InvalidDocument {
                        message: "\"list\" cannot be declared; it is derived from \"read\""
                            .to_string(),
                    })
                }
                Operation::Delete => {}
                _ if declared.schema.is_none() => {
                    return Err(LoadError::InvalidDocument {
                        message: format!("operation \"{}\" requires a schema", operation),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resource name, or `resource` when the document has none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("resource")
    }

    /// Whether `operation` is available at `tier`. List mirrors Read.
    pub fn is_available(&self, tier: AccessTier, operation: Operation) -> bool {
        self.operations
            .get(&operation.schema_operation())
            .is_some_and(|declared| tier.satisfies(declared.tier))
    }

    /// The schema `tier` sees for `operation`, with annotations resolved.
    ///
    /// Returns `None` when the operation is unavailable at `tier` or declares
    /// no schema.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the schema carries invalid annotations.
    pub fn tier_schema(
        &self,
        tier: AccessTier,
        operation: Operation,
    ) -> Result<Option<Value>, LoadError> {
        if !self.is_available(tier, operation) {
            return Ok(None);
        }
        let operation = operation.schema_operation();
        self.operations
            .get(&operation)
            .and_then(|declared| declared.schema.as_ref())
            .map(|schema| resolve(schema, &ResolveOptions::new(tier, operation)))
            .transpose()
    }

    /// Compile every tier's bundle.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` for invalid annotations or schemas that don't compile.
    pub fn crud_schema(&self) -> Result<CrudSchema, LoadError> {
        let mut crud = CrudSchema::new();

        for tier in AccessTier::ALL {
            let mut bundle = TierSchemas::new();
            for operation in self.operations.keys().copied() {
                if !self.is_available(tier, operation) {
                    continue;
                }
                let schema = match self.tier_schema(tier, operation)? {
                    Some(schema) => self.compile(schema, &format!("{} ({})", operation, tier))?,
                    None => Absent::shared(),
                };
                bundle = match operation {
                    Operation::Create => bundle.create(schema),
                    Operation::Update => bundle.update(schema),
                    Operation::Delete => bundle.delete(schema),
                    _ => bundle.read(schema),
                };
            }
            debug!(resource = self.display_name(), tier = %tier, ?bundle, "compiled tier");
            crud = crud.with_tier(tier, bundle);
        }

        Ok(crud)
    }

    /// Resource-identifying params. Defaults to an empty object schema.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidSchema` if the schema doesn't compile.
    pub fn params_schema(&self) -> Result<SchemaRef, LoadError> {
        self.object_schema(self.params.as_ref(), "params")
    }

    /// Query schema. Defaults to an empty object schema.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidSchema` if the schema doesn't compile.
    pub fn query_schema(&self) -> Result<SchemaRef, LoadError> {
        self.object_schema(self.query.as_ref(), "query")
    }

    /// A handler builder preloaded with this document's schemas and config.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if any schema fails to resolve or compile.
    pub fn builder(&self) -> Result<CrudHandlersBuilder, LoadError> {
        Ok(CrudHandlers::builder(self.crud_schema()?, self.params_schema()?)
            .query_schema(self.query_schema()?)
            .config(self.config))
    }

    fn object_schema(&self, schema: Option<&Value>, part: &str) -> Result<SchemaRef, LoadError> {
        let schema = schema
            .map(strip_annotations)
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));
        self.compile(schema, part)
    }

    fn compile(&self, schema: Value, part: &str) -> Result<SchemaRef, LoadError> {
        JsonSchema::shared(schema).map_err(|e| LoadError::InvalidSchema {
            context: format!("{} {}", self.display_name(), part),
            message: e.to_string(),
        })
    }
}
