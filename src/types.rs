//! Core types for tiered CRUD synthesis.

use std::fmt;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field-level access annotation key used in resource documents.
pub const ACCESS_ANNOTATION: &str = "crud_access";

/// Operations that may key the object form of an access annotation.
pub const ANNOTATED_OPERATIONS: &[&str] = &["create", "read", "update", "delete"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Privilege level of an invoking identity.
///
/// Tiers are ordered: `Client < Server < Admin`. A more privileged tier sees
/// every field a less privileged one sees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    #[default]
    Client,
    Server,
    Admin,
}

impl AccessTier {
    /// All tiers, least privileged first.
    pub const ALL: [AccessTier; 3] = [AccessTier::Client, AccessTier::Server, AccessTier::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Client => "client",
            AccessTier::Server => "server",
            AccessTier::Admin => "admin",
        }
    }

    /// Parse a tier name. Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(AccessTier::Client),
            "server" => Some(AccessTier::Server),
            "admin" => Some(AccessTier::Admin),
            _ => None,
        }
    }

    /// Whether this tier is at least as privileged as `minimum`.
    pub fn satisfies(self, minimum: AccessTier) -> bool {
        self >= minimum
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the five canonical CRUD operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    List,
    Update,
    Delete,
}

impl Operation {
    /// All operations in route registration order.
    pub const ALL: [Operation; 5] = [
        Operation::Read,
        Operation::List,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    /// Lowercase name, as passed to the prepare hook.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::List => "list",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Capitalized name, as used in direct-call names (`serverCreate`).
    pub fn title(&self) -> &'static str {
        match self {
            Operation::Create => "Create",
            Operation::Read => "Read",
            Operation::List => "List",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        }
    }

    /// Parse an operation name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" => Some(Operation::Create),
            "read" => Some(Operation::Read),
            "list" => Some(Operation::List),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }

    /// The operation whose schema decides availability. List mirrors Read.
    pub fn schema_operation(&self) -> Operation {
        match self {
            Operation::List => Operation::Read,
            other => *other,
        }
    }

    pub fn http_method(&self) -> Method {
        match self {
            Operation::Read | Operation::List => Method::GET,
            Operation::Create => Method::POST,
            Operation::Update => Method::PATCH,
            Operation::Delete => Method::DELETE,
        }
    }

    pub fn success_status(&self) -> StatusCode {
        match self {
            Operation::Create => StatusCode::CREATED,
            _ => StatusCode::OK,
        }
    }

    pub fn body_type(&self) -> BodyType {
        match self {
            Operation::Delete => BodyType::Empty,
            _ => BodyType::Json,
        }
    }

    /// List and Create do not address a single resource, so every key is optional.
    pub fn has_partial_params(&self) -> bool {
        matches!(self, Operation::List | Operation::Create)
    }

    /// Whether the operation callback receives request data.
    pub fn takes_data(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }

    /// Name of the route handler for this operation (`createHandler`).
    pub fn handler_name(&self) -> String {
        format!("{}Handler", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the direct-call function for a tier and operation (`serverCreate`).
pub fn direct_name(tier: AccessTier, operation: Operation) -> String {
    format!("{}{}", tier.as_str(), operation.title())
}

/// Framing of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Empty,
    Json,
}

/// Setup-time configuration for handler synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrudConfig {
    /// Reject setup when an operation has a callback but no tier has a schema for it.
    pub strict: bool,
    /// Flag unknown keys in inbound HTTP params, query and body instead of stripping them.
    pub reject_unknown_request: bool,
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            strict: false,
            reject_unknown_request: true,
        }
    }
}

impl CrudConfig {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn reject_unknown_request(mut self, reject: bool) -> Self {
        self.reject_unknown_request = reject;
        self
    }
}
