//! Reusable JSON-Schema fields for building resource schemas in code.
//!
//! ```
//! use tiered_crud::fields;
//!
//! let widget = fields::object(
//!     [
//!         ("id", fields::id("widget")),
//!         ("display_name", fields::display_name("widget")),
//!         ("server_metadata", fields::server_metadata("widget")),
//!         ("created_at_millis", fields::created_at_millis("widget")),
//!         ("updated_at_millis", fields::updated_at_millis("widget")),
//!         ("contact", fields::email("Who to contact about this widget")),
//!         ("homepage", fields::url("Public page of the widget")),
//!         ("tags", fields::array(fields::string("A free-form label"))),
//!         ("archived", fields::boolean("Whether the widget is hidden from listings")),
//!     ],
//!     &["id"],
//! );
//! assert_eq!(widget["properties"]["server_metadata"]["crud_access"], "server");
//! ```
//!
//! `format` keywords are descriptive; `jsonschema` does not assert them by default.

use serde_json::{json, Map, Value};

use crate::annotations::Access;
use crate::types::{AccessTier, ACCESS_ANNOTATION};

const AT_MILLIS: &str = "(the number of milliseconds since epoch, January 1, 1970, UTC)";

/// Object schema with `properties` in the given order.
pub fn object<'a>(
    properties: impl IntoIterator<Item = (&'a str, Value)>,
    required: &[&str],
) -> Value {
    let properties: Map<String, Value> = properties
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema))
        .collect();

    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Array of `items`.
pub fn array(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

/// Set the `crud_access` annotation of a field for every operation.
///
/// [`Access::Everyone`] removes the annotation.
pub fn gated(mut field: Value, access: Access) -> Value {
    let Value::Object(map) = &mut field else {
        return field;
    };
    match access {
        Access::Everyone => {
            map.remove(ACCESS_ANNOTATION);
        }
        Access::AtLeast(tier) => {
            map.insert(ACCESS_ANNOTATION.to_string(), json!(tier.as_str()));
        }
        Access::Omit => {
            map.insert(ACCESS_ANNOTATION.to_string(), json!("omit"));
        }
    }
    field
}

/// Attach an example value.
pub fn with_example(mut field: Value, example: Value) -> Value {
    if let Value::Object(map) = &mut field {
        map.insert("examples".to_string(), json!([example]));
    }
    field
}

/// Allow `null` in addition to the field's declared type.
pub fn nullable(mut field: Value) -> Value {
    if let Some(declared) = field.get("type").and_then(Value::as_str).map(str::to_string) {
        field["type"] = json!([declared, "null"]);
    }
    field
}

pub fn string(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub fn integer(description: &str) -> Value {
    json!({ "type": "integer", "description": description })
}

pub fn boolean(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

/// Immutable UUID identifying one `entity`.
pub fn id(entity: &str) -> Value {
    with_example(
        json!({
            "type": "string",
            "format": "uuid",
            "description": format!("The immutable ID used to uniquely identify this {}", entity),
        }),
        json!("3241a285-8329-4d69-8f3d-316e08cf140c"),
    )
}

/// Nullable, non-unique name shown in UIs.
pub fn display_name(entity: &str) -> Value {
    nullable(string(&format!(
        "Human-readable {} display name, used in places like frontend UI. This is not a unique identifier.",
        entity
    )))
}

pub fn created_at_millis(entity: &str) -> Value {
    with_example(
        integer(&format!("The time the {} was created {}", entity, AT_MILLIS)),
        json!(1630000000000_i64),
    )
}

pub fn updated_at_millis(entity: &str) -> Value {
    with_example(
        integer(&format!("The time the {} was last updated {}", entity, AT_MILLIS)),
        json!(1630000000000_i64),
    )
}

/// Free-form metadata readable from the client side.
pub fn client_metadata() -> Value {
    nullable(json!({
        "type": "object",
        "description": "Client metadata. Used as a data store, accessible from the client side. Do not store information that should not be exposed to the client.",
    }))
}

/// Free-form metadata visible to the server tier and above.
pub fn server_metadata(entity: &str) -> Value {
    gated(
        nullable(json!({
            "type": "object",
            "description": format!(
                "Server metadata. Used as a data store, only accessible from the server side. You can store secret information related to the {} here.",
                entity
            ),
        })),
        Access::AtLeast(AccessTier::Server),
    )
}

pub fn email(description: &str) -> Value {
    with_example(
        json!({ "type": "string", "format": "email", "description": description }),
        json!("johndoe@example.com"),
    )
}

pub fn url(description: &str) -> Value {
    json!({ "type": "string", "format": "uri", "description": description })
}

/// A tier name accepted only when it is at least `minimum`.
pub fn tier_at_least(minimum: AccessTier) -> Value {
    let allowed: Vec<&str> = AccessTier::ALL
        .into_iter()
        .filter(|tier| tier.satisfies(minimum))
        .map(|tier| tier.as_str())
        .collect();
    json!({ "type": "string", "enum": allowed })
}
