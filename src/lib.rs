//! Tiered CRUD
//!
//! Synthesizes REST CRUD handlers for one resource from per-tier schemas.
//!
//! Each access tier (`client < server < admin`) declares which operations it
//! supports and the data shape it may see. Every call's data is narrowed to
//! the caller's tier and validated against the admin shape, handed to a
//! business callback, and the result is projected down to the caller's tier.
//!
//! # Example
//!
//! ```
//! use tiered_crud::{
//!     AccessTier, CrudHandlers, CrudSchema, DirectCall, JsonSchema, OperationHandlers,
//!     TierSchemas,
//! };
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let widget = |extra: bool| {
//!     let mut properties = json!({ "name": { "type": "string" } });
//!     if extra {
//!         properties["secret"] = json!({ "type": "string" });
//!     }
//!     JsonSchema::shared(json!({ "type": "object", "properties": properties })).unwrap()
//! };
//!
//! let crud = CrudSchema::new()
//!     .with_tier(AccessTier::Server, TierSchemas::new().create(widget(false)).read(widget(false)))
//!     .with_tier(AccessTier::Admin, TierSchemas::new().create(widget(true)).read(widget(true)));
//! let params = JsonSchema::shared(json!({ "type": "object", "properties": {} })).unwrap();
//!
//! let handlers = CrudHandlers::builder(crud, params)
//!     .handlers(OperationHandlers::new().on_create(|args| async move {
//!         let mut widget = args.data.unwrap_or_default();
//!         widget["secret"] = json!("s3cret");
//!         Ok(widget)
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let created = handlers
//!     .direct_by_name("serverCreate")
//!     .unwrap()
//!     .call(DirectCall::new(json!({ "id": "p1" })).data(json!({ "name": "a" })))
//!     .await
//!     .unwrap();
//!
//! // The server tier never sees admin-only fields
//! assert_eq!(created, Some(json!({ "name": "a" })));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! # Availability
//!
//! | Operation | Available at tier T when | Input | Output |
//! |-----------|--------------------------|-------|--------|
//! | Create | T has `create` | T's `create` | T's `read` |
//! | Read | T has `read` | absent | T's `read` |
//! | List | T has `read` | absent | `{ items: [T's read], is_paginated: false }` |
//! | Update | T has `update` | T's `update` | T's `read` |
//! | Delete | T has `delete` | T's `delete` | absent |
//!
//! # Resource documents
//!
//! Tiers can also be derived from one annotated document, see [`ResourceDocument`]:
//! ```json
//! { "secret": { "type": "string", "crud_access": "admin" } }
//! ```

mod access;
mod annotations;
mod dispatcher;
mod document;
mod error;
pub mod fields;
mod handlers;
mod linter;
mod loader;
mod schema;
mod types;
mod validator;

pub use access::{resolve, Capability, CapabilityTable, CrudSchema, OperationSchemas, TierSchemas};
pub use annotations::{
    get_access, resolve as resolve_annotations, strip_annotations, Access, ResolveOptions,
};
pub use dispatcher::{
    Auth, CallEnvelope, Dispatcher, ListResult, OperationArgs, OperationCallback,
    OperationHandlers, PrepareArgs, PrepareCallback,
};
pub use document::{OperationDocument, ResourceDocument};
pub use error::{
    CrudError, InvocationError, LoadError, RouteError, SchemaError, SetupError, StatusError,
    ValidationFailure,
};
pub use handlers::{
    describe_route, CrudHandlers, CrudHandlersBuilder, CrudRequest, CrudResponse, DirectCall,
    DirectHandler, RequestShape, ResponseShape, RouteHandler, RouteOverload,
};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{bundle_refs, is_url, load_json, load_json_auto, load_json_str, navigate_fragment};
pub use schema::{partial_of, Absent, ListSchema, Schema, SchemaRef, ValidateOptions};
pub use types::{direct_name, AccessTier, BodyType, CrudConfig, Operation};
pub use validator::JsonSchema;

#[cfg(feature = "remote")]
pub use loader::load_json_url;
