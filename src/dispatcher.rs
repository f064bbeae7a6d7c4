//! Operation dispatch - the validation lifecycle around one callback invocation.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, trace};

use crate::access::Capability;
use crate::error::{CrudError, ValidationFailure};
use crate::schema::{partial_of, SchemaRef, ValidateOptions};
use crate::types::{AccessTier, Operation};

/// An already-resolved caller identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub tier: AccessTier,
    pub project: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl Auth {
    pub fn new(tier: AccessTier, project: Value) -> Self {
        Self {
            tier,
            project,
            user: None,
        }
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Everything one invocation needs. Built fresh per call.
#[derive(Debug, Clone)]
pub struct CallEnvelope {
    pub params: Value,
    pub query: Value,
    pub data: Option<Value>,
    pub auth: Auth,
}

/// Arguments passed to an operation callback.
#[derive(Debug, Clone)]
pub struct OperationArgs {
    /// Validated params (partial for List and Create).
    pub params: Value,
    /// Admin-shaped data for Create and Update; `None` otherwise.
    pub data: Option<Value>,
    pub auth: Auth,
    pub query: Value,
}

/// Arguments passed to the prepare hook.
#[derive(Debug, Clone)]
pub struct PrepareArgs {
    pub params: Value,
    pub auth: Auth,
    pub query: Value,
    pub operation: Operation,
}

/// Result of a List callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub items: Vec<Value>,
    /// Always `false`; pagination is not implemented.
    pub is_paginated: bool,
}

impl ListResult {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            is_paginated: false,
        }
    }
}

impl From<ListResult> for Value {
    fn from(list: ListResult) -> Self {
        json!({ "items": list.items, "is_paginated": list.is_paginated })
    }
}

pub type OperationCallback =
    Arc<dyn Fn(OperationArgs) -> BoxFuture<'static, anyhow::Result<Option<Value>>> + Send + Sync>;

pub type PrepareCallback =
    Arc<dyn Fn(PrepareArgs) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Caller-supplied callbacks. An operation is synthesized only if it has one.
#[derive(Clone, Default)]
pub struct OperationHandlers {
    prepare: Option<PrepareCallback>,
    callbacks: BTreeMap<Operation, OperationCallback>,
}

impl fmt::Debug for OperationHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandlers")
            .field("prepare", &self.prepare.is_some())
            .field("operations", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross-cutting hook run before every operation callback.
    pub fn on_prepare<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PrepareArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.prepare = Some(Arc::new(move |args| f(args).boxed()));
        self
    }

    pub fn on_create<F, Fut>(self, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.on_entity(Operation::Create, f)
    }

    pub fn on_read<F, Fut>(self, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.on_entity(Operation::Read, f)
    }

    pub fn on_update<F, Fut>(self, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.on_entity(Operation::Update, f)
    }

    pub fn on_list<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListResult>> + Send + 'static,
    {
        let callback: OperationCallback =
            Arc::new(move |args| f(args).map_ok(|list| Some(Value::from(list))).boxed());
        self.callbacks.insert(Operation::List, callback);
        self
    }

    pub fn on_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: OperationCallback = Arc::new(move |args| f(args).map_ok(|()| None).boxed());
        self.callbacks.insert(Operation::Delete, callback);
        self
    }

    fn on_entity<F, Fut>(mut self, operation: Operation, f: F) -> Self
    where
        F: Fn(OperationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let callback: OperationCallback = Arc::new(move |args| f(args).map_ok(Some).boxed());
        self.callbacks.insert(operation, callback);
        self
    }

    pub fn prepare(&self) -> Option<&PrepareCallback> {
        self.prepare.as_ref()
    }

    pub fn callback(&self, operation: Operation) -> Option<&OperationCallback> {
        self.callbacks.get(&operation)
    }

    /// Operations that have a callback.
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.callbacks.keys().copied()
    }
}

/// Runs one operation at one tier.
#[derive(Clone)]
pub struct Dispatcher {
    capability: Capability,
    params: SchemaRef,
    prepare: Option<PrepareCallback>,
    callback: OperationCallback,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("operation", &self.capability.operation)
            .field("tier", &self.capability.tier)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Returns `None` if `handlers` has no callback for the capability's operation.
    pub fn new(
        capability: Capability,
        params: &SchemaRef,
        handlers: &OperationHandlers,
    ) -> Option<Self> {
        let callback = handlers.callback(capability.operation)?.clone();
        let params = if capability.operation.has_partial_params() {
            partial_of(params)
        } else {
            Arc::clone(params)
        };

        Some(Self {
            capability,
            params,
            prepare: handlers.prepare().cloned(),
            callback,
        })
    }

    pub fn operation(&self) -> Operation {
        self.capability.operation
    }

    pub fn tier(&self) -> AccessTier {
        self.capability.tier
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// The params schema this dispatcher validates against.
    pub fn params_schema(&self) -> &SchemaRef {
        &self.params
    }

    /// Run the full lifecycle: params, this tier's input, admin input,
    /// prepare, callback, admin output, then projection to this tier's output.
    ///
    /// # Errors
    ///
    /// Returns `CrudError::TierMismatch` when the envelope's identity is not of
    /// this dispatcher's tier, `CrudError::Validation` when any step's schema
    /// rejects its value, and `CrudError::Business` when the prepare hook or
    /// callback fails.
    #[instrument(
        name = "crud.invoke",
        skip_all,
        fields(operation = %self.capability.operation, tier = %self.capability.tier)
    )]
    pub async fn invoke(&self, envelope: CallEnvelope) -> Result<Option<Value>, CrudError> {
        let CallEnvelope {
            params,
            query,
            data,
            auth,
        } = envelope;
        let operation = self.capability.operation;
        let tier = self.capability.tier;
        if auth.tier != tier {
            return Err(CrudError::TierMismatch {
                expected: tier,
                actual: auth.tier,
            });
        }

        let params = validate(Some(params), &self.params, "Params validation")
            .await?
            .unwrap_or_else(|| json!({}));
        trace!("params validated");

        // Narrow to what this tier may write before the admin shape coerces it
        let data = if tier == AccessTier::Admin {
            data
        } else {
            let stage = format!("Input {} validation", tier);
            validate(data, &self.capability.access.input, &stage).await?
        };
        let data = validate(data, &self.capability.admin.input, "Input validation").await?;
        trace!("input validated against admin shape");

        if let Some(prepare) = &self.prepare {
            prepare(PrepareArgs {
                params: params.clone(),
                auth: auth.clone(),
                query: query.clone(),
                operation,
            })
            .await
            .map_err(|err| {
                debug!(error = %err, "prepare hook failed");
                CrudError::Business(err)
            })?;
        }

        let result = (self.callback)(OperationArgs {
            params,
            data: if operation.takes_data() { data } else { None },
            auth,
            query,
        })
        .await
        .map_err(|err| {
            debug!(error = %err, "operation callback failed");
            CrudError::Business(err)
        })?;

        let result = validate(
            result,
            &self.capability.admin.output,
            "Result admin validation",
        )
        .await?;

        let stage = format!("Result {} validation", tier);
        let projected = validate(result, &self.capability.access.output, &stage).await?;
        trace!("result projected");

        Ok(projected)
    }
}

async fn validate(
    value: Option<Value>,
    schema: &SchemaRef,
    stage: &str,
) -> Result<Option<Value>, ValidationFailure> {
    schema
        .validate(value.clone(), ValidateOptions::default())
        .await
        .map_err(|errors| ValidationFailure {
            stage: stage.to_string(),
            value,
            errors,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{resolve, CrudSchema, TierSchemas};
    use crate::validator::JsonSchema;
    use std::sync::Mutex;

    fn capability(operation: Operation, tier: AccessTier) -> Capability {
        let admin = TierSchemas::new()
            .update(
                JsonSchema::shared(json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" }, "flag": { "type": "boolean" } }
                }))
                .unwrap(),
            )
            .read(
                JsonSchema::shared(json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" }, "flag": { "type": "boolean" } },
                    "required": ["name"]
                }))
                .unwrap(),
            );
        let client = TierSchemas::new()
            .update(
                JsonSchema::shared(json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" } }
                }))
                .unwrap(),
            )
            .read(
                JsonSchema::shared(json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" } }
                }))
                .unwrap(),
            );
        let crud = CrudSchema::new()
            .with_tier(AccessTier::Admin, admin)
            .with_tier(AccessTier::Client, client);

        Capability {
            operation,
            tier,
            access: resolve(&crud, operation, tier).unwrap(),
            admin: resolve(&crud, operation, AccessTier::Admin).unwrap(),
        }
    }

    fn params_schema() -> SchemaRef {
        JsonSchema::shared(json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        }))
        .unwrap()
    }

    fn envelope(params: Value, data: Option<Value>) -> CallEnvelope {
        CallEnvelope {
            params,
            query: json!({}),
            data,
            auth: Auth::new(AccessTier::Client, json!({ "id": "p1" })),
        }
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let prepare_log = Arc::clone(&log);
        let update_log = Arc::clone(&log);

        let handlers = OperationHandlers::new()
            .on_prepare(move |args| {
                prepare_log
                    .lock()
                    .unwrap()
                    .push(format!("prepare:{}", args.operation));
                async { Ok(()) }
            })
            .on_update(move |args| {
                update_log
                    .lock()
                    .unwrap()
                    .push(format!("update:{}", args.data.clone().unwrap()));
                async { Ok(json!({ "name": "a", "flag": true })) }
            });

        let dispatcher = Dispatcher::new(
            capability(Operation::Update, AccessTier::Client),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let result = dispatcher
            .invoke(envelope(
                json!({ "id": "7" }),
                Some(json!({ "name": "a", "flag": "true", "extra": 1 })),
            ))
            .await
            .unwrap();

        assert_eq!(result, Some(json!({ "name": "a" })));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "prepare:update".to_string(),
                r#"update:{"name":"a"}"#.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn params_failure_stops_before_callback() {
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let handlers = OperationHandlers::new().on_read(move |_| {
            *flag.lock().unwrap() = true;
            async { Ok(json!({ "name": "a" })) }
        });
        let dispatcher = Dispatcher::new(
            capability(Operation::Read, AccessTier::Client),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let err = dispatcher
            .invoke(envelope(json!({}), None))
            .await
            .unwrap_err();
        match err {
            CrudError::Validation(failure) => assert_eq!(failure.stage, "Params validation"),
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn list_params_are_partial() {
        let handlers = OperationHandlers::new()
            .on_list(|_| async { Ok(ListResult::new(vec![json!({ "name": "a" })])) });
        let dispatcher = Dispatcher::new(
            capability(Operation::List, AccessTier::Client),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let result = dispatcher.invoke(envelope(json!({}), None)).await.unwrap();
        assert_eq!(
            result,
            Some(json!({ "items": [{ "name": "a" }], "is_paginated": false }))
        );
    }

    #[tokio::test]
    async fn malformed_result_fails_admin_validation() {
        let handlers =
            OperationHandlers::new().on_read(|_| async { Ok(json!({ "flag": false })) });
        let dispatcher = Dispatcher::new(
            capability(Operation::Read, AccessTier::Client),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let err = dispatcher
            .invoke(envelope(json!({ "id": 1 }), None))
            .await
            .unwrap_err();
        match err {
            CrudError::Validation(failure) => {
                assert_eq!(failure.stage, "Result admin validation");
                assert_eq!(failure.value, Some(json!({ "flag": false })));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_must_match_dispatcher_tier() {
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let handlers = OperationHandlers::new().on_read(move |_| {
            *flag.lock().unwrap() = true;
            async { Ok(json!({ "name": "a", "flag": true })) }
        });
        let dispatcher = Dispatcher::new(
            capability(Operation::Read, AccessTier::Admin),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let err = dispatcher
            .invoke(envelope(json!({ "id": 1 }), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrudError::TierMismatch {
                expected: AccessTier::Admin,
                actual: AccessTier::Client
            }
        ));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn lower_tier_input_is_narrowed_first() {
        let handlers = OperationHandlers::new().on_update(|args| async move {
            Ok(json!({ "name": "a", "seen": args.data }))
        });
        let dispatcher = Dispatcher::new(
            capability(Operation::Update, AccessTier::Client),
            &params_schema(),
            &handlers,
        )
        .unwrap();

        let err = dispatcher
            .invoke(envelope(json!({ "id": 1 }), Some(json!({ "name": 5 }))))
            .await
            .unwrap_err();
        match err {
            CrudError::Validation(failure) => {
                assert_eq!(failure.stage, "Input client validation")
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn no_callback_no_dispatcher() {
        let handlers = OperationHandlers::new();
        assert!(Dispatcher::new(
            capability(Operation::Read, AccessTier::Client),
            &params_schema(),
            &handlers
        )
        .is_none());
    }
}
