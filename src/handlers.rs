//! Handler synthesis - HTTP route handlers and direct-call functions per
//! operation and tier.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::access::{Capability, CapabilityTable, CrudSchema};
use crate::dispatcher::{Auth, CallEnvelope, Dispatcher, OperationHandlers};
use crate::error::{CrudError, InvocationError, RouteError, SchemaError, SetupError};
use crate::schema::{partial_of, SchemaRef, ValidateOptions};
use crate::types::{direct_name, AccessTier, BodyType, CrudConfig, Operation};
use crate::validator::JsonSchema;

/// Request half of a route overload, as a transport would document it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestShape {
    pub auth_tier: AccessTier,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    pub params: Option<Value>,
    pub query: Option<Value>,
    pub body: Option<Value>,
}

/// Response half of a route overload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseShape {
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    pub body_type: BodyType,
    /// Whether a `location` header echoing the request URL is attached.
    pub location: bool,
    pub body: Option<Value>,
}

fn serialize_method<S: serde::Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

/// Describe the route overload for one capability.
pub fn describe_route(
    capability: &Capability,
    params: &SchemaRef,
    query: &SchemaRef,
) -> (RequestShape, ResponseShape) {
    let operation = capability.operation;
    let params = if operation.has_partial_params() {
        partial_of(params)
    } else {
        Arc::clone(params)
    };

    let request = RequestShape {
        auth_tier: capability.tier,
        method: operation.http_method(),
        params: params.describe(),
        query: query.describe(),
        body: capability.access.input.describe(),
    };
    let response = ResponseShape {
        status: operation.success_status(),
        body_type: operation.body_type(),
        location: operation == Operation::Create,
        body: capability.access.output.describe(),
    };
    (request, response)
}

/// An incoming HTTP request, already routed and authenticated by the transport.
#[derive(Debug, Clone)]
pub struct CrudRequest {
    pub method: Method,
    pub url: String,
    pub auth: Auth,
    pub params: Value,
    pub query: Value,
    pub body: Option<Value>,
}

impl CrudRequest {
    pub fn new(method: Method, url: impl Into<String>, auth: Auth) -> Self {
        Self {
            method,
            url: url.into(),
            auth,
            params: json!({}),
            query: json!({}),
            body: None,
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// The response a route handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CrudResponse {
    pub status: StatusCode,
    /// `location` header values.
    pub location: Vec<String>,
    pub body_type: BodyType,
    pub body: Option<Value>,
}

/// One tier's variant of a route handler.
#[derive(Debug, Clone)]
pub struct RouteOverload {
    request: RequestShape,
    response: ResponseShape,
    params: SchemaRef,
    query: SchemaRef,
    dispatcher: Arc<Dispatcher>,
}

impl RouteOverload {
    pub fn tier(&self) -> AccessTier {
        self.dispatcher.tier()
    }

    pub fn request(&self) -> &RequestShape {
        &self.request
    }

    pub fn response(&self) -> &ResponseShape {
        &self.response
    }
}

/// HTTP handler for one operation, with one overload per available tier.
#[derive(Debug, Clone)]
pub struct RouteHandler {
    operation: Operation,
    reject_unknown: bool,
    overloads: Vec<RouteOverload>,
}

impl RouteHandler {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// `<operation>Handler`, e.g. `createHandler`.
    pub fn name(&self) -> String {
        self.operation.handler_name()
    }

    pub fn method(&self) -> Method {
        self.operation.http_method()
    }

    pub fn overloads(&self) -> &[RouteOverload] {
        &self.overloads
    }

    pub fn available_tiers(&self) -> Vec<AccessTier> {
        self.overloads.iter().map(RouteOverload::tier).collect()
    }

    /// Handle a request with the overload matching the caller's tier.
    ///
    /// # Errors
    ///
    /// - `MethodNotAllowed` if the method is not this operation's
    /// - `AccessTypeNotAllowed` if the caller's tier has no overload
    /// - `BadRequest` if params, query or body do not match the tier's shape
    /// - `Crud` for dispatcher failures
    pub async fn handle(&self, request: CrudRequest) -> Result<CrudResponse, RouteError> {
        let expected = self.method();
        if request.method != expected {
            return Err(RouteError::MethodNotAllowed {
                method: request.method,
                expected,
            });
        }

        let overload = self
            .overloads
            .iter()
            .find(|o| o.tier() == request.auth.tier)
            .ok_or_else(|| RouteError::AccessTypeNotAllowed {
                tier: request.auth.tier,
                allowed: self.available_tiers(),
            })?;

        let options = ValidateOptions {
            reject_unknown: self.reject_unknown,
        };
        let mut errors = Vec::new();
        let params = check_request(
            &overload.params,
            Some(request.params),
            options,
            "params",
            &mut errors,
        )
        .await
        .unwrap_or_else(|| json!({}));
        let query = check_request(
            &overload.query,
            Some(request.query),
            options,
            "query",
            &mut errors,
        )
        .await
        .unwrap_or_else(|| json!({}));
        let body = check_request(
            &overload.dispatcher.capability().access.input,
            request.body,
            options,
            "body",
            &mut errors,
        )
        .await;
        if !errors.is_empty() {
            return Err(RouteError::BadRequest { errors });
        }

        let result = overload
            .dispatcher
            .invoke(CallEnvelope {
                params,
                query,
                data: body,
                auth: request.auth,
            })
            .await?;

        Ok(CrudResponse {
            status: self.operation.success_status(),
            location: if self.operation == Operation::Create {
                vec![request.url]
            } else {
                Vec::new()
            },
            body_type: self.operation.body_type(),
            body: result,
        })
    }
}

async fn check_request(
    schema: &SchemaRef,
    value: Option<Value>,
    options: ValidateOptions,
    part: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<Value> {
    match schema.validate(value, options).await {
        Ok(valid) => valid,
        Err(reasons) => {
            errors.extend(reasons.into_iter().map(|e| e.nested(part)));
            None
        }
    }
}

/// Resource key fields, query, data and identity for a direct call.
#[derive(Debug, Clone)]
pub struct DirectCall {
    pub params: Map<String, Value>,
    pub query: Option<Value>,
    pub data: Option<Value>,
    pub project: Value,
    pub user: Option<Value>,
}

impl DirectCall {
    pub fn new(project: Value) -> Self {
        Self {
            params: Map::new(),
            query: None,
            data: None,
            project,
            user: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Programmatic entry point for one operation at one tier (`serverCreate`).
#[derive(Debug, Clone)]
pub struct DirectHandler {
    name: String,
    dispatcher: Arc<Dispatcher>,
}

impl DirectHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> AccessTier {
        self.dispatcher.tier()
    }

    pub fn operation(&self) -> Operation {
        self.dispatcher.operation()
    }

    /// Invoke the operation as this handler's tier, bypassing HTTP framing.
    ///
    /// # Errors
    ///
    /// Every failure is wrapped in an [`InvocationError`]; use
    /// [`InvocationError::cause`] to reach the original.
    pub async fn call(&self, call: DirectCall) -> Result<Option<Value>, InvocationError> {
        let DirectCall {
            params,
            query,
            data,
            project,
            user,
        } = call;
        let auth = Auth {
            tier: self.tier(),
            project,
            user,
        };

        self.dispatcher
            .invoke(CallEnvelope {
                params: Value::Object(params),
                query: query.unwrap_or_else(|| json!({})),
                data,
                auth,
            })
            .await
            .map_err(InvocationError::new)
    }
}

/// Builder for [`CrudHandlers`].
#[derive(Debug, Clone)]
pub struct CrudHandlersBuilder {
    crud: CrudSchema,
    params: SchemaRef,
    query: Option<SchemaRef>,
    handlers: OperationHandlers,
    config: CrudConfig,
}

impl CrudHandlersBuilder {
    pub fn query_schema(mut self, query: SchemaRef) -> Self {
        self.query = Some(query);
        self
    }

    pub fn handlers(mut self, handlers: OperationHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn config(mut self, config: CrudConfig) -> Self {
        self.config = config;
        self
    }

    /// Reject operations that have a callback but no available tier.
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Flag unknown keys in inbound requests instead of stripping them.
    pub fn reject_unknown_request(mut self, reject: bool) -> Self {
        self.config.reject_unknown_request = reject;
        self
    }

    /// Resolve capabilities and synthesize every route and direct handler.
    ///
    /// # Errors
    ///
    /// Returns `SetupError` when an admin schema is missing, or in strict mode
    /// when an operation with a callback has no available tier.
    pub fn build(self) -> Result<CrudHandlers, SetupError> {
        let query = match self.query {
            Some(query) => query,
            None => JsonSchema::shared(json!({ "type": "object", "properties": {} }))?,
        };
        let operations: Vec<Operation> = Operation::ALL
            .into_iter()
            .filter(|op| self.handlers.callback(*op).is_some())
            .collect();
        let table = CapabilityTable::build(&self.crud, operations.iter().copied())?;

        let mut routes = BTreeMap::new();
        let mut direct = BTreeMap::new();

        for operation in operations {
            let mut overloads = Vec::new();

            for tier in table.available_tiers(operation) {
                let Some(capability) = table.get(operation, tier) else {
                    continue;
                };
                let Some(dispatcher) =
                    Dispatcher::new(capability.clone(), &self.params, &self.handlers)
                else {
                    continue;
                };
                let dispatcher = Arc::new(dispatcher);
                let (request, response) = describe_route(capability, &self.params, &query);

                overloads.push(RouteOverload {
                    request,
                    response,
                    params: Arc::clone(dispatcher.params_schema()),
                    query: Arc::clone(&query),
                    dispatcher: Arc::clone(&dispatcher),
                });

                let name = direct_name(tier, operation);
                debug!(operation = %operation, tier = %tier, direct = %name, "synthesized handler");
                direct.insert((tier, operation), DirectHandler { name, dispatcher });
            }

            if overloads.is_empty() {
                if self.config.strict {
                    return Err(SetupError::NoAvailableTier { operation });
                }
                warn!(
                    operation = %operation,
                    "operation has a callback but no tier defines a schema for it"
                );
            }

            routes.insert(
                operation,
                RouteHandler {
                    operation,
                    reject_unknown: self.config.reject_unknown_request,
                    overloads,
                },
            );
        }

        Ok(CrudHandlers {
            routes,
            direct,
            table,
        })
    }
}

/// Every synthesized route handler and direct-call function of a resource.
#[derive(Debug, Clone)]
pub struct CrudHandlers {
    routes: BTreeMap<Operation, RouteHandler>,
    direct: BTreeMap<(AccessTier, Operation), DirectHandler>,
    table: CapabilityTable,
}

impl CrudHandlers {
    /// Start building handlers for `crud`, with `params` identifying one resource.
    pub fn builder(crud: CrudSchema, params: SchemaRef) -> CrudHandlersBuilder {
        CrudHandlersBuilder {
            crud,
            params,
            query: None,
            handlers: OperationHandlers::new(),
            config: CrudConfig::default(),
        }
    }

    /// The route handler for `operation`, if it has a callback.
    pub fn route(&self, operation: Operation) -> Option<&RouteHandler> {
        self.routes.get(&operation)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteHandler> {
        self.routes.values()
    }

    pub fn direct(&self, tier: AccessTier, operation: Operation) -> Option<&DirectHandler> {
        self.direct.get(&(tier, operation))
    }

    /// Look up a direct handler by name, e.g. `serverCreate`.
    pub fn direct_by_name(&self, name: &str) -> Option<&DirectHandler> {
        self.direct.values().find(|handler| handler.name == name)
    }

    pub fn direct_handlers(&self) -> impl Iterator<Item = &DirectHandler> {
        self.direct.values()
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.table
    }

    /// Dispatch one call without HTTP framing or error wrapping, at the tier
    /// of the envelope's identity.
    ///
    /// Returns `None` when `operation` is not synthesized at that tier.
    pub async fn invoke(
        &self,
        operation: Operation,
        envelope: CallEnvelope,
    ) -> Option<Result<Option<Value>, CrudError>> {
        let handler = self.direct(envelope.auth.tier, operation)?;
        Some(handler.dispatcher.invoke(envelope).await)
    }
}
