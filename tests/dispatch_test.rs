//! Integration tests for the dispatch lifecycle through direct-call handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tiered_crud::{
    AccessTier, Auth, CallEnvelope, CrudError, CrudHandlers, CrudSchema, DirectCall, JsonSchema,
    ListResult, ListSchema, Operation, OperationHandlers, Schema, SchemaError, SchemaRef,
    SetupError, StatusError, TierSchemas, ValidateOptions,
};

fn schema(value: Value) -> SchemaRef {
    JsonSchema::shared(value).unwrap()
}

fn widget(fields: &[&str]) -> SchemaRef {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| {
            let declared = match *f {
                "count" => json!({ "type": "integer" }),
                _ => json!({ "type": "string" }),
            };
            (f.to_string(), declared)
        })
        .collect();
    schema(json!({ "type": "object", "properties": properties }))
}

fn params() -> SchemaRef {
    schema(json!({
        "type": "object",
        "properties": { "widget_id": { "type": "string" } },
        "required": ["widget_id"]
    }))
}

/// Create at server+admin; Read at every tier; Update and Delete admin only.
fn widget_crud() -> CrudSchema {
    CrudSchema::new()
        .with_tier(
            AccessTier::Admin,
            TierSchemas::new()
                .create(widget(&["name", "secret", "count"]))
                .read(widget(&["id", "name", "secret", "count"]))
                .update(widget(&["name", "secret"]))
                .delete(tiered_crud::Absent::shared()),
        )
        .with_tier(
            AccessTier::Server,
            TierSchemas::new()
                .create(widget(&["name", "count"]))
                .read(widget(&["id", "name", "count"])),
        )
        .with_tier(
            AccessTier::Client,
            TierSchemas::new().read(widget(&["id", "name"])),
        )
}

fn project() -> Value {
    json!({ "id": "p1" })
}

mod widget_scenario {
    use super::*;

    #[tokio::test]
    async fn server_create_hides_admin_fields() {
        let seen = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&seen);

        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_create(move |args| {
                *recorded.lock().unwrap() = args.data.clone();
                async move {
                    let mut widget = args.data.unwrap_or_default();
                    widget["id"] = json!("w1");
                    widget["secret"] = json!("s3cret");
                    Ok(widget)
                }
            }))
            .build()
            .unwrap();

        let created = handlers
            .direct_by_name("serverCreate")
            .unwrap()
            .call(DirectCall::new(project()).data(json!({ "name": "a" })))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(json!({ "name": "a" })));
        assert_eq!(created, Some(json!({ "name": "a", "id": "w1" })));

        let created = handlers
            .direct(AccessTier::Admin, Operation::Create)
            .unwrap()
            .call(DirectCall::new(project()).data(json!({ "name": "a" })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created["secret"], "s3cret");
    }
}

mod availability {
    use super::*;

    fn all_callbacks() -> OperationHandlers {
        OperationHandlers::new()
            .on_create(|_| async { Ok(json!({})) })
            .on_read(|_| async { Ok(json!({})) })
            .on_list(|_| async { Ok(ListResult::new(vec![])) })
            .on_update(|_| async { Ok(json!({})) })
            .on_delete(|_| async { Ok(()) })
    }

    #[test]
    fn direct_handlers_follow_schemas() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(all_callbacks())
            .build()
            .unwrap();

        let mut names: Vec<&str> = handlers.direct_handlers().map(|h| h.name()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "adminCreate",
                "adminDelete",
                "adminList",
                "adminRead",
                "adminUpdate",
                "clientList",
                "clientRead",
                "serverCreate",
                "serverList",
                "serverRead",
            ]
        );

        assert!(handlers.direct_by_name("clientUpdate").is_none());
        assert_eq!(
            handlers.route(Operation::Update).unwrap().available_tiers(),
            vec![AccessTier::Admin]
        );
    }

    #[test]
    fn list_mirrors_read() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(all_callbacks())
            .build()
            .unwrap();
        assert_eq!(
            handlers.route(Operation::List).unwrap().available_tiers(),
            handlers.route(Operation::Read).unwrap().available_tiers()
        );
    }

    #[test]
    fn missing_admin_schema_fails_setup() {
        let crud = CrudSchema::new().with_tier(
            AccessTier::Client,
            TierSchemas::new().read(widget(&["name"])),
        );
        let result = CrudHandlers::builder(crud, params())
            .handlers(OperationHandlers::new().on_read(|_| async { Ok(json!({})) }))
            .build();
        assert!(matches!(
            result,
            Err(SetupError::MissingAdminSchema {
                operation: Operation::Read
            })
        ));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn tier_projection_is_monotonic() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_read(|args| async move {
                Ok(json!({
                    "id": args.params["widget_id"],
                    "name": "a",
                    "secret": "s",
                    "count": 3
                }))
            }))
            .build()
            .unwrap();

        let read = |name: &'static str| {
            let handler = handlers.direct_by_name(name).unwrap().clone();
            async move {
                handler
                    .call(DirectCall::new(project()).param("widget_id", "w1"))
                    .await
                    .unwrap()
                    .unwrap()
            }
        };

        assert_eq!(read("clientRead").await, json!({ "id": "w1", "name": "a" }));
        assert_eq!(
            read("serverRead").await,
            json!({ "id": "w1", "name": "a", "count": 3 })
        );
        assert_eq!(
            read("adminRead").await,
            json!({ "id": "w1", "name": "a", "secret": "s", "count": 3 })
        );
    }

    #[tokio::test]
    async fn callbacks_see_tier_narrowed_admin_data() {
        let seen = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&seen);

        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_create(move |args| {
                *recorded.lock().unwrap() = args.data.clone();
                async { Ok(json!({ "name": "a" })) }
            }))
            .build()
            .unwrap();

        handlers
            .direct_by_name("serverCreate")
            .unwrap()
            .call(
                DirectCall::new(project())
                    .data(json!({ "name": "a", "count": "7", "secret": "kept", "extra": 1 })),
            )
            .await
            .unwrap();

        // The server tier cannot write admin-only fields
        assert_eq!(*seen.lock().unwrap(), Some(json!({ "name": "a", "count": 7 })));

        handlers
            .direct(AccessTier::Admin, Operation::Create)
            .unwrap()
            .call(DirectCall::new(project()).data(json!({ "name": "a", "secret": "kept" })))
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            Some(json!({ "name": "a", "secret": "kept" }))
        );
    }

    #[tokio::test]
    async fn list_wraps_items_and_projects_each() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_list(|args| async move {
                assert!(args.params.get("widget_id").is_none());
                Ok(ListResult::new(vec![
                    json!({ "id": "1", "name": "a", "secret": "x" }),
                    json!({ "id": "2", "name": "b" }),
                ]))
            }))
            .build()
            .unwrap();

        let listed = handlers
            .direct_by_name("clientList")
            .unwrap()
            .call(DirectCall::new(project()))
            .await
            .unwrap();

        assert_eq!(
            listed,
            Some(json!({
                "items": [{ "id": "1", "name": "a" }, { "id": "2", "name": "b" }],
                "is_paginated": false
            }))
        );
    }

    #[tokio::test]
    async fn paginated_list_is_rejected() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_list(|_| async {
                Ok(ListResult {
                    items: vec![],
                    is_paginated: true,
                })
            }))
            .build()
            .unwrap();

        let err = handlers
            .direct_by_name("adminList")
            .unwrap()
            .call(DirectCall::new(project()))
            .await
            .unwrap_err();
        match err.cause() {
            CrudError::Validation(failure) => {
                assert_eq!(failure.stage, "Result admin validation");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_returns_nothing_and_skips_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_delete(move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert!(args.data.is_none());
                    Ok(())
                }
            }))
            .build()
            .unwrap();

        let result = handlers
            .direct_by_name("adminDelete")
            .unwrap()
            .call(DirectCall::new(project()).param("widget_id", "w1"))
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prepare_failure_aborts_before_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(
                OperationHandlers::new()
                    .on_prepare(|args| async move {
                        if args.auth.user.is_none() {
                            anyhow::bail!(StatusError::forbidden("sign in first"));
                        }
                        Ok(())
                    })
                    .on_read(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok(json!({ "name": "a" })) }
                    }),
            )
            .build()
            .unwrap();
        let handler = handlers.direct_by_name("clientRead").unwrap();

        let err = handler
            .call(DirectCall::new(project()).param("widget_id", "w1"))
            .await
            .unwrap_err();
        assert!(err.cause().business().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handler
            .call(
                DirectCall::new(project())
                    .param("widget_id", "w1")
                    .user(json!({ "id": "u1" })),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invoke_projects_to_the_identity_tier() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_read(move |args| {
                recorded.lock().unwrap().push(args.auth.tier);
                async { Ok(json!({ "id": "w1", "name": "a", "secret": "s" })) }
            }))
            .build()
            .unwrap();

        let envelope = |tier| CallEnvelope {
            params: json!({ "widget_id": "w1" }),
            query: json!({}),
            data: None,
            auth: Auth::new(tier, project()),
        };

        let client = handlers
            .invoke(Operation::Read, envelope(AccessTier::Client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client, Some(json!({ "id": "w1", "name": "a" })));

        let admin = handlers
            .invoke(Operation::Read, envelope(AccessTier::Admin))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.unwrap()["secret"], "s");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![AccessTier::Client, AccessTier::Admin]
        );
    }

    #[tokio::test]
    async fn invoke_returns_unwrapped_errors() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_read(|_| async { Ok(json!({ "name": "a" })) }))
            .build()
            .unwrap();

        let envelope = CallEnvelope {
            params: json!({}),
            query: json!({}),
            data: None,
            auth: Auth::new(AccessTier::Client, project()),
        };
        let result = handlers
            .invoke(Operation::Read, envelope.clone())
            .await
            .unwrap();
        match result {
            Err(CrudError::Validation(failure)) => {
                assert_eq!(failure.stage, "Params validation");
                assert!(failure.to_string().starts_with("Params validation failed in CRUD handler"));
            }
            other => panic!("expected params failure, got {other:?}"),
        }

        assert!(handlers
            .invoke(Operation::Update, envelope)
            .await
            .is_none());
    }
}

mod invocation_errors {
    use super::*;

    #[tokio::test]
    async fn business_error_is_wrapped() {
        let handlers = CrudHandlers::builder(widget_crud(), params())
            .handlers(OperationHandlers::new().on_read(|_| async {
                Err(anyhow::Error::new(StatusError::not_found("no such widget")))
            }))
            .build()
            .unwrap();

        let err = handlers
            .direct_by_name("serverRead")
            .unwrap()
            .call(DirectCall::new(project()).param("widget_id", "missing"))
            .await
            .unwrap_err();

        // The wrapper itself is not the business error
        let as_error: &(dyn std::error::Error + 'static) = &err;
        assert!(as_error.downcast_ref::<StatusError>().is_none());

        let original = err
            .cause()
            .business()
            .and_then(|e| e.downcast_ref::<StatusError>())
            .unwrap();
        assert_eq!(original.status, http::StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("see cause()"));
    }
}

/// A schema that only counts how often it is consulted.
#[derive(Debug, Default)]
struct CountingSchema {
    calls: AtomicUsize,
}

#[async_trait]
impl Schema for CountingSchema {
    async fn validate(
        &self,
        value: Option<Value>,
        _options: ValidateOptions,
    ) -> Result<Option<Value>, Vec<SchemaError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    fn describe(&self) -> Option<Value> {
        Some(json!({}))
    }
}

mod injected_schemas {
    use super::*;

    #[tokio::test]
    async fn dispatcher_consults_injected_schemas() {
        let params = Arc::new(CountingSchema::default());
        let read = Arc::new(CountingSchema::default());
        let read_ref: SchemaRef = read.clone();

        let crud = CrudSchema::new()
            .with_tier(AccessTier::Admin, TierSchemas::new().read(read_ref.clone()))
            .with_tier(AccessTier::Client, TierSchemas::new().read(read_ref));

        let handlers = CrudHandlers::builder(crud, params.clone())
            .handlers(OperationHandlers::new().on_read(|_| async { Ok(json!({ "any": "thing" })) }))
            .build()
            .unwrap();

        let result = handlers
            .direct_by_name("clientRead")
            .unwrap()
            .call(DirectCall::new(project()))
            .await
            .unwrap();

        assert_eq!(result, Some(json!({ "any": "thing" })));
        assert_eq!(params.calls.load(Ordering::SeqCst), 1);
        // Admin output, then client projection
        assert_eq!(read.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn list_container_uses_injected_item_schema() {
        let item = Arc::new(CountingSchema::default());
        let list = ListSchema::new(item.clone());
        list.validate(
            Some(json!({ "items": [1, 2, 3], "is_paginated": false })),
            ValidateOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(item.calls.load(Ordering::SeqCst), 3);
    }
}
