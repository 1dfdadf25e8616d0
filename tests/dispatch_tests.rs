//! Dispatcher tests — single calls, notifications, error mapping and
//! batches, driven through `handle_text`/`handle_value` exactly as a
//! transport would.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relay_protocol::{HandlerError, RpcError};
use relay_server::{
    BatchMode, DispatchConfig, Dispatcher, HandlerDescriptor, Service, ServiceMethods, Signature,
};
use serde_json::{Value, json};

/// A dispatcher with `add`, `fail`, `boom`, `echo`, and a `math` service.
fn calculator(config: DispatchConfig) -> Dispatcher {
    let mut d = Dispatcher::with_config(config);
    d.register(
        "add",
        HandlerDescriptor::sync_fn(&["a", "b"], |(a, b): (i64, i64)| Ok(a + b)),
    )
    .unwrap();
    d.register(
        "subtract",
        HandlerDescriptor::sync_fn(&["minuend", "subtrahend"], |(m, s): (i64, i64)| Ok(m - s)),
    )
    .unwrap();
    d.register(
        "fail",
        HandlerDescriptor::sync_args(Signature::new(&[]), |_| {
            Err(RpcError::new(-32001, "Denied").with_data(json!({"why": "test"})).into())
        }),
    )
    .unwrap();
    d.register(
        "boom",
        HandlerDescriptor::sync_args(Signature::new(&[]), |_| {
            Err(HandlerError::fault(anyhow::anyhow!("disk on fire")))
        }),
    )
    .unwrap();
    d.register(
        "echo",
        HandlerDescriptor::async_args(Signature::raw(), |args| async move {
            Ok::<Value, HandlerError>(args.raw_params().map(|p| p.to_value()).unwrap_or(Value::Null))
        }),
    )
    .unwrap();
    d.register_service("math", Math).unwrap();
    d
}

struct Math;

impl Service for Math {
    fn methods(self: Arc<Self>) -> ServiceMethods {
        ServiceMethods::new()
            .method(
                "divide",
                HandlerDescriptor::sync_fn(&["a", "b"], |(a, b): (f64, f64)| {
                    if b == 0.0 {
                        return Err(RpcError::new(-32001, "Division by zero").into());
                    }
                    Ok(a / b)
                }),
            )
            .method(
                "double",
                HandlerDescriptor::async_fn(&["x"], |(x,): (i64,)| async move { Ok(x * 2) }),
            )
    }
}

fn dispatcher() -> Dispatcher {
    calculator(DispatchConfig::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Single calls
// ─────────────────────────────────────────────────────────────────────────────

mod single {
    use super::*;

    #[tokio::test]
    async fn add_over_text() {
        let d = dispatcher();
        let reply = d
            .handle_text(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}"#)
            .await
            .unwrap();
        assert_eq!(reply, r#"{"jsonrpc":"2.0","result":3,"id":1}"#);
    }

    #[tokio::test]
    async fn reply_echoes_id() {
        let d = dispatcher();
        for id in [json!(7), json!("abc"), json!(null), json!(-1.5)] {
            let reply = d
                .handle_value(json!({"jsonrpc": "2.0", "method": "add", "params": [1, 1], "id": id}))
                .await
                .unwrap();
            assert_eq!(reply["id"], id);
            assert_eq!(reply["result"], 2);
        }
    }

    #[tokio::test]
    async fn zero_param_typed_handler_answers() {
        let mut d = dispatcher();
        d.register("ping", HandlerDescriptor::sync_fn(&[], |(): ()| Ok("pong")))
            .unwrap();
        for request in [
            json!({"jsonrpc": "2.0", "method": "ping", "id": 1}),
            json!({"jsonrpc": "2.0", "method": "ping", "params": [], "id": 1}),
        ] {
            let reply = d.handle_value(request).await.unwrap();
            assert_eq!(reply, json!({"jsonrpc": "2.0", "result": "pong", "id": 1}));
        }
    }

    #[tokio::test]
    async fn named_params_bind_by_name() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({
                "jsonrpc": "2.0", "method": "subtract",
                "params": {"subtrahend": 23, "minuend": 42}, "id": 3
            }))
            .await
            .unwrap();
        assert_eq!(reply["result"], 19);
    }

    #[tokio::test]
    async fn positional_params_bind_in_order() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1}))
            .await
            .unwrap();
        assert_eq!(reply["result"], 19);
    }

    #[tokio::test]
    async fn missing_named_param_is_invalid_params() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "add", "params": {"a": 1}, "id": 4}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32602);
        assert_eq!(reply["error"]["message"], "Invalid params");
        assert_eq!(reply["id"], 4);
    }

    #[tokio::test]
    async fn wrong_arity_and_types_are_invalid_params() {
        let d = dispatcher();
        for params in [json!([1, 2, 3]), json!([1]), json!(["x", 2])] {
            let reply = d
                .handle_value(json!({"jsonrpc": "2.0", "method": "add", "params": params, "id": 1}))
                .await
                .unwrap();
            assert_eq!(reply["error"]["code"], -32602, "params: {params}");
        }
    }

    #[tokio::test]
    async fn unknown_method() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "foo.bar", "id": "q"}))
            .await
            .unwrap();
        assert_eq!(reply["jsonrpc"], "2.0");
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["message"], "Method not found");
        assert_eq!(reply["id"], "q");
        assert!(reply.get("result").is_none());
    }

    #[tokio::test]
    async fn application_error_passes_through_verbatim() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "fail", "id": 9}))
            .await
            .unwrap();
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32001, "message": "Denied", "data": {"why": "test"}},
                "id": 9
            })
        );
    }

    #[tokio::test]
    async fn fault_is_wrapped_as_internal_error() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "boom", "id": 2}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32603);
        assert_eq!(reply["error"]["message"], "Internal error");
        assert_eq!(reply["error"]["data"], "disk on fire");
    }

    #[tokio::test]
    async fn raw_signature_receives_params_unbound() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "echo", "params": {"k": [1]}, "id": 1}))
            .await
            .unwrap();
        assert_eq!(reply["result"], json!({"k": [1]}));
    }

    #[tokio::test]
    async fn service_methods_are_namespaced() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "math.divide", "params": [9, 3], "id": 1}))
            .await
            .unwrap();
        assert_eq!(reply["result"], 3.0);

        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "math.double", "params": {"x": 21}, "id": 2}))
            .await
            .unwrap();
        assert_eq!(reply["result"], 42);

        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "math.divide", "params": [1, 0], "id": 3}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32001);
        assert_eq!(reply["error"]["message"], "Division by zero");

        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "divide", "params": [1, 1], "id": 4}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32601);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

mod validation {
    use super::*;

    #[tokio::test]
    async fn unparseable_text_is_parse_error() {
        let d = dispatcher();
        let reply = d.handle_text(r#"{"jsonrpc":"2.0","method":"add",#"#).await.unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["error"]["code"], -32700);
        assert_eq!(reply["error"]["message"], "Parse error");
        assert_eq!(reply["id"], json!(null));
    }

    #[tokio::test]
    async fn invalid_request_echoes_recoverable_id() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": 1, "params": "bar", "id": 5}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["id"], 5);
    }

    #[tokio::test]
    async fn invalid_request_without_usable_id_gets_null() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!({"jsonrpc": "1.0", "method": "add", "id": {"x": 1}}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["id"], json!(null));
    }

    #[tokio::test]
    async fn top_level_scalar_is_invalid_request() {
        let d = dispatcher();
        for scalar in [json!(1), json!("text"), json!(null), json!(true)] {
            let reply = d.handle_value(scalar).await.unwrap();
            assert_eq!(reply["error"]["code"], -32600);
            assert_eq!(reply["id"], json!(null));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

mod notifications {
    use super::*;

    #[tokio::test]
    async fn notification_produces_no_output() {
        let d = dispatcher();
        let out = d
            .handle_text(r#"{"jsonrpc":"2.0","method":"add","params":[1,2]}"#)
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn failing_notification_produces_no_output() {
        let d = dispatcher();
        for method in ["boom", "fail", "no.such.method"] {
            assert!(d
                .handle_value(json!({"jsonrpc": "2.0", "method": method}))
                .await
                .is_none());
        }
        assert!(d
            .handle_value(json!({"jsonrpc": "2.0", "method": "add", "params": [1]}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn notification_handler_still_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut d = Dispatcher::new();
        let counter = hits.clone();
        d.register(
            "tick",
            HandlerDescriptor::sync_args(Signature::new(&[]), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
        )
        .unwrap();

        assert!(d.handle_value(json!({"jsonrpc": "2.0", "method": "tick"})).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batches
// ─────────────────────────────────────────────────────────────────────────────

mod batch {
    use super::*;

    #[tokio::test]
    async fn notification_dropped_and_order_preserved() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1},
                {"jsonrpc": "2.0", "method": "add", "params": [5, 5]},
                {"jsonrpc": "2.0", "method": "add", "params": [3, 4], "id": 2}
            ]))
            .await
            .unwrap();
        assert_eq!(
            reply,
            json!([
                {"jsonrpc": "2.0", "result": 3, "id": 1},
                {"jsonrpc": "2.0", "result": 7, "id": 2}
            ])
        );
    }

    #[tokio::test]
    async fn empty_batch_is_single_invalid_request() {
        let d = dispatcher();
        let reply = d.handle_text("[]").await.unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert!(reply.is_object());
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["id"], json!(null));
    }

    #[tokio::test]
    async fn all_notification_batch_produces_no_output() {
        let d = dispatcher();
        let out = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "method": "add", "params": [1, 2]},
                {"jsonrpc": "2.0", "method": "boom"}
            ]))
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn invalid_elements_answered_individually() {
        let d = dispatcher();
        let reply = d.handle_value(json!([1, 2, 3])).await.unwrap();
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 3);
        for item in items {
            assert_eq!(item["error"]["code"], -32600);
            assert_eq!(item["id"], json!(null));
        }
    }

    #[tokio::test]
    async fn mixed_batch() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": "1"},
                {"jsonrpc": "2.0", "method": "add", "params": [7]},
                {"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": "2"},
                {"foo": "boo"},
                {"jsonrpc": "2.0", "method": "foo.get", "params": {"name": "myself"}, "id": "5"},
                {"jsonrpc": "2.0", "method": "boom", "id": "9"}
            ]))
            .await
            .unwrap();
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0]["result"], 3);
        assert_eq!(items[1]["result"], 19);
        assert_eq!(items[2]["error"]["code"], -32600);
        assert_eq!(items[2]["id"], json!(null));
        assert_eq!(items[3]["error"]["code"], -32601);
        assert_eq!(items[3]["id"], "5");
        assert_eq!(items[4]["error"]["code"], -32603);
        assert_eq!(items[4]["id"], "9");
    }

    #[tokio::test]
    async fn nested_batch_is_invalid_element() {
        let d = dispatcher();
        let reply = d
            .handle_value(json!([[{"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1}]]))
            .await
            .unwrap();
        assert_eq!(reply[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn oversized_batch_rejected() {
        let d = calculator(DispatchConfig {
            max_batch_size: Some(2),
            ..DispatchConfig::default()
        });
        let call = json!({"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1});
        let reply = d.handle_value(json!([call, call, call])).await.unwrap();
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["id"], json!(null));

        let reply = d.handle_value(json!([call, call])).await.unwrap();
        assert_eq!(reply.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_batch_overlaps_slow_handlers() {
        let mut d = Dispatcher::new();
        d.register(
            "sleep",
            HandlerDescriptor::async_fn(&["ms"], |(ms,): (u64,)| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            }),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let reply = d
            .handle_value(json!([
                {"jsonrpc": "2.0", "method": "sleep", "params": [150], "id": 1},
                {"jsonrpc": "2.0", "method": "sleep", "params": [10], "id": 2},
                {"jsonrpc": "2.0", "method": "sleep", "params": [150], "id": 3}
            ]))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(290));
        let ids: Vec<_> = reply.as_array().unwrap().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn sequential_batch_runs_in_input_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut d = Dispatcher::with_config(DispatchConfig {
            batch_mode: BatchMode::Sequential,
            ..DispatchConfig::default()
        });
        let entries = log.clone();
        d.register(
            "record",
            HandlerDescriptor::async_fn(&["tag", "ms"], move |(tag, ms): (String, u64)| {
                let entries = entries.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    entries.lock().push(tag.clone());
                    Ok(tag)
                }
            }),
        )
        .unwrap();

        d.handle_value(json!([
            {"jsonrpc": "2.0", "method": "record", "params": ["first", 40], "id": 1},
            {"jsonrpc": "2.0", "method": "record", "params": ["second", 0], "id": 2}
        ]))
        .await
        .unwrap();

        assert_eq!(*log.lock(), vec!["first".to_string(), "second".to_string()]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry surface
// ─────────────────────────────────────────────────────────────────────────────

mod registry {
    use super::*;

    #[tokio::test]
    async fn unregister_makes_method_unknown() {
        let mut d = dispatcher();
        assert!(d.unregister("add"));
        assert!(!d.unregister("add"));
        let reply = d
            .handle_value(json!({"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn unregister_service_removes_namespace() {
        let mut d = dispatcher();
        assert!(d.unregister_service("math"));
        assert!(!d.unregister_service("math"));
        assert!(!d.registry().contains("math.divide"));
        assert!(d.registry().contains("add"));
    }

    #[test]
    fn list_methods_is_sorted_with_metadata() {
        let mut d = Dispatcher::new();
        d.register(
            "zeta",
            HandlerDescriptor::sync_fn(&["x"], |(x,): (i64,)| Ok(x)).describe("last"),
        )
        .unwrap();
        d.register(
            "alpha",
            HandlerDescriptor::async_fn(&["a", "b"], |(a, b): (i64, i64)| async move { Ok(a + b) }),
        )
        .unwrap();

        let methods = d.list_methods();
        let names: Vec<_> = methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(methods[0].is_async);
        assert_eq!(methods[0].params, vec!["a".to_string(), "b".to_string()]);
        assert!(!methods[1].is_async);
        assert_eq!(methods[1].description.as_deref(), Some("last"));
    }

    #[test]
    fn reserved_prefix_rejected() {
        let mut d = Dispatcher::new();
        let result = d.register(
            "rpc.ping",
            HandlerDescriptor::sync_args(Signature::new(&[]), |_| Ok(Value::Null)),
        );
        assert!(result.is_err());
    }
}
