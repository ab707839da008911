//! End-to-end tests driving the session core the way a transport does:
//! raw JSON-RPC text in, serialized envelopes out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use conduit_mcp::{
    InMemoryResources, McpServer, ProgressUpdate, ResourceBuilder, Session, TestClient,
    ToolBuilder, ToolResponse,
};

/// Wire a session to a collecting sink for tests that need to interleave
/// traffic manually.
fn collecting_session(server: McpServer) -> (Session, Arc<Mutex<Vec<String>>>) {
    let session = server.session();
    let outbox: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_box = outbox.clone();
    session.connect(Arc::new(move |text: String| {
        sink_box.lock().unwrap().push(text);
    }));
    (session, outbox)
}

fn parsed(outbox: &Arc<Mutex<Vec<String>>>) -> Vec<Value> {
    outbox
        .lock()
        .unwrap()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect()
}

async fn initialize(session: &Session, capabilities: Value) {
    session
        .ingest(
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": capabilities,
                    "clientInfo": { "name": "c", "version": "1" },
                },
            })
            .to_string(),
        )
        .await;
    session
        .ingest(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
}

#[tokio::test]
async fn initialize_then_ping() {
    let (session, outbox) = collecting_session(McpServer::new().server_info("demo", "1.0.0"));

    session
        .ingest(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"c","version":"1"}}}"#,
        )
        .await;
    session
        .ingest(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    session
        .ingest(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#)
        .await;

    let messages = parsed(&outbox);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(messages[0]["result"]["serverInfo"]["name"], "demo");
    assert_eq!(
        messages[1],
        json!({"jsonrpc": "2.0", "id": 2, "result": {}})
    );
}

#[tokio::test]
async fn unsupported_protocol_version_reports_supported_set() {
    let mut client = TestClient::new(McpServer::new());
    let error = client
        .request_expect_error(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-06",
                "capabilities": {},
                "clientInfo": { "name": "c", "version": "1" },
            })),
        )
        .await;

    assert_eq!(error["code"], -32600);
    let data = error["data"].to_string();
    assert!(data.contains("protocol"));
    assert!(data.contains("2024-11-05"));
    assert!(data.contains("2025-06-18"));
}

#[tokio::test]
async fn tool_call_with_list_changed_after_initialize() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;

    // Registration after initialization announces the change
    client.session().add_tool(
        ToolBuilder::new("sum").raw_handler(|_ex, args: Value| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(ToolResponse::text(format!("{}", a + b)))
        }),
    );

    let result = client.call_tool("sum", json!({"a": 1, "b": 2})).await;
    assert_eq!(
        result["content"],
        json!([{ "type": "text", "text": "3" }])
    );
    assert_eq!(result["isError"], json!(false));

    let notif = client.expect_notification("notifications/tools/list_changed");
    assert_eq!(notif["method"], "notifications/tools/list_changed");
}

#[tokio::test]
async fn tool_registered_before_initialize_is_silent() {
    let server = McpServer::new().tool(
        ToolBuilder::new("sum").raw_handler(|_ex, args: Value| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(ToolResponse::text(format!("{}", a + b)))
        }),
    );
    let mut client = TestClient::new(server);
    let init = client.initialize().await;
    // Advertised through capabilities instead of a notification
    assert_eq!(init["capabilities"]["tools"]["listChanged"], json!(true));

    let result = client.call_tool("sum", json!({"a": 2, "b": 2})).await;
    assert_eq!(result["content"][0]["text"], "4");

    for message in client.take_outbound() {
        assert_ne!(
            message.get("method").and_then(Value::as_str),
            Some("notifications/tools/list_changed"),
            "no list_changed may be emitted for pre-initialize registration"
        );
    }
}

#[tokio::test]
async fn client_cancellation_suppresses_response() {
    let observed_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let started = Arc::new(AtomicBool::new(false));

    let reason_slot = observed_reason.clone();
    let started_flag = started.clone();
    let server = McpServer::new().tool(ToolBuilder::new("wait").raw_handler(
        move |ex, _args: Value| {
            let reason_slot = reason_slot.clone();
            let started_flag = started_flag.clone();
            async move {
                started_flag.store(true, Ordering::SeqCst);
                let reason = ex.cancellation().cancelled().await;
                *reason_slot.lock().unwrap() = Some(reason);
                Ok(ToolResponse::text("never delivered"))
            }
        },
    ));

    let (session, outbox) = collecting_session(server);
    initialize(&session, json!({})).await;

    let call_session = session.clone();
    let call = tokio::spawn(async move {
        call_session
            .ingest(
                r#"{"jsonrpc":"2.0","id":"X","method":"tools/call","params":{"name":"wait","arguments":{}}}"#,
            )
            .await;
    });

    // Wait for the handler to be in flight before cancelling
    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session
        .ingest(
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":"X","reason":"stop"}}"#,
        )
        .await;
    call.await.unwrap();

    assert_eq!(observed_reason.lock().unwrap().as_deref(), Some("stop"));
    for message in parsed(&outbox) {
        assert_ne!(
            message.get("id"),
            Some(&json!("X")),
            "no response may be emitted for a cancelled request"
        );
    }
}

#[tokio::test]
async fn roots_list_with_progress_frames() {
    let progress_log: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    let log = progress_log.clone();
    let server = McpServer::new().tool(ToolBuilder::new("count-roots").raw_handler(
        move |ex, _args: Value| {
            let log = log.clone();
            async move {
                let roots = ex
                    .list_roots_with_progress(Some(Arc::new(move |params| {
                        log.lock().unwrap().push(params.progress);
                    })))
                    .await?;
                Ok(ToolResponse::text(format!("{}", roots.len())))
            }
        },
    ));

    let (session, outbox) = collecting_session(server);
    initialize(&session, json!({"roots": {"listChanged": true}})).await;

    let call_session = session.clone();
    let call = tokio::spawn(async move {
        call_session
            .ingest(
                r#"{"jsonrpc":"2.0","id":10,"method":"tools/call","params":{"name":"count-roots","arguments":{}}}"#,
            )
            .await;
    });

    // Wait for the outbound roots/list request to appear
    let request = loop {
        let found = parsed(&outbox)
            .into_iter()
            .find(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"));
        if let Some(request) = found {
            break request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let request_id = request["id"].clone();
    let token = request["params"]["_meta"]["progressToken"]
        .as_str()
        .expect("progress token embedded in outbound request")
        .to_string();

    for step in [1.0, 2.0] {
        session
            .ingest(
                &json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": { "progressToken": token, "progress": step, "total": 2.0 },
                })
                .to_string(),
            )
            .await;
    }

    session
        .ingest(
            &json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "result": { "roots": [
                    { "uri": "file:///a" },
                    { "uri": "file:///b", "name": "B" },
                ]},
            })
            .to_string(),
        )
        .await;
    call.await.unwrap();

    assert_eq!(*progress_log.lock().unwrap(), vec![1.0, 2.0]);

    let response = parsed(&outbox)
        .into_iter()
        .find(|m| m.get("id") == Some(&json!(10)) && m.get("method").is_none())
        .expect("tool call response");
    assert_eq!(response["result"]["content"][0]["text"], "2");
}

#[tokio::test]
async fn roots_cache_invalidated_by_list_changed() {
    let server = McpServer::new().tool(ToolBuilder::new("roots").raw_handler(
        |ex, _args: Value| async move {
            let roots = ex.list_roots().await?;
            Ok(ToolResponse::text(format!("{}", roots.len())))
        },
    ));

    let (session, outbox) = collecting_session(server);
    initialize(&session, json!({"roots": {"listChanged": true}})).await;

    // First call populates the cache
    let call_session = session.clone();
    let call = tokio::spawn(async move {
        call_session
            .ingest(
                r#"{"jsonrpc":"2.0","id":20,"method":"tools/call","params":{"name":"roots","arguments":{}}}"#,
            )
            .await;
    });
    let request = loop {
        let found = parsed(&outbox)
            .into_iter()
            .find(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"));
        if let Some(request) = found {
            break request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    session
        .ingest(
            &json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": { "roots": [{ "uri": "file:///a" }] },
            })
            .to_string(),
        )
        .await;
    call.await.unwrap();

    // Second call is served from the cache: no new outbound request
    let outbound_before = parsed(&outbox)
        .iter()
        .filter(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"))
        .count();
    session
        .ingest(
            r#"{"jsonrpc":"2.0","id":21,"method":"tools/call","params":{"name":"roots","arguments":{}}}"#,
        )
        .await;
    let outbound_after = parsed(&outbox)
        .iter()
        .filter(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"))
        .count();
    assert_eq!(outbound_before, outbound_after);

    // Invalidation forces a refetch on the next call
    session
        .ingest(r#"{"jsonrpc":"2.0","method":"notifications/roots/list_changed"}"#)
        .await;
    let call_session = session.clone();
    let call = tokio::spawn(async move {
        call_session
            .ingest(
                r#"{"jsonrpc":"2.0","id":22,"method":"tools/call","params":{"name":"roots","arguments":{}}}"#,
            )
            .await;
    });
    let refetch = loop {
        let count = parsed(&outbox)
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"))
            .count();
        if count > outbound_after {
            break parsed(&outbox)
                .into_iter()
                .filter(|m| m.get("method").and_then(Value::as_str) == Some("roots/list"))
                .next_back()
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    session
        .ingest(
            &json!({
                "jsonrpc": "2.0",
                "id": refetch["id"],
                "result": { "roots": [] },
            })
            .to_string(),
        )
        .await;
    call.await.unwrap();
}

#[tokio::test]
async fn resource_subscribe_updated_unsubscribe() {
    let provider = InMemoryResources::new().with(
        ResourceBuilder::new("mem://doc")
            .name("Doc")
            .mime_type("text/plain")
            .text("content"),
    );
    let mut client = TestClient::new(McpServer::new().resources(provider));
    client.initialize().await;

    let result = client
        .request("resources/subscribe", Some(json!({"uri": "mem://doc"})))
        .await;
    assert_eq!(result["uri"], "mem://doc");

    assert!(client.session().notify_resource_changed("mem://doc"));
    let notif = client.expect_notification("notifications/resources/updated");
    assert_eq!(notif["params"]["uri"], "mem://doc");

    let result = client
        .request("resources/unsubscribe", Some(json!({"uri": "mem://doc"})))
        .await;
    assert_eq!(result["uri"], "mem://doc");

    assert!(!client.session().notify_resource_changed("mem://doc"));
}

#[tokio::test]
async fn resources_unsupported_without_provider() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;
    let error = client
        .request_expect_error("resources/list", Some(json!({})))
        .await;
    assert_eq!(error["code"], -32602);
    assert_eq!(error["message"], "Resources are not supported");
}

#[tokio::test]
async fn read_missing_resource_is_32002() {
    let mut client = TestClient::new(McpServer::new().resources(InMemoryResources::new()));
    client.initialize().await;
    let error = client
        .request_expect_error("resources/read", Some(json!({"uri": "mem://nope"})))
        .await;
    assert_eq!(error["code"], -32002);
    assert_eq!(error["data"], "mem://nope");
}

#[tokio::test]
async fn batch_produces_single_array_response() {
    let server = McpServer::new().tool(
        ToolBuilder::new("t").raw_handler(|_ex, _args| async { Ok(ToolResponse::text("x")) }),
    );
    let mut client = TestClient::new(server);
    client.initialize().await;

    client
        .ingest(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},
                {"jsonrpc":"2.0","id":2,"method":"tools/list"},
                {"jsonrpc":"2.0","id":3,"method":"prompts/list"}]"#,
        )
        .await;

    let mut messages = client.take_outbound();
    assert_eq!(messages.len(), 1, "batch input yields one batch response");
    let batch = messages.remove(0);
    let responses = batch.as_array().expect("array response");
    let mut ids: Vec<i64> = responses
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn batch_of_notifications_produces_no_response() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;
    client
        .ingest(
            r#"[{"jsonrpc":"2.0","method":"notifications/initialized"},
                {"jsonrpc":"2.0","method":"notifications/roots/list_changed"}]"#,
        )
        .await;
    assert!(client.take_outbound().is_empty());
}

#[tokio::test]
async fn prompts_roundtrip() {
    let server = McpServer::new().prompt(
        conduit_mcp::PromptBuilder::new("greet")
            .description("Greet someone")
            .required_arg("name", "Name to greet")
            .optional_arg("tone", "Tone of voice")
            .handler(|_ex, args| async move {
                let name = args.get("name").cloned().unwrap_or_default();
                Ok(conduit_mcp::PromptResponse::user_message(format!(
                    "Please greet {}.",
                    name
                )))
            }),
    );
    let mut client = TestClient::new(server);
    let init = client.initialize().await;
    assert_eq!(
        init["capabilities"]["prompts"],
        json!({"listChanged": false})
    );

    let prompts = client.list_prompts().await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0]["arguments"][0]["name"], "name");
    assert_eq!(prompts[0]["arguments"][0]["required"], true);
    assert_eq!(prompts[0]["arguments"][1]["required"], false);

    let result = client.get_prompt("greet", json!({"name": "Ada"})).await;
    assert_eq!(result["messages"][0]["role"], "user");
    assert!(
        result["messages"][0]["content"]["text"]
            .as_str()
            .unwrap()
            .contains("Ada")
    );

    let error = client
        .request_expect_error("prompts/get", Some(json!({"name": "missing"})))
        .await;
    assert_eq!(error["message"], "Prompt missing not found");
}

#[tokio::test]
async fn completion_dispatch_specific_then_default() {
    let server = McpServer::new()
        .completion(
            conduit_mcp::protocol::CompletionReference::prompt("greet"),
            |_ex, _arg, value| async move {
                Ok(conduit_mcp::CompleteResult::new(vec![format!(
                    "{}-specific",
                    value
                )]))
            },
        )
        .default_completion(|_ex, ref_type, _name, _arg, _value| async move {
            Ok(conduit_mcp::CompleteResult::new(vec![format!(
                "{}-default",
                ref_type
            )]))
        });
    let mut client = TestClient::new(server);
    client.initialize().await;

    let result = client
        .request(
            "completion/complete",
            Some(json!({
                "ref": {"type": "ref/prompt", "name": "greet"},
                "argument": {"name": "name", "value": "a"},
            })),
        )
        .await;
    assert_eq!(result["completion"]["values"][0], "a-specific");

    let result = client
        .request(
            "completion/complete",
            Some(json!({
                "ref": {"type": "ref/resource", "name": "other"},
                "argument": {"name": "uri", "value": "x"},
            })),
        )
        .await;
    assert_eq!(result["completion"]["values"][0], "ref/resource-default");
}

#[tokio::test]
async fn completion_not_found_without_handlers() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;
    let error = client
        .request_expect_error(
            "completion/complete",
            Some(json!({
                "ref": {"type": "ref/prompt", "name": "ghost"},
                "argument": {"name": "a", "value": "b"},
            })),
        )
        .await;
    assert_eq!(error["message"], "Completion ref/prompt/ghost not found");
}

#[tokio::test]
async fn logging_set_level_gates_message_notifications() {
    let mut client = TestClient::new(McpServer::new().with_logging().tool(
        ToolBuilder::new("log").raw_handler(|ex, _args| async move {
            ex.log_message(
                conduit_mcp::LogLevel::Warning,
                Some("worker"),
                "disk almost full",
                Some(json!({"free": 12})),
            );
            Ok(ToolResponse::text("done"))
        }),
    ));
    let init = client.initialize().await;
    assert!(init["capabilities"]["logging"].is_object());

    // Without a configured level, nothing is forwarded
    client.call_tool("log", json!({})).await;
    assert!(client.take_notification().is_none());

    client
        .request("logging/setLevel", Some(json!({"level": "warning"})))
        .await;
    client.call_tool("log", json!({})).await;

    let notif = client.expect_notification("notifications/message");
    assert_eq!(notif["params"]["level"], "warning");
    assert_eq!(notif["params"]["logger"], "worker");
    assert_eq!(notif["params"]["data"]["error"], "disk almost full");
    assert_eq!(notif["params"]["data"]["details"]["free"], 12);
}

#[tokio::test]
async fn invalid_log_level_rejected() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;
    let error = client
        .request_expect_error("logging/setLevel", Some(json!({"level": "chatty"})))
        .await;
    assert_eq!(error["code"], -32602);
}

#[tokio::test]
async fn progress_reported_for_tool_with_token() {
    let server = McpServer::new().tool(ToolBuilder::new("slow").raw_handler(
        |ex, _args| async move {
            let reported = ex.report_progress(ProgressUpdate::new(0.5).with_total(1.0));
            Ok(ToolResponse::text(format!("{}", reported)))
        },
    ));
    let mut client = TestClient::new(server);
    client.initialize().await;

    // With a token the update is routed
    let result = client
        .request(
            "tools/call",
            Some(json!({
                "name": "slow",
                "arguments": {},
                "_meta": {"progressToken": "tok-1"},
            })),
        )
        .await;
    assert_eq!(result["content"][0]["text"], "true");
    let notif = client.expect_notification("notifications/progress");
    assert_eq!(notif["params"]["progressToken"], "tok-1");
    assert_eq!(notif["params"]["progress"], 0.5);

    // Without a token, report_progress is a no-op returning false
    let result = client.call_tool("slow", json!({})).await;
    assert_eq!(result["content"][0]["text"], "false");
}

#[tokio::test(start_paused = true)]
async fn outbound_request_times_out() {
    let server = McpServer::new().request_timeout(Duration::from_millis(100));
    let (session, _outbox) = collecting_session(server);
    initialize(&session, json!({})).await;

    let pending = session
        .send_client_request("roots/list", json!({}), None)
        .unwrap();

    // Past the timeout and the sweep throttle; the next inbound message
    // runs the sweep.
    tokio::time::advance(Duration::from_millis(700)).await;
    session
        .ingest(r#"{"jsonrpc":"2.0","id":99,"method":"ping"}"#)
        .await;

    let err = pending.await_response().await.unwrap_err();
    assert!(matches!(err, conduit_mcp::Error::Timeout { .. }));
}

#[tokio::test]
async fn sampling_returns_none_without_capability() {
    let server = McpServer::new().tool(ToolBuilder::new("sample").raw_handler(
        |ex, _args| async move {
            let params = conduit_mcp::CreateMessageParams::new(
                vec![conduit_mcp::SamplingMessage::user("hi")],
                64,
            );
            let result = ex.create_message(params).await?;
            Ok(ToolResponse::text(format!("{}", result.is_some())))
        },
    ));
    let mut client = TestClient::new(server);
    client.initialize().await;
    let result = client.call_tool("sample", json!({})).await;
    assert_eq!(result["content"][0]["text"], "false");
}

#[tokio::test]
async fn list_roots_empty_without_capability() {
    let server = McpServer::new().tool(ToolBuilder::new("roots").raw_handler(
        |ex, _args| async move {
            let roots = ex.list_roots().await?;
            Ok(ToolResponse::text(format!("{}", roots.len())))
        },
    ));
    let mut client = TestClient::new(server);
    client.initialize().await;
    let result = client.call_tool("roots", json!({})).await;
    assert_eq!(result["content"][0]["text"], "0");
}

#[tokio::test]
async fn tool_error_response_is_not_jsonrpc_error() {
    let server = McpServer::new().tool(
        ToolBuilder::new("fail")
            .raw_handler(|_ex, _args| async { Ok(ToolResponse::error("backend unavailable")) }),
    );
    let mut client = TestClient::new(server);
    client.initialize().await;

    let result = client.call_tool("fail", json!({})).await;
    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["content"][0]["text"], "backend unavailable");
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let mut client = TestClient::new(McpServer::new());
    client.initialize().await;
    let error = client
        .request_expect_error("tools/call", Some(json!({"name": "ghost", "arguments": {}})))
        .await;
    assert_eq!(error["code"], -32602);
    assert_eq!(error["message"], "Tool ghost not found");
}

#[tokio::test]
async fn resource_templates_listed_and_readable() {
    let server = McpServer::new()
        .resources(InMemoryResources::new())
        .resource_template(
            conduit_mcp::ResourceTemplateBuilder::new("note://{slug}")
                .name("Notes")
                .mime_type("text/plain")
                .handler(|_ex, _uri, vars: std::collections::HashMap<String, String>| async move {
                    Ok(format!("note {}", vars.get("slug").cloned().unwrap_or_default()))
                }),
        );
    let mut client = TestClient::new(server);
    client.initialize().await;

    let result = client
        .request("resources/templates/list", Some(json!({})))
        .await;
    assert_eq!(
        result["resourceTemplates"][0]["uriTemplate"],
        "note://{slug}"
    );

    let read = client.read_resource("note://hello").await;
    assert_eq!(read["contents"][0]["text"], "note hello");
    assert_eq!(read["contents"][0]["uri"], "note://hello");
}

#[tokio::test]
async fn parse_error_has_null_id() {
    let mut client = TestClient::new(McpServer::new());
    client.ingest("{broken").await;
    let messages = client.take_outbound();
    assert_eq!(messages.len(), 1);
    assert!(messages[0]["id"].is_null());
    assert_eq!(messages[0]["error"]["code"], -32700);
}

#[tokio::test]
async fn cancelling_server_request_notifies_client() {
    let (session, outbox) = collecting_session(McpServer::new());
    initialize(&session, json!({})).await;

    let pending = session
        .send_client_request("roots/list", json!({}), None)
        .unwrap();
    let id = pending.id();

    assert!(session.cancel_server_request(id, true));

    let cancelled = parsed(&outbox)
        .into_iter()
        .find(|m| m.get("method").and_then(Value::as_str) == Some("notifications/cancelled"))
        .expect("cancellation notification");
    assert_eq!(cancelled["params"]["requestId"], json!(id));

    // A late response for the id is dropped silently
    session
        .ingest(&json!({"jsonrpc": "2.0", "id": id, "result": {"roots": []}}).to_string())
        .await;
    assert!(pending.await_response().await.is_err());
}
