use serde_json::{json, Value};

use crate::{
    protocol::{ApprovalResponse, TurnStatus},
    test_support, ApprovalHandlers, Error, RunParams,
};

#[tokio::test]
async fn happy_blocking_turn() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_initialize("codex-test/1.0").await;
        server.handle_thread_start("thread-1").await;

        let params = server.handle_turn_start("turn-1").await;
        assert_eq!(params["threadId"], json!("thread-1"));
        assert_eq!(params["input"][0]["type"], json!("text"));
        assert_eq!(params["input"][0]["text"], json!("Say hello"));

        server
            .emit_agent_message("thread-1", "turn-1", "item-1", "Hello there!")
            .await;
        server
            .complete_turn(
                "thread-1",
                "turn-1",
                json!([{ "type": "agentMessage", "id": "item-1", "text": "Hello there!" }]),
            )
            .await;
        server
    });

    let init = client.initialize().await.expect("initialize");
    assert_eq!(init.user_agent, "codex-test/1.0");
    assert_eq!(client.user_agent().as_deref(), Some("codex-test/1.0"));

    let result = client
        .run(RunParams::from_prompt("Say hello"))
        .await
        .expect("run");
    assert_eq!(result.response, "Hello there!");
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.turn.id, "turn-1");
    assert_eq!(result.turn.status, TurnStatus::Completed);
    assert_eq!(result.thread.id, "thread-1");

    server_task.await.expect("server task");
    assert_eq!(client.router().pending_len(), 0);
}

#[tokio::test]
async fn failed_turn_surfaces_turn_error() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;
        server
            .notify(
                "turn/completed",
                json!({
                    "threadId": "thread-1",
                    "turn": {
                        "id": "turn-1",
                        "status": "failed",
                        "error": {
                            "message": "model rate limited",
                            "codexErrorInfo": { "code": "rate_limit" },
                            "additionalDetails": "retry after 30s"
                        }
                    }
                }),
            )
            .await;
        server
    });

    let err = client
        .run(RunParams::from_prompt("Say hello"))
        .await
        .expect_err("run should fail");
    let turn_error = err.as_turn_error().expect("turn error kind");
    assert_eq!(turn_error.message, "model rate limited");
    assert_eq!(turn_error.additional_details.as_deref(), Some("retry after 30s"));
    assert_eq!(
        turn_error.codex_error_info,
        Some(json!({ "code": "rate_limit" }))
    );

    server_task.await.expect("server task");
    assert_eq!(client.router().pending_len(), 0);
}

#[tokio::test]
async fn interrupted_turn_is_success() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;
        server
            .emit_agent_message("thread-1", "turn-1", "item-1", "partial answer")
            .await;
        server
            .notify(
                "turn/completed",
                json!({
                    "threadId": "thread-1",
                    "turn": { "id": "turn-1", "status": "interrupted" }
                }),
            )
            .await;
    });

    let result = client
        .run(RunParams::from_prompt("Say hello"))
        .await
        .expect("interrupted turns return the partial result");
    assert_eq!(result.turn.status, TurnStatus::Interrupted);
    assert_eq!(result.response, "partial answer");
    assert_eq!(result.items.len(), 1);

    server_task.await.expect("server task");
}

#[tokio::test]
async fn approval_dispatched_mid_turn() {
    let (client, mut server) = test_support::connect();

    client.set_approval_handlers(ApprovalHandlers::new().on_command_execution(
        |params| async move {
            assert_eq!(params.command, "ls -la");
            assert_eq!(params.thread_id, "thread-1");
            Ok(ApprovalResponse::accept())
        },
    ));

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;

        server
            .request(
                json!("approval-1"),
                "item/commandExecution/requestApproval",
                json!({ "threadId": "thread-1", "turnId": "turn-1", "command": "ls -la" }),
            )
            .await;

        // Exactly one reply, with the request's id and the handler decision.
        let reply = server.recv().await;
        assert_eq!(reply["id"], json!("approval-1"));
        assert_eq!(reply["result"]["decision"], json!("accept"));
        assert!(reply.get("method").is_none());

        server
            .emit_agent_message("thread-1", "turn-1", "item-1", "done")
            .await;
        server
            .complete_turn(
                "thread-1",
                "turn-1",
                json!([{ "type": "agentMessage", "id": "item-1", "text": "done" }]),
            )
            .await;
    });

    let result = client
        .run(RunParams::from_prompt("list the files"))
        .await
        .expect("run");
    assert_eq!(result.response, "done");

    server_task.await.expect("server task");
}

#[tokio::test]
async fn run_propagates_rpc_error_from_thread_start() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        let message = server.recv_method("thread/start").await;
        let id = message["id"].clone();
        server.reply_error(&id, -32000, "no workspace").await;
    });

    let err = client
        .run(RunParams::from_prompt("hi"))
        .await
        .expect_err("thread/start error propagates");
    assert_eq!(err.rpc_code(), Some(-32000));

    server_task.await.expect("server task");
    assert_eq!(client.router().pending_len(), 0);
}

#[tokio::test]
async fn notifications_with_unknown_payloads_do_not_break_the_turn() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;

        // An item type this build has never heard of.
        server
            .notify(
                "item/completed",
                json!({
                    "threadId": "thread-1",
                    "turnId": "turn-1",
                    "item": { "type": "holographicRender", "id": "item-0", "frames": [1, 2] }
                }),
            )
            .await;
        // A malformed payload for a known method (no item at all).
        server
            .notify("item/completed", json!({ "threadId": "thread-1" }))
            .await;
        server
            .emit_agent_message("thread-1", "turn-1", "item-1", "ok")
            .await;
        server
            .complete_turn(
                "thread-1",
                "turn-1",
                json!([{ "type": "agentMessage", "id": "item-1", "text": "ok" }]),
            )
            .await;
    });

    let result = client
        .run(RunParams::from_prompt("hi"))
        .await
        .expect("run survives unknown and malformed items");
    // The unknown item is preserved; the malformed one is dropped.
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.response, "ok");
    let unknown = &result.items[0];
    assert_eq!(unknown.id(), Some("item-0"));
    assert_eq!(
        serde_json::to_value(unknown).expect("encode"),
        json!({ "type": "holographicRender", "id": "item-0", "frames": [1, 2] })
    );

    server_task.await.expect("server task");
}

#[tokio::test]
async fn handshake_failure_is_a_handshake_error() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        let message = server.recv_method("initialize").await;
        let id = message["id"].clone();
        server.reply_error(&id, -32603, "boot failed").await;
    });

    let err = client.initialize().await.expect_err("initialize fails");
    assert!(matches!(err, Error::Handshake { .. }), "got: {err:?}");
    assert!(client.user_agent().is_none());

    server_task.await.expect("server task");
}

#[tokio::test]
async fn late_reply_after_turn_is_ignored() {
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;
        server
            .complete_turn("thread-1", "turn-1", json!([]))
            .await;
        // Duplicate reply for an id that is no longer pending.
        server
            .reply_result(&json!(2), json!({ "turn": { "id": "turn-stale" } }))
            .await;
        // The connection still works afterwards.
        server.handle_thread_start("thread-2").await;
        server.handle_turn_start("turn-2").await;
        server
            .complete_turn("thread-2", "turn-2", json!([]))
            .await;
    });

    let first = client.run(RunParams::from_prompt("one")).await.expect("first run");
    assert_eq!(first.turn.id, "turn-1");
    let second = client.run(RunParams::from_prompt("two")).await.expect("second run");
    assert_eq!(second.turn.id, "turn-2");

    server_task.await.expect("server task");
}

#[tokio::test]
async fn close_is_idempotent() {
    let (client, server) = test_support::connect();
    drop(server);
    client.close().await;
    client.close().await;

    let err = client
        .run(RunParams::from_prompt("hi"))
        .await
        .expect_err("closed client");
    assert!(err.is_transport(), "got: {err:?}");
}

#[tokio::test]
async fn cross_turn_listener_state_does_not_leak() {
    // Two sequential turns on one client: the second turn must not see
    // items from the first (listeners are deregistered on exit).
    let (client, mut server) = test_support::connect();

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-1").await;
        server
            .emit_agent_message("thread-1", "turn-1", "item-1", "first")
            .await;
        server
            .complete_turn(
                "thread-1",
                "turn-1",
                json!([{ "type": "agentMessage", "id": "item-1", "text": "first" }]),
            )
            .await;

        server.handle_thread_start("thread-1").await;
        server.handle_turn_start("turn-2").await;
        server
            .emit_agent_message("thread-1", "turn-2", "item-2", "second")
            .await;
        server
            .complete_turn(
                "thread-1",
                "turn-2",
                json!([{ "type": "agentMessage", "id": "item-2", "text": "second" }]),
            )
            .await;
    });

    let first = client.run(RunParams::from_prompt("one")).await.expect("first");
    assert_eq!(first.items.len(), 1);
    let second = client.run(RunParams::from_prompt("two")).await.expect("second");
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.response, "second");

    server_task.await.expect("server task");
}

#[tokio::test]
async fn typed_notification_helper_decodes_payloads() {
    use crate::protocol::ThreadStatus;

    let (client, mut server) = test_support::connect();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let _subscription = client.on_thread_status_changed(move |note| {
        sink.lock().expect("sink lock").push(note.status);
    });

    let server_task = tokio::spawn(async move {
        server
            .notify(
                "thread/statusChanged",
                json!({ "threadId": "thread-1", "status": { "type": "active", "activeTurnId": "turn-9" } }),
            )
            .await;
        // Undecodable payload is dropped without unwinding anything.
        server
            .notify("thread/statusChanged", json!({ "threadId": "thread-1" }))
            .await;
        server.handle_thread_start("thread-1").await;
    });

    client
        .threads()
        .start(crate::services::ThreadStartParams::default())
        .await
        .expect("thread start");

    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec![ThreadStatus::Active {
            active_turn_id: Some("turn-9".to_string())
        }]
    );

    server_task.await.expect("server task");
}

#[tokio::test]
async fn raw_notification_listeners_observe_wire_order() {
    let (client, mut server) = test_support::connect();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let _subscription = client.on_notification("item/agentMessage/delta", move |params: &Value| {
        let delta = params["delta"].as_str().unwrap_or_default().to_string();
        sink.lock().expect("sink lock").push(delta);
    });

    let server_task = tokio::spawn(async move {
        for i in 0..5 {
            server
                .notify(
                    "item/agentMessage/delta",
                    json!({ "threadId": "thread-1", "itemId": "item-1", "delta": format!("d{i}") }),
                )
                .await;
        }
        // A request/reply round trip after the notifications proves the
        // serial reader loop has already dispatched all of them.
        server.handle_thread_start("thread-1").await;
    });

    let response = client
        .threads()
        .start(crate::services::ThreadStartParams::default())
        .await
        .expect("thread start");
    assert_eq!(response.thread.id, "thread-1");
    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec!["d0", "d1", "d2", "d3", "d4"]
    );

    server_task.await.expect("server task");
}
