use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    protocol::ApprovalResponse, services::ThreadStartParams, test_support, ApprovalHandlers,
    ClientOptions, Error,
};

#[tokio::test]
async fn request_timeout_resolves_caller_and_clears_pending() {
    let options = ClientOptions {
        request_timeout: Duration::from_millis(50),
        ..ClientOptions::default()
    };
    let (client, mut server) = test_support::connect_with(options);

    let server_task = tokio::spawn(async move {
        // Read the request but never reply.
        let message = server.recv_method("thread/start").await;
        (server, message["id"].clone())
    });

    let err = client
        .threads()
        .start(ThreadStartParams::default())
        .await
        .expect_err("no reply in time");
    assert!(err.is_timeout(), "got: {err:?}");
    assert_eq!(client.router().pending_len(), 0);

    // A reply landing after the timeout is dropped; the connection still
    // serves later requests.
    let (mut server, stale_id) = server_task.await.expect("server task");
    server
        .reply_result(&stale_id, json!({ "thread": { "id": "thread-stale" } }))
        .await;

    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-2").await;
    });
    let response = client
        .threads()
        .start(ThreadStartParams::default())
        .await
        .expect("second request");
    assert_eq!(response.thread.id, "thread-2");
    server_task.await.expect("server task");
}

#[tokio::test]
async fn cancellation_is_distinct_from_timeout() {
    let (client, mut server) = test_support::connect();

    let token = CancellationToken::new();
    let router = client.router();
    let request_token = token.clone();
    let request = tokio::spawn(async move {
        router
            .request_with("thread/start", json!({}), &request_token, None)
            .await
    });

    let _ = server.recv_method("thread/start").await;
    token.cancel();

    let err = request
        .await
        .expect("join")
        .expect_err("canceled request errors");
    assert!(err.is_canceled(), "got: {err:?}");
    assert!(!err.is_timeout());
    assert_eq!(client.router().pending_len(), 0);
}

#[tokio::test]
async fn transport_close_resolves_every_pending_request() {
    let (client, mut server) = test_support::connect();

    let router_a = client.router();
    let first = tokio::spawn(async move {
        router_a
            .request_with("thread/start", json!({}), &CancellationToken::new(), None)
            .await
    });
    let router_b = client.router();
    let second = tokio::spawn(async move {
        router_b
            .request_with("model/list", json!({}), &CancellationToken::new(), None)
            .await
    });

    let _ = server.recv().await;
    let _ = server.recv().await;
    drop(server);

    for request in [first, second] {
        let err = request.await.expect("join").expect_err("pending fails");
        assert!(err.is_transport(), "got: {err:?}");
    }
    assert_eq!(client.router().pending_len(), 0);
}

#[tokio::test]
async fn missing_approval_handler_gets_method_not_found() {
    let (client, mut server) = test_support::connect();

    server
        .request(
            json!(9),
            "execCommandApproval",
            json!({ "callId": "call-1", "command": ["rm", "-rf", "/"] }),
        )
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], json!(9));
    assert_eq!(reply["error"]["code"], json!(-32601));
    assert_eq!(reply["error"]["message"], json!("Method not found"));
    drop(client);
}

#[tokio::test]
async fn unknown_server_request_method_gets_method_not_found() {
    let (client, mut server) = test_support::connect();

    server
        .request(json!("x-1"), "teleport/requestApproval", json!({}))
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], json!("x-1"));
    assert_eq!(reply["error"]["code"], json!(-32601));
    drop(client);
}

#[tokio::test]
async fn undecodable_params_get_invalid_params() {
    let (client, mut server) = test_support::connect();
    client.set_approval_handlers(
        ApprovalHandlers::new()
            .on_command_execution(|_| async move { Ok(ApprovalResponse::accept()) }),
    );

    server
        .request(
            json!(3),
            "item/commandExecution/requestApproval",
            json!({ "command": 42 }),
        )
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], json!(3));
    assert_eq!(reply["error"]["code"], json!(-32602));
    drop(client);
}

#[tokio::test]
async fn handler_error_becomes_wire_error() {
    let (client, mut server) = test_support::connect();
    client.set_approval_handlers(ApprovalHandlers::new().on_command_execution(
        |_| async move { Err(Error::transport("approvals backend offline")) },
    ));

    server
        .request(
            json!(4),
            "item/commandExecution/requestApproval",
            json!({ "threadId": "thread-1", "command": "ls" }),
        )
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], json!(4));
    assert_eq!(reply["error"]["code"], json!(-32000));
    let message = reply["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("approvals backend offline"), "got: {message}");
    drop(client);
}

#[tokio::test]
async fn handler_panic_is_recovered_and_reported() {
    let reports: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let options = ClientOptions {
        handler_error_callback: Some(Arc::new(move |method: &str, error: &Error| {
            sink.lock()
                .expect("report lock")
                .push((method.to_string(), error.to_string()));
        })),
        ..ClientOptions::default()
    };
    let (client, mut server) = test_support::connect_with(options);

    client.set_approval_handlers(ApprovalHandlers::new().on_command_execution(
        |_| async move { panic!("approval handler exploded") },
    ));

    server
        .request(
            json!(5),
            "item/commandExecution/requestApproval",
            json!({ "threadId": "thread-1", "command": "ls" }),
        )
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], json!(5));
    assert_eq!(reply["error"]["code"], json!(-32603));
    assert_eq!(reply["error"]["message"], json!("Internal error"));

    let reports = reports.lock().expect("report lock").clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "item/commandExecution/requestApproval");
    assert!(reports[0].1.contains("approval handler exploded"));
    drop(client);
}

#[tokio::test]
async fn panicking_listener_and_reporter_never_unwind_the_reader() {
    let options = ClientOptions {
        handler_error_callback: Some(Arc::new(|_: &str, _: &Error| {
            panic!("reporter also explodes")
        })),
        ..ClientOptions::default()
    };
    let (client, mut server) = test_support::connect_with(options);

    let _subscription = client.on_notification("thread/statusChanged", |_: &Value| {
        panic!("listener exploded")
    });

    server
        .notify(
            "thread/statusChanged",
            json!({ "threadId": "thread-1", "status": { "type": "idle" } }),
        )
        .await;

    // The reader loop survived both panics: a normal round trip still works.
    let server_task = tokio::spawn(async move {
        server.handle_thread_start("thread-1").await;
    });
    let response = client
        .threads()
        .start(ThreadStartParams::default())
        .await
        .expect("reader loop alive");
    assert_eq!(response.thread.id, "thread-1");
    server_task.await.expect("server task");
}

#[tokio::test]
async fn replacing_the_handler_table_is_atomic() {
    let (client, mut server) = test_support::connect();

    client.set_approval_handlers(
        ApprovalHandlers::new()
            .on_command_execution(|_| async move { Ok(ApprovalResponse::accept()) }),
    );
    // A replacement table without the command handler reverts to -32601.
    client.set_approval_handlers(ApprovalHandlers::new().on_skill(|_| async move {
        Ok(ApprovalResponse::reject())
    }));

    server
        .request(
            json!(6),
            "item/commandExecution/requestApproval",
            json!({ "threadId": "thread-1", "command": "ls" }),
        )
        .await;
    let reply = server.recv().await;
    assert_eq!(reply["error"]["code"], json!(-32601));

    server
        .request(
            json!(7),
            "skill/requestApproval",
            json!({ "threadId": "thread-1", "skillName": "deploy" }),
        )
        .await;
    let reply = server.recv().await;
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["result"]["decision"], json!("reject"));
    drop(client);
}

#[tokio::test]
async fn zero_timeout_disables_the_deadline() {
    let options = ClientOptions {
        request_timeout: Duration::ZERO,
        ..ClientOptions::default()
    };
    let (client, mut server) = test_support::connect_with(options);

    let server_task = tokio::spawn(async move {
        let message = server.recv_method("thread/start").await;
        let id = message["id"].clone();
        tokio::time::sleep(Duration::from_millis(100)).await;
        server
            .reply_result(&id, json!({ "thread": { "id": "thread-slow" } }))
            .await;
    });

    let response = client
        .threads()
        .start(ThreadStartParams::default())
        .await
        .expect("reply eventually arrives");
    assert_eq!(response.thread.id, "thread-slow");
    server_task.await.expect("server task");
}
