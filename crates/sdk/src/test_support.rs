use std::time::Duration;

use serde_json::{json, Value};
use tokio::{
    io::{duplex, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf},
    time,
};

use crate::{Client, ClientOptions, Transport};

/// In-memory stand-in for `codex app-server`, driven line by line from
/// tests. The client side is wired through the same [`Transport`] the
/// production stdio path uses; only the byte carrier differs.
pub(crate) struct FakeServer {
    reader: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

pub(crate) fn connect() -> (Client, FakeServer) {
    connect_with(ClientOptions::default())
}

pub(crate) fn connect_with(options: ClientOptions) -> (Client, FakeServer) {
    let (client_io, server_io) = duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let client = Client::connect(Transport::new(client_read, client_write), options);

    let (server_read, server_write) = tokio::io::split(server_io);
    let server = FakeServer {
        reader: tokio::io::AsyncBufReadExt::lines(BufReader::new(server_read)),
        writer: server_write,
    };
    (client, server)
}

impl FakeServer {
    /// Next message the client put on the wire.
    pub(crate) async fn recv(&mut self) -> Value {
        loop {
            let line = time::timeout(Duration::from_secs(2), self.reader.next_line())
                .await
                .expect("server read timeout")
                .expect("server read")
                .expect("client closed the stream");
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).expect("client sent invalid JSON");
        }
    }

    /// Next message, asserted to be a request for `method`.
    pub(crate) async fn recv_method(&mut self, method: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(
            message.get("method").and_then(Value::as_str),
            Some(method),
            "unexpected message: {message}"
        );
        message
    }

    pub(crate) async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("server write");
    }

    pub(crate) async fn reply_result(&mut self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub(crate) async fn reply_error(&mut self, id: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    pub(crate) async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    pub(crate) async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
    }

    /// Answers the client's `initialize` with the given user agent.
    pub(crate) async fn handle_initialize(&mut self, user_agent: &str) {
        let message = self.recv_method("initialize").await;
        let id = message["id"].clone();
        self.reply_result(&id, json!({ "userAgent": user_agent }))
            .await;
    }

    /// Answers the client's `thread/start` with a thread of the given id.
    pub(crate) async fn handle_thread_start(&mut self, thread_id: &str) {
        let message = self.recv_method("thread/start").await;
        let id = message["id"].clone();
        self.reply_result(&id, json!({ "thread": { "id": thread_id } }))
            .await;
    }

    /// Answers the client's `turn/start` and returns the request params.
    pub(crate) async fn handle_turn_start(&mut self, turn_id: &str) -> Value {
        let message = self.recv_method("turn/start").await;
        let id = message["id"].clone();
        self.reply_result(&id, json!({ "turn": { "id": turn_id, "status": "inProgress" } }))
            .await;
        message["params"].clone()
    }

    /// Emits a completed `agentMessage` item for the given thread/turn.
    pub(crate) async fn emit_agent_message(
        &mut self,
        thread_id: &str,
        turn_id: &str,
        item_id: &str,
        text: &str,
    ) {
        self.notify(
            "item/completed",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": { "type": "agentMessage", "id": item_id, "text": text }
            }),
        )
        .await;
    }

    /// Emits `turn/completed` with `status = "completed"` and the items.
    pub(crate) async fn complete_turn(&mut self, thread_id: &str, turn_id: &str, items: Value) {
        self.notify(
            "turn/completed",
            json!({
                "threadId": thread_id,
                "turn": { "id": turn_id, "status": "completed", "items": items }
            }),
        )
        .await;
    }
}
