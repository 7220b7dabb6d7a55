use std::os::unix::fs::PermissionsExt;

use crate::Client;

fn write_fake_app_server() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-app-server");
    let script = r#"#!/bin/sh
# Answer the initialize handshake (the client's first request id is 1),
# then idle until killed.
read line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"userAgent":"fake-server/1.0"}}'
sleep 30
"#;
    std::fs::write(&script_path, script).expect("write script");
    let mut perms = std::fs::metadata(&script_path)
        .expect("metadata")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod");
    (dir, script_path)
}

#[tokio::test]
async fn spawns_a_child_process_and_handshakes() {
    let (_dir, script_path) = write_fake_app_server();

    let client = Client::builder()
        .binary(script_path.clone())
        .spawn()
        .await
        .expect("spawn fake app-server");
    assert_eq!(client.user_agent().as_deref(), Some("fake-server/1.0"));

    client.close().await;
}

#[tokio::test]
async fn spawn_failure_is_a_spawn_error() {
    let err = Client::builder()
        .binary("/nonexistent/codex-binary-for-tests")
        .spawn()
        .await
        .expect_err("binary does not exist");
    assert!(
        matches!(err, crate::Error::Spawn { .. }),
        "got: {err:?}"
    );
}
