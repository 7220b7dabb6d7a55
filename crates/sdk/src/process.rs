use std::{ffi::OsString, path::PathBuf, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{error::Error, rpc::transport::Transport};

/// Environment variable naming the app-server binary to launch.
pub const CODEX_BINARY_ENV: &str = "CODEX_BINARY";
/// Environment variable pointing the child at an isolated state directory.
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";

const DEFAULT_BINARY: &str = "codex";

/// Launch configuration for the `codex app-server` child process.
#[derive(Clone, Debug)]
pub struct ServerLaunchConfig {
    pub binary: PathBuf,
    /// Injected as `CODEX_HOME` so config/auth/history stay app-scoped.
    pub codex_home: Option<PathBuf>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl Default for ServerLaunchConfig {
    fn default() -> Self {
        let binary = std::env::var_os(CODEX_BINARY_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
        Self {
            binary,
            codex_home: None,
            current_dir: None,
            env: Vec::new(),
        }
    }
}

/// Handle over the spawned child. Dropping it kills the process.
pub(crate) struct ServerProcess {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Waits briefly for a voluntary exit (the transport's write half is
    /// closed first, which the server treats as a shutdown signal), then
    /// kills the child.
    pub(crate) async fn shutdown(mut self) {
        match time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "app-server exited"),
            Ok(Err(err)) => warn!(%err, "failed to wait for app-server"),
            Err(_) => {
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Spawns `codex app-server` and wires its stdio into a [`Transport`].
pub(crate) async fn spawn_app_server(
    config: &ServerLaunchConfig,
) -> Result<(ServerProcess, Transport), Error> {
    let mut command = Command::new(&config.binary);
    command
        .arg("app-server")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &config.current_dir {
        command.current_dir(dir);
    }
    if let Some(home) = &config.codex_home {
        command.env(CODEX_HOME_ENV, home);
    }
    for (key, value) in &config.env {
        command.env(key, value);
    }

    let mut child = spawn_with_retry(&mut command, &config.binary).await?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::transport("child stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::transport("child stdout unavailable"))?;
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(forward_stderr(stderr)));

    let transport = Transport::new(stdout, stdin);
    Ok((ServerProcess { child, stderr_task }, transport))
}

/// Spawn with a short backoff loop: freshly downloaded binaries can report
/// `ExecutableFileBusy` while another process still holds them open.
async fn spawn_with_retry(command: &mut Command, binary: &std::path::Path) -> Result<Child, Error> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(Error::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }

    unreachable!("spawn loop returns before exhausting retries")
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("app-server stderr: {line}");
    }
}
