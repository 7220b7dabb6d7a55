use std::{
    ffi::OsString,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    conversation::Conversation,
    error::Error,
    process::{spawn_app_server, ServerLaunchConfig, ServerProcess},
    protocol::{
        methods, notifications_methods, AccountUpdatedNotification,
        DeprecationNoticeNotification, ThreadStatusChangedNotification,
        ThreadTokenUsageUpdatedNotification,
    },
    rpc::{
        router::{
            ApprovalHandlers, HandlerErrorCallback, NotificationListener,
            NotificationSubscription, Router, RouterConfig,
        },
        transport::Transport,
    },
    services::{
        AccountService, AppsService, CommandService, ConfigService, ExperimentalService,
        ExternalAgentService, FeedbackService, McpService, ModelService, ReviewService,
        SkillsService, ThreadResumeParams, ThreadService, ThreadStartParams, ThreadStartResponse,
        TurnService, TurnStartParams,
    },
    stream::RunStream,
    turn::{RunParams, RunResult, TurnEngine},
};

/// Default per-request timeout. Override per client via
/// [`ClientOptions::request_timeout`]; `Duration::ZERO` disables the
/// deadline entirely.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client metadata sent with the `initialize` handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_info: ClientInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub user_agent: String,
}

/// Connection-level configuration shared by spawned and pre-wired clients.
#[derive(Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    /// Invoked when a notification listener or approval handler fails or
    /// panics. Failures are logged either way; the callback is for hosts
    /// that want to surface them in their own telemetry.
    pub handler_error_callback: Option<HandlerErrorCallback>,
    pub client_info: ClientInfo,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handler_error_callback: None,
            client_info: ClientInfo::default(),
        }
    }
}

/// Handle over one app-server connection.
///
/// Cheap to clone; all clones share the router, the transport, and the
/// child process (when the client spawned one).
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

struct ClientInner {
    router: Arc<Router>,
    process: AsyncMutex<Option<ServerProcess>>,
    client_info: ClientInfo,
    user_agent: Mutex<Option<String>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // The child (if any) is killed on drop; the reader task exits via
        // the cancellation below. Prefer an explicit `close()` for a
        // graceful shutdown.
        self.router.cancel();
    }
}

impl Client {
    /// Builder that spawns `codex app-server` and performs the handshake.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Wires a client over an existing transport without any handshake.
    /// Call [`Client::initialize`] before issuing other requests.
    pub fn connect(transport: Transport, options: ClientOptions) -> Client {
        let router = Router::start(
            transport,
            RouterConfig {
                request_timeout: options.request_timeout,
                handler_error_callback: options.handler_error_callback.clone(),
            },
        );
        Client {
            inner: Arc::new(ClientInner {
                router,
                process: AsyncMutex::new(None),
                client_info: options.client_info,
                user_agent: Mutex::new(None),
            }),
        }
    }

    /// Issues the `initialize` handshake and records the server user agent.
    pub async fn initialize(&self) -> Result<InitializeResponse, Error> {
        let params = InitializeParams {
            client_info: self.inner.client_info.clone(),
        };
        let response: InitializeResponse = self
            .inner
            .router
            .request_typed(methods::INITIALIZE, &params, &CancellationToken::new(), None)
            .await
            .map_err(|err| Error::Handshake {
                message: err.to_string(),
            })?;
        *self
            .inner
            .user_agent
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(response.user_agent.clone());
        Ok(response)
    }

    /// Server user agent from the handshake, when one has completed.
    pub fn user_agent(&self) -> Option<String> {
        self.inner
            .user_agent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn threads(&self) -> ThreadService {
        ThreadService::new(self.router())
    }

    pub fn turns(&self) -> TurnService {
        TurnService::new(self.router())
    }

    pub fn accounts(&self) -> AccountService {
        AccountService::new(self.router())
    }

    pub fn config(&self) -> ConfigService {
        ConfigService::new(self.router())
    }

    pub fn models(&self) -> ModelService {
        ModelService::new(self.router())
    }

    pub fn skills(&self) -> SkillsService {
        SkillsService::new(self.router())
    }

    pub fn apps(&self) -> AppsService {
        AppsService::new(self.router())
    }

    pub fn mcp(&self) -> McpService {
        McpService::new(self.router())
    }

    pub fn commands(&self) -> CommandService {
        CommandService::new(self.router())
    }

    pub fn reviews(&self) -> ReviewService {
        ReviewService::new(self.router())
    }

    pub fn feedback(&self) -> FeedbackService {
        FeedbackService::new(self.router())
    }

    pub fn external_agents(&self) -> ExternalAgentService {
        ExternalAgentService::new(self.router())
    }

    pub fn experimental(&self) -> ExperimentalService {
        ExperimentalService::new(self.router())
    }

    /// Atomically replaces the approval handler table. Server requests with
    /// no registered handler are answered with `-32601`.
    pub fn set_approval_handlers(&self, handlers: ApprovalHandlers) {
        self.inner.router.set_approval_handlers(handlers);
    }

    /// Registers a raw notification listener for `method`. Dropping the
    /// returned subscription deregisters it.
    pub fn on_notification(
        &self,
        method: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        let listener: NotificationListener = Arc::new(listener);
        self.router().subscribe(vec![(method.to_string(), listener)])
    }

    /// Typed listener for `thread/statusChanged`.
    pub fn on_thread_status_changed(
        &self,
        listener: impl Fn(ThreadStatusChangedNotification) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        self.on_decoded(notifications_methods::THREAD_STATUS_CHANGED, listener)
    }

    /// Typed listener for `thread/tokenUsageUpdated`.
    pub fn on_token_usage_updated(
        &self,
        listener: impl Fn(ThreadTokenUsageUpdatedNotification) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        self.on_decoded(notifications_methods::THREAD_TOKEN_USAGE_UPDATED, listener)
    }

    /// Typed listener for `account/updated`.
    pub fn on_account_updated(
        &self,
        listener: impl Fn(AccountUpdatedNotification) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        self.on_decoded(notifications_methods::ACCOUNT_UPDATED, listener)
    }

    /// Typed listener for `deprecationNotice`.
    pub fn on_deprecation_notice(
        &self,
        listener: impl Fn(DeprecationNoticeNotification) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        self.on_decoded(notifications_methods::DEPRECATION_NOTICE, listener)
    }

    /// Payloads that fail to decode are dropped; the protocol evolves and a
    /// newer field shape must not break older listeners.
    fn on_decoded<T: DeserializeOwned>(
        &self,
        method: &'static str,
        listener: impl Fn(T) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        self.on_notification(method, move |params: &Value| {
            match serde_json::from_value::<T>(params.clone()) {
                Ok(note) => listener(note),
                Err(err) => warn!(method, %err, "dropping notification that failed to decode"),
            }
        })
    }

    /// Starts a fresh thread and runs one blocking turn on it.
    pub async fn run(&self, params: RunParams) -> Result<RunResult, Error> {
        self.run_with(params, &CancellationToken::new()).await
    }

    /// [`Client::run`] with caller-controlled cancellation.
    pub async fn run_with(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, Error> {
        let (thread, turn_params) = self.start_thread_for_run(params, cancel).await?;
        TurnEngine::new(self.router(), thread)
            .run_blocking(turn_params, cancel)
            .await
    }

    /// Starts a fresh thread and runs one streamed turn on it.
    pub async fn run_streamed(&self, params: RunParams) -> Result<RunStream, Error> {
        self.run_streamed_with(params, CancellationToken::new())
            .await
    }

    /// [`Client::run_streamed`] with caller-controlled cancellation.
    pub async fn run_streamed_with(
        &self,
        params: RunParams,
        cancel: CancellationToken,
    ) -> Result<RunStream, Error> {
        let (thread, turn_params) = self.start_thread_for_run(params, &cancel).await?;
        TurnEngine::new(self.router(), thread)
            .start_streamed(turn_params, cancel, None)
            .await
    }

    /// Starts a fresh thread and wraps it in a [`Conversation`].
    pub async fn start_conversation(
        &self,
        params: ThreadStartParams,
    ) -> Result<Conversation, Error> {
        let response = self.threads().start(params).await?;
        Ok(Conversation::new(self.clone(), response.thread))
    }

    /// Resumes a server-side thread into a [`Conversation`].
    pub async fn resume_thread(&self, thread_id: impl Into<String>) -> Result<Conversation, Error> {
        let response = self
            .threads()
            .resume(ThreadResumeParams {
                thread_id: thread_id.into(),
            })
            .await?;
        Ok(Conversation::new(self.clone(), response.thread))
    }

    /// Tears the connection down: stops the reader, closes the transport
    /// (resolving every pending request with a transport error), and shuts
    /// down the child process when this client spawned one. Idempotent.
    pub async fn close(&self) {
        self.inner.router.close().await;
        let process = self.inner.process.lock().await.take();
        if let Some(process) = process {
            process.shutdown().await;
        }
    }

    pub(crate) fn router(&self) -> Arc<Router> {
        Arc::clone(&self.inner.router)
    }

    async fn start_thread_for_run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<(crate::protocol::Thread, TurnStartParams), Error> {
        let RunParams {
            input,
            model,
            cwd,
            sandbox_policy,
            approval_policy,
        } = params;
        let thread_params = ThreadStartParams {
            model,
            cwd,
            sandbox_policy,
            approval_policy,
        };
        let response: ThreadStartResponse = self
            .inner
            .router
            .request_typed(methods::THREAD_START, &thread_params, cancel, None)
            .await?;
        let thread = response.thread;
        let turn_params = TurnStartParams {
            thread_id: thread.id.clone(),
            input,
            model: None,
            sandbox_policy: None,
            approval_policy: None,
        };
        Ok((thread, turn_params))
    }
}

/// Builder for a client that owns its `codex app-server` child process.
#[derive(Default)]
pub struct ClientBuilder {
    launch: ServerLaunchConfig,
    options: ClientOptions,
}

impl ClientBuilder {
    /// Path to the app-server binary. Defaults to `$CODEX_BINARY`, falling
    /// back to `codex` on `PATH`.
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.launch.binary = binary.into();
        self
    }

    /// Isolated `CODEX_HOME` for the child (config, auth, history).
    pub fn codex_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.launch.codex_home = Some(home.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.launch.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.launch.env.push((key.into(), value.into()));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn handler_error_callback(
        mut self,
        callback: impl Fn(&str, &Error) + Send + Sync + 'static,
    ) -> Self {
        self.options.handler_error_callback = Some(Arc::new(callback));
        self
    }

    pub fn client_info(mut self, info: ClientInfo) -> Self {
        self.options.client_info = info;
        self
    }

    /// Spawns the child, wires the transport, and completes the handshake.
    pub async fn spawn(self) -> Result<Client, Error> {
        let (process, transport) = spawn_app_server(&self.launch).await?;
        let client = Client::connect(transport, self.options);
        *client.inner.process.lock().await = Some(process);
        client.initialize().await?;
        Ok(client)
    }
}
