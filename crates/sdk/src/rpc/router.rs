use std::{
    collections::HashMap,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::Error,
    protocol::{
        server_requests, ApplyPatchApprovalParams, ApprovalResponse, AuthTokensRefreshParams,
        AuthTokensRefreshResponse, CommandExecutionApprovalParams, DynamicToolCallParams,
        DynamicToolCallResponse, ExecCommandApprovalParams, FileChangeApprovalParams,
        FuzzyFileSearchParams, FuzzyFileSearchResponse, SkillApprovalParams, ToolUserInputAnswers,
        ToolUserInputParams,
    },
};

use super::{
    envelope::{
        self, classify, Incoming, RequestId, CODE_HANDLER_ERROR, CODE_INTERNAL_ERROR,
        CODE_INVALID_PARAMS, CODE_METHOD_NOT_FOUND,
    },
    transport::{Transport, TransportReader, TransportWriter},
};

/// Boxed future returned by approval handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An async approval handler: typed params in, typed reply (or error) out.
pub type ApprovalFn<P, R> = Arc<dyn Fn(P) -> BoxFuture<Result<R, Error>> + Send + Sync>;

/// Opt-in callback invoked when a listener or approval handler fails.
pub type HandlerErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

pub(crate) type NotificationListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// One optional handler per server-to-client request method.
///
/// The table is replaced as a unit via `Client::set_approval_handlers`; an
/// inbound request whose slot is empty is answered with `-32601`.
#[derive(Clone, Default)]
pub struct ApprovalHandlers {
    pub apply_patch: Option<ApprovalFn<ApplyPatchApprovalParams, ApprovalResponse>>,
    pub command_execution: Option<ApprovalFn<CommandExecutionApprovalParams, ApprovalResponse>>,
    /// Legacy `execCommandApproval` spelling still used by older servers.
    pub exec_command: Option<ApprovalFn<ExecCommandApprovalParams, ApprovalResponse>>,
    pub file_change: Option<ApprovalFn<FileChangeApprovalParams, ApprovalResponse>>,
    pub skill: Option<ApprovalFn<SkillApprovalParams, ApprovalResponse>>,
    pub tool_call: Option<ApprovalFn<DynamicToolCallParams, DynamicToolCallResponse>>,
    pub tool_user_input: Option<ApprovalFn<ToolUserInputParams, ToolUserInputAnswers>>,
    pub fuzzy_file_search: Option<ApprovalFn<FuzzyFileSearchParams, FuzzyFileSearchResponse>>,
    pub auth_tokens_refresh: Option<ApprovalFn<AuthTokensRefreshParams, AuthTokensRefreshResponse>>,
}

fn wrap<P, R, F, Fut>(handler: F) -> ApprovalFn<P, R>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<Result<R, Error>> { Box::pin(handler(params)) })
}

impl ApprovalHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_apply_patch<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ApplyPatchApprovalParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResponse, Error>> + Send + 'static,
    {
        self.apply_patch = Some(wrap(handler));
        self
    }

    pub fn on_command_execution<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CommandExecutionApprovalParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResponse, Error>> + Send + 'static,
    {
        self.command_execution = Some(wrap(handler));
        self
    }

    pub fn on_exec_command<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ExecCommandApprovalParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResponse, Error>> + Send + 'static,
    {
        self.exec_command = Some(wrap(handler));
        self
    }

    pub fn on_file_change<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(FileChangeApprovalParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResponse, Error>> + Send + 'static,
    {
        self.file_change = Some(wrap(handler));
        self
    }

    pub fn on_skill<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(SkillApprovalParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResponse, Error>> + Send + 'static,
    {
        self.skill = Some(wrap(handler));
        self
    }

    pub fn on_tool_call<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(DynamicToolCallParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DynamicToolCallResponse, Error>> + Send + 'static,
    {
        self.tool_call = Some(wrap(handler));
        self
    }

    pub fn on_tool_user_input<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ToolUserInputParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolUserInputAnswers, Error>> + Send + 'static,
    {
        self.tool_user_input = Some(wrap(handler));
        self
    }

    pub fn on_fuzzy_file_search<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(FuzzyFileSearchParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FuzzyFileSearchResponse, Error>> + Send + 'static,
    {
        self.fuzzy_file_search = Some(wrap(handler));
        self
    }

    pub fn on_auth_tokens_refresh<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(AuthTokensRefreshParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AuthTokensRefreshResponse, Error>> + Send + 'static,
    {
        self.auth_tokens_refresh = Some(wrap(handler));
        self
    }
}

pub(crate) struct RouterConfig {
    pub request_timeout: Duration,
    pub handler_error_callback: Option<HandlerErrorCallback>,
}

/// Correlates responses, fans out notifications, and services inbound
/// server requests. One reader task per router owns the receive side.
pub(crate) struct Router {
    writer: TransportWriter,
    next_id: AtomicI64,
    next_listener_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>>,
    listeners: RwLock<HashMap<String, Vec<(u64, NotificationListener)>>>,
    approvals: RwLock<Arc<ApprovalHandlers>>,
    config: RouterConfig,
    shutdown: CancellationToken,
}

impl Router {
    /// Starts the reader task and returns the shared router handle.
    pub(crate) fn start(transport: Transport, config: RouterConfig) -> Arc<Router> {
        let (reader, writer) = transport.into_split();
        let router = Arc::new(Router {
            writer,
            next_id: AtomicI64::new(1),
            next_listener_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            approvals: RwLock::new(Arc::new(ApprovalHandlers::default())),
            config,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(reader_loop(Arc::clone(&router), reader));
        router
    }

    /// Sends a request and waits for its reply, deadline, or cancellation.
    ///
    /// The pending entry is removed on every exit path, so a reply arriving
    /// after a timeout or cancel is dropped cleanly by the reader loop.
    pub(crate) async fn request_with(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
        timeout_override: Option<Duration>,
    ) -> Result<Value, Error> {
        let id = RequestId::Int(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);

        let envelope = envelope::request_envelope(&id, method, &params);
        if let Err(err) = self.writer.send(&envelope).await {
            self.remove_pending(&id);
            return Err(err);
        }

        let timeout = timeout_override.unwrap_or(self.config.request_timeout);
        tokio::select! {
            outcome = &mut rx => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::transport("client closed")),
            },
            _ = tokio::time::sleep(timeout), if !timeout.is_zero() => {
                self.remove_pending(&id);
                Err(Error::Timeout { timeout })
            }
            _ = cancel.cancelled() => {
                self.remove_pending(&id);
                Err(Error::Canceled)
            }
        }
    }

    /// Typed wrapper over [`Router::request_with`]. A result payload that
    /// fails to decode is a codec failure and surfaces as a transport error.
    pub(crate) async fn request_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
        cancel: &CancellationToken,
        timeout_override: Option<Duration>,
    ) -> Result<R, Error> {
        let params = serde_json::to_value(params)?;
        let result = self
            .request_with(method, params, cancel, timeout_override)
            .await?;
        serde_json::from_value(result).map_err(|source| Error::Transport {
            message: format!("failed to decode `{method}` response"),
            source: Some(Box::new(source)),
        })
    }

    /// Registers listeners; the returned subscription deregisters all of
    /// them when dropped, on every exit path.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        entries: Vec<(String, NotificationListener)>,
    ) -> NotificationSubscription {
        let mut registered = Vec::with_capacity(entries.len());
        {
            let mut table = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (method, listener) in entries {
                let listener_id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
                table
                    .entry(method.clone())
                    .or_default()
                    .push((listener_id, listener));
                registered.push((method, listener_id));
            }
        }
        NotificationSubscription {
            router: Arc::clone(self),
            entries: registered,
        }
    }

    fn remove_listener(&self, method: &str, listener_id: u64) {
        let mut table = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = table.get_mut(method) {
            entries.retain(|(id, _)| *id != listener_id);
            if entries.is_empty() {
                table.remove(method);
            }
        }
    }

    /// Atomically replaces the whole approval handler table.
    pub(crate) fn set_approval_handlers(&self, handlers: ApprovalHandlers) {
        let mut slot = self
            .approvals
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(handlers);
    }

    fn approvals_snapshot(&self) -> Arc<ApprovalHandlers> {
        Arc::clone(&self.approvals.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Stops the reader task, closes the write half, and resolves every
    /// pending request with a transport error. Idempotent.
    pub(crate) async fn close(&self) {
        self.shutdown.cancel();
        self.writer.close().await;
        self.fail_pending(|| Error::transport("client closed"));
    }

    /// Synchronous teardown used when the last client handle drops: stops
    /// the reader task and resolves pending requests without awaiting the
    /// transport shutdown.
    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();
        self.fail_pending(|| Error::transport("client closed"));
    }

    /// Resolves when the connection is gone, whether by [`Router::close`] or
    /// by the reader task observing EOF or a read failure.
    pub(crate) async fn wait_closed(&self) {
        self.shutdown.cancelled().await;
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Result<Value, Error>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_pending(&self, id: &RequestId) -> Option<oneshot::Sender<Result<Value, Error>>> {
        self.lock_pending().remove(id)
    }

    fn fail_pending(&self, make_error: impl Fn() -> Error) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(make_error()));
        }
    }

    fn dispatch_notification(&self, method: &str, params: &Value) {
        let snapshot: Vec<NotificationListener> = {
            let table = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            match table.get(method) {
                Some(entries) => entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (*listener)(params))) {
                let error = Error::Handler {
                    method: method.to_string(),
                    message: panic_message(payload),
                };
                self.report_handler_error(method, &error);
            }
        }
    }

    fn report_handler_error(&self, method: &str, error: &Error) {
        warn!(method, %error, "handler failure");
        let Some(callback) = self.config.handler_error_callback.clone() else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| (*callback)(method, error))).is_err() {
            warn!(method, "handler-error callback panicked");
        }
    }
}

/// Handle for registered notification listeners; dropping it deregisters
/// every listener it covers.
pub struct NotificationSubscription {
    router: Arc<Router>,
    entries: Vec<(String, u64)>,
}

impl NotificationSubscription {
    /// Explicit deregistration; equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        for (method, listener_id) in &self.entries {
            self.router.remove_listener(method, *listener_id);
        }
    }
}

async fn reader_loop(router: Arc<Router>, mut reader: TransportReader) {
    loop {
        let next = tokio::select! {
            _ = router.shutdown.cancelled() => break,
            next = reader.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("server closed the stream");
                router.fail_pending(|| Error::transport("connection closed (eof)"));
                break;
            }
            Err(source) => {
                warn!(%source, "transport read failed");
                let message = source.to_string();
                router.fail_pending(move || {
                    Error::transport(format!("transport read failed: {message}"))
                });
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "dropping line that is not valid JSON");
                continue;
            }
        };

        match classify(value) {
            Some(Incoming::Response { id, result, error }) => {
                let Some(tx) = router.remove_pending(&id) else {
                    debug!(%id, "dropping reply with no pending request");
                    continue;
                };
                let outcome = if let Some(error) = error {
                    Err(Error::Rpc {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    })
                } else if let Some(result) = result {
                    Ok(result)
                } else {
                    Err(Error::transport("response missing result and error"))
                };
                let _ = tx.send(outcome);
            }
            Some(Incoming::Notification { method, params }) => {
                router.dispatch_notification(&method, &params);
            }
            Some(Incoming::Request { id, method, params }) => {
                dispatch_server_request(&router, id, method, params);
            }
            None => {
                warn!("dropping malformed envelope");
            }
        }
    }

    // Mark the connection gone so engines blocked on notifications wake up.
    router.shutdown.cancel();
    router.fail_pending(|| Error::transport("client closed"));
}

/// Services one inbound server request on its own task so a slow approval
/// handler never stalls the reader loop. Exactly one reply is written.
fn dispatch_server_request(router: &Arc<Router>, id: RequestId, method: String, params: Value) {
    let router = Arc::clone(router);
    tokio::spawn(async move {
        let handlers = router.approvals_snapshot();
        let reply = match method.as_str() {
            server_requests::APPLY_PATCH_APPROVAL => {
                run_handler(&router, handlers.apply_patch.clone(), &method, params).await
            }
            server_requests::COMMAND_EXECUTION_REQUEST_APPROVAL => {
                run_handler(&router, handlers.command_execution.clone(), &method, params).await
            }
            server_requests::EXEC_COMMAND_APPROVAL => {
                run_handler(&router, handlers.exec_command.clone(), &method, params).await
            }
            server_requests::FILE_CHANGE_REQUEST_APPROVAL => {
                run_handler(&router, handlers.file_change.clone(), &method, params).await
            }
            server_requests::SKILL_REQUEST_APPROVAL => {
                run_handler(&router, handlers.skill.clone(), &method, params).await
            }
            server_requests::TOOL_CALL => {
                run_handler(&router, handlers.tool_call.clone(), &method, params).await
            }
            server_requests::TOOL_REQUEST_USER_INPUT => {
                run_handler(&router, handlers.tool_user_input.clone(), &method, params).await
            }
            server_requests::FUZZY_FILE_SEARCH => {
                run_handler(&router, handlers.fuzzy_file_search.clone(), &method, params).await
            }
            server_requests::ACCOUNT_AUTH_TOKENS_REFRESH => {
                run_handler(&router, handlers.auth_tokens_refresh.clone(), &method, params).await
            }
            _ => Err((CODE_METHOD_NOT_FOUND, "Method not found".to_string())),
        };

        let envelope = match reply {
            Ok(result) => envelope::response_envelope(&id, result),
            Err((code, message)) => envelope::error_envelope(&id, code, &message),
        };
        if let Err(err) = router.writer.send(&envelope).await {
            warn!(%id, %err, "failed to write server-request reply");
        }
    });
}

async fn run_handler<P, R>(
    router: &Router,
    handler: Option<ApprovalFn<P, R>>,
    method: &str,
    params: Value,
) -> Result<Value, (i64, String)>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    let Some(handler) = handler else {
        return Err((CODE_METHOD_NOT_FOUND, "Method not found".to_string()));
    };

    let params: P = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return Err((CODE_INVALID_PARAMS, format!("Invalid params: {err}"))),
    };

    // The handler runs on its own task so a panic is contained as a join
    // error instead of unwinding this dispatch path.
    let future = (*handler)(params);
    match tokio::spawn(future).await {
        Ok(Ok(reply)) => match serde_json::to_value(reply) {
            Ok(value) => Ok(value),
            Err(err) => Err((
                CODE_INTERNAL_ERROR,
                format!("failed to encode handler reply: {err}"),
            )),
        },
        Ok(Err(err)) => {
            router.report_handler_error(method, &err);
            Err((CODE_HANDLER_ERROR, err.to_string()))
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler task canceled".to_string()
            };
            let error = Error::Handler {
                method: method.to_string(),
                message,
            };
            router.report_handler_error(method, &error);
            Err((CODE_INTERNAL_ERROR, "Internal error".to_string()))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
