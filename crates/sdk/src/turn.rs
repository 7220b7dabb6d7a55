//! Turn lifecycle engine.
//!
//! Both blocking and streaming execution share one lifecycle: register
//! turn-scoped listeners on the router, issue `turn/start`, translate and
//! accumulate the notifications that belong to this thread, and finish on
//! `turn/completed`. Listeners are deregistered on every exit path because
//! the registration handle is a drop guard.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{Error, TurnError},
    events::{CollabPhase, TurnEvent},
    protocol::{
        methods, notifications_methods as wire, raw_thread_id, AgentMessageDeltaNotification,
        AskForApproval, FileChangeOutputDeltaNotification, ItemCompletedNotification,
        ItemStartedNotification, PlanDeltaNotification, ReasoningSummaryDeltaNotification,
        ReasoningTextDeltaNotification, SandboxPolicy, Thread, ThreadItem, Turn,
        TurnCompletedNotification, TurnPlanUpdatedNotification, TurnStartedNotification,
        TurnStatus, UserInput,
    },
    rpc::router::{NotificationListener, Router},
    services::{TurnStartParams, TurnStartResponse},
    stream::{RunStream, EVENT_BUFFER_CAPACITY},
};

/// Parameters for a one-shot [`crate::Client::run`]: thread options plus the
/// first turn's input.
#[derive(Clone, Debug, Default)]
pub struct RunParams {
    pub input: Vec<UserInput>,
    pub model: Option<String>,
    pub cwd: Option<PathBuf>,
    pub sandbox_policy: Option<SandboxPolicy>,
    pub approval_policy: Option<AskForApproval>,
}

impl RunParams {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            input: vec![UserInput::text(prompt)],
            ..Default::default()
        }
    }
}

/// Outcome of a completed turn.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub thread: Thread,
    pub turn: Turn,
    /// Items in completion order, as accumulated from `item/completed`.
    pub items: Vec<ThreadItem>,
    /// Text of the last `agentMessage` item; empty when the turn produced
    /// no agent message.
    pub response: String,
}

pub(crate) type CompletionHook = Box<dyn FnOnce(Option<&RunResult>) + Send + 'static>;

/// Notification methods a turn subscribes to. Everything here carries a
/// `threadId`, which is the engine's filter key.
const TURN_METHODS: &[&str] = &[
    wire::TURN_STARTED,
    wire::TURN_COMPLETED,
    wire::TURN_PLAN_UPDATED,
    wire::ITEM_STARTED,
    wire::ITEM_COMPLETED,
    wire::ITEM_AGENT_MESSAGE_DELTA,
    wire::ITEM_REASONING_TEXT_DELTA,
    wire::ITEM_REASONING_SUMMARY_TEXT_DELTA,
    wire::ITEM_PLAN_DELTA,
    wire::ITEM_FILE_CHANGE_OUTPUT_DELTA,
];

pub(crate) struct TurnEngine {
    router: Arc<Router>,
    thread: Thread,
}

impl TurnEngine {
    pub(crate) fn new(router: Arc<Router>, thread: Thread) -> Self {
        Self { router, thread }
    }

    /// Runs one turn to completion and returns the accumulated result.
    pub(crate) async fn run_blocking(
        self,
        params: TurnStartParams,
        cancel: &CancellationToken,
    ) -> Result<RunResult, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _subscription = self.subscribe(&tx);

        let started: TurnStartResponse = self
            .router
            .request_typed(methods::TURN_START, &params, cancel, None)
            .await?;
        debug!(thread_id = %self.thread.id, turn_id = %started.turn.id, "turn started");

        let mut driver = TurnDriver {
            router: Arc::clone(&self.router),
            items: Vec::new(),
            sink: None,
        };
        let turn = driver.drive(rx, cancel).await?;
        finish(self.thread, turn, driver.items)
    }

    /// Issues `turn/start` and hands back a [`RunStream`]; the rest of the
    /// lifecycle runs on a dedicated task.
    pub(crate) async fn start_streamed(
        self,
        params: TurnStartParams,
        cancel: CancellationToken,
        on_complete: Option<CompletionHook>,
    ) -> Result<RunStream, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(&tx);

        let started: TurnStartResponse = self
            .router
            .request_typed(methods::TURN_START, &params, &cancel, None)
            .await?;
        debug!(thread_id = %self.thread.id, turn_id = %started.turn.id, "streamed turn started");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);
        let result_slot = Arc::new(Mutex::new(None));
        let terminal_slot = Arc::new(Mutex::new(None));
        let stream = RunStream::new(
            events_rx,
            done_rx,
            Arc::clone(&result_slot),
            Arc::clone(&terminal_slot),
        );

        let router = Arc::clone(&self.router);
        let thread = self.thread;
        tokio::spawn(async move {
            let _subscription = subscription;
            let mut driver = TurnDriver {
                router,
                items: Vec::new(),
                sink: Some(EventSink::new(events_tx)),
            };
            let outcome = driver.drive(rx, &cancel).await;
            let TurnDriver { items, .. } = driver;
            let result = outcome.and_then(|turn| finish(thread, turn, items));
            match result {
                Ok(run_result) => {
                    *result_slot.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(run_result.clone());
                    if let Some(hook) = on_complete {
                        hook(Some(&run_result));
                    }
                }
                Err(error) => {
                    // The error rides outside the bounded channel so a full
                    // buffer at cancel time cannot block the engine; the
                    // consumer sees it after draining the buffered events.
                    *terminal_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
                    if let Some(hook) = on_complete {
                        hook(None);
                    }
                }
            }
            let _ = done_tx.send(true);
        });

        Ok(stream)
    }

    /// Registers one listener per turn-scoped method. Each listener drops
    /// notifications for other threads before they ever reach the engine, so
    /// concurrent turns on distinct threads cannot leak into each other.
    fn subscribe(
        &self,
        tx: &mpsc::UnboundedSender<(&'static str, Value)>,
    ) -> crate::rpc::router::NotificationSubscription {
        let entries = TURN_METHODS
            .iter()
            .copied()
            .map(|method| {
                let thread_id = self.thread.id.clone();
                let tx = tx.clone();
                let listener: NotificationListener = Arc::new(move |params: &Value| {
                    if raw_thread_id(params) == Some(thread_id.as_str()) {
                        let _ = tx.send((method, params.clone()));
                    }
                });
                (method.to_string(), listener)
            })
            .collect();
        self.router.subscribe(entries)
    }
}

struct TurnDriver {
    router: Arc<Router>,
    items: Vec<ThreadItem>,
    sink: Option<EventSink>,
}

impl TurnDriver {
    async fn drive(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<(&'static str, Value)>,
        cancel: &CancellationToken,
    ) -> Result<Turn, Error> {
        loop {
            let (method, params) = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Canceled),
                _ = self.router.wait_closed() => {
                    return Err(Error::transport("connection closed during turn"));
                }
                note = rx.recv() => match note {
                    Some(note) => note,
                    None => return Err(Error::transport("connection closed during turn")),
                },
            };
            if let Some(turn) = self.handle(method, params, cancel).await? {
                return Ok(turn);
            }
        }
    }

    async fn handle(
        &mut self,
        method: &'static str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Turn>, Error> {
        match method {
            wire::TURN_STARTED => {
                let Some(note) = decode::<TurnStartedNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(TurnEvent::TurnStarted { turn_id: note.turn.id }, cancel)
                    .await?;
            }
            wire::ITEM_STARTED => {
                let Some(note) = decode::<ItemStartedNotification>(method, params) else {
                    return Ok(None);
                };
                if let Some(call) = note.item.as_collab_tool_call() {
                    self.emit(
                        TurnEvent::CollabToolCall {
                            phase: CollabPhase::Started,
                            call: call.clone(),
                        },
                        cancel,
                    )
                    .await?;
                }
                self.emit(TurnEvent::ItemStarted { item: note.item }, cancel)
                    .await?;
            }
            wire::ITEM_COMPLETED => {
                let Some(note) = decode::<ItemCompletedNotification>(method, params) else {
                    return Ok(None);
                };
                if let Some(call) = note.item.as_collab_tool_call() {
                    self.emit(
                        TurnEvent::CollabToolCall {
                            phase: CollabPhase::Completed,
                            call: call.clone(),
                        },
                        cancel,
                    )
                    .await?;
                }
                self.items.push(note.item.clone());
                self.emit(TurnEvent::ItemCompleted { item: note.item }, cancel)
                    .await?;
            }
            wire::ITEM_AGENT_MESSAGE_DELTA => {
                let Some(note) = decode::<AgentMessageDeltaNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::TextDelta {
                        item_id: note.item_id,
                        delta: note.delta,
                    },
                    cancel,
                )
                .await?;
            }
            wire::ITEM_REASONING_TEXT_DELTA => {
                let Some(note) = decode::<ReasoningTextDeltaNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::ReasoningDelta {
                        item_id: note.item_id,
                        delta: note.delta,
                    },
                    cancel,
                )
                .await?;
            }
            wire::ITEM_REASONING_SUMMARY_TEXT_DELTA => {
                let Some(note) = decode::<ReasoningSummaryDeltaNotification>(method, params)
                else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::ReasoningSummaryDelta {
                        item_id: note.item_id,
                        delta: note.delta,
                    },
                    cancel,
                )
                .await?;
            }
            wire::ITEM_PLAN_DELTA => {
                let Some(note) = decode::<PlanDeltaNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::PlanDelta {
                        item_id: Some(note.item_id),
                        steps: note.steps,
                    },
                    cancel,
                )
                .await?;
            }
            wire::TURN_PLAN_UPDATED => {
                let Some(note) = decode::<TurnPlanUpdatedNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::PlanDelta {
                        item_id: None,
                        steps: note.steps,
                    },
                    cancel,
                )
                .await?;
            }
            wire::ITEM_FILE_CHANGE_OUTPUT_DELTA => {
                let Some(note) = decode::<FileChangeOutputDeltaNotification>(method, params)
                else {
                    return Ok(None);
                };
                self.emit(
                    TurnEvent::FileChangeDelta {
                        item_id: note.item_id,
                        delta: note.delta,
                    },
                    cancel,
                )
                .await?;
            }
            wire::TURN_COMPLETED => {
                let Some(note) = decode::<TurnCompletedNotification>(method, params) else {
                    return Ok(None);
                };
                self.emit(TurnEvent::TurnCompleted { turn: note.turn.clone() }, cancel)
                    .await?;
                return Ok(Some(note.turn));
            }
            _ => {}
        }
        Ok(None)
    }

    async fn emit(&mut self, event: TurnEvent, cancel: &CancellationToken) -> Result<(), Error> {
        match self.sink.as_mut() {
            Some(sink) => sink.emit(event, cancel).await,
            None => Ok(()),
        }
    }
}

/// Bounded producer side of a [`RunStream`].
struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
    consumer_gone: bool,
}

impl EventSink {
    fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self {
            tx,
            consumer_gone: false,
        }
    }

    /// Sends one event, blocking while the buffer is full. Cancellation
    /// unblocks the producer; an abandoned consumer just mutes the sink so
    /// the turn still runs to completion.
    async fn emit(&mut self, event: TurnEvent, cancel: &CancellationToken) -> Result<(), Error> {
        if self.consumer_gone {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    self.consumer_gone = true;
                }
                Ok(())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
    match serde_json::from_value(params) {
        Ok(note) => Some(note),
        Err(err) => {
            warn!(method, %err, "dropping notification that failed to decode");
            None
        }
    }
}

/// Builds the terminal outcome from the completed turn.
fn finish(thread: Thread, turn: Turn, items: Vec<ThreadItem>) -> Result<RunResult, Error> {
    if turn.status == TurnStatus::Failed {
        let error = turn.error.clone().unwrap_or_else(|| TurnError {
            message: "turn failed".to_string(),
            ..Default::default()
        });
        return Err(Error::Turn(error));
    }

    let response = items
        .iter()
        .rev()
        .find_map(|item| item.agent_message_text())
        .unwrap_or_default()
        .to_string();
    Ok(RunResult {
        thread,
        turn,
        items,
        response,
    })
}
