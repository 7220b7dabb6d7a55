use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::{
    client::Client,
    error::Error,
    protocol::{Thread, UserInput},
    services::TurnStartParams,
    stream::RunStream,
    turn::{CompletionHook, RunResult, TurnEngine},
};

/// A handle over a persistent thread that serializes turns and accumulates
/// thread state across them.
///
/// At most one turn (blocking or streamed) is active per conversation; a
/// second concurrent call fails immediately with [`Error::TurnInProgress`].
pub struct Conversation {
    client: Client,
    state: Arc<Mutex<Thread>>,
    gate: Arc<AsyncMutex<()>>,
}

impl Conversation {
    pub(crate) fn new(client: Client, thread: Thread) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(thread)),
            gate: Arc::new(AsyncMutex::new(())),
        }
    }

    /// The server-assigned thread id.
    pub fn id(&self) -> String {
        self.lock_state().id.clone()
    }

    /// Runs one blocking turn on this thread.
    pub async fn turn(&self, input: Vec<UserInput>) -> Result<RunResult, Error> {
        self.turn_with(input, &CancellationToken::new()).await
    }

    /// Runs one blocking turn with caller-controlled cancellation.
    pub async fn turn_with(
        &self,
        input: Vec<UserInput>,
        cancel: &CancellationToken,
    ) -> Result<RunResult, Error> {
        let _guard = self
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::TurnInProgress)?;

        let thread = self.lock_state().clone();
        let params = turn_params(&thread, input);
        let engine = TurnEngine::new(self.client.router(), thread);
        let result = engine.run_blocking(params, cancel).await?;
        apply_completed_turn(&self.state, &result);
        Ok(result)
    }

    /// Starts one streamed turn on this thread.
    pub async fn turn_streamed(&self, input: Vec<UserInput>) -> Result<RunStream, Error> {
        self.turn_streamed_with(input, CancellationToken::new())
            .await
    }

    /// Starts one streamed turn with caller-controlled cancellation. The
    /// turn lock is held until the stream finishes, successfully or not.
    pub async fn turn_streamed_with(
        &self,
        input: Vec<UserInput>,
        cancel: CancellationToken,
    ) -> Result<RunStream, Error> {
        let guard = self
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::TurnInProgress)?;

        let thread = self.lock_state().clone();
        let params = turn_params(&thread, input);
        let state = Arc::clone(&self.state);
        let hook: CompletionHook = Box::new(move |result| {
            if let Some(run_result) = result {
                apply_completed_turn(&state, run_result);
            }
            drop(guard);
        });

        TurnEngine::new(self.client.router(), thread)
            .start_streamed(params, cancel, Some(hook))
            .await
    }

    /// A deep copy of the accumulated thread state.
    ///
    /// The snapshot is produced by round-tripping the state through the
    /// codec, which is the one operation guaranteed to reach every value
    /// behind the polymorphic item types. A round-trip failure indicates a
    /// codec bug and panics rather than silently handing out shared state.
    pub fn thread(&self) -> Thread {
        let shallow = self.lock_state().clone();
        let value = serde_json::to_value(&shallow)
            .unwrap_or_else(|err| panic!("thread snapshot failed to serialize: {err}"));
        serde_json::from_value(value)
            .unwrap_or_else(|err| panic!("thread snapshot failed to deserialize: {err}"))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Thread> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn turn_params(thread: &Thread, input: Vec<UserInput>) -> TurnStartParams {
    TurnStartParams {
        thread_id: thread.id.clone(),
        input,
        model: None,
        sandbox_policy: None,
        approval_policy: None,
    }
}

fn apply_completed_turn(state: &Arc<Mutex<Thread>>, result: &RunResult) {
    let mut turn = result.turn.clone();
    if turn.items.is_empty() {
        turn.items = result.items.clone();
    }
    let mut thread = state.lock().unwrap_or_else(PoisonError::into_inner);
    thread.turns.push(turn);
}
