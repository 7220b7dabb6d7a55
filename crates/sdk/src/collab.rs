use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    events::TurnEvent,
    protocol::{CollabAgentStatus, CollabAgentTool},
};

/// Known state of one sub-agent, keyed by its thread id.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentInfo {
    pub thread_id: String,
    pub status: CollabAgentStatus,
    pub message: Option<String>,
    /// Last collab tool observed touching this agent.
    pub tool: CollabAgentTool,
    /// Thread that spawned this agent, when the spawn was observed.
    pub spawned_by: Option<String>,
}

/// Passive observer of collab tool-call events.
///
/// The tracker holds no subscription of its own: the user feeds it from
/// their stream-consumer loop via [`AgentTracker::process_event`], which
/// keeps event ordering identical to what the consumer saw.
#[derive(Clone, Default)]
pub struct AgentTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    agents: Mutex<HashMap<String, AgentInfo>>,
    changed: Notify,
}

impl AgentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes one turn event. Non-collab events are ignored.
    pub fn process_event(&self, event: &TurnEvent) {
        let TurnEvent::CollabToolCall { call, .. } = event else {
            return;
        };
        let Some(receiver) = call.receiver_thread_id.clone() else {
            return;
        };

        {
            let mut agents = self.lock_agents();
            match agents.entry(receiver.clone()) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let info = entry.get_mut();
                    info.status = call.status.clone();
                    info.tool = call.tool.clone();
                    if call.message.is_some() {
                        info.message = call.message.clone();
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let spawned_by = matches!(call.tool, CollabAgentTool::SpawnAgent)
                        .then(|| call.sender_thread_id.clone());
                    slot.insert(AgentInfo {
                        thread_id: receiver,
                        status: call.status.clone(),
                        message: call.message.clone(),
                        tool: call.tool.clone(),
                        spawned_by,
                    });
                }
            }
        }
        self.inner.changed.notify_waiters();
    }

    /// Snapshot of every tracked agent.
    pub fn agents(&self) -> HashMap<String, AgentInfo> {
        self.lock_agents().clone()
    }

    /// One tracked agent, by thread id.
    pub fn agent(&self, thread_id: &str) -> Option<AgentInfo> {
        self.lock_agents().get(thread_id).cloned()
    }

    /// Number of tracked agents not yet in a terminal status.
    pub fn active_count(&self) -> usize {
        self.lock_agents()
            .values()
            .filter(|info| !info.status.is_terminal())
            .count()
    }

    /// Blocks until at least one agent is tracked and every tracked agent is
    /// terminal, or until `cancel` fires.
    pub async fn wait_all_done(&self, cancel: &CancellationToken) -> Result<(), Error> {
        loop {
            // Arm the wakeup before checking the predicate so an update
            // between the check and the await cannot be missed.
            let notified = self.inner.changed.notified();
            if self.all_done() {
                return Ok(());
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(Error::Canceled),
            }
        }
    }

    fn all_done(&self) -> bool {
        let agents = self.lock_agents();
        !agents.is_empty() && agents.values().all(|info| info.status.is_terminal())
    }

    fn lock_agents(&self) -> std::sync::MutexGuard<'_, HashMap<String, AgentInfo>> {
        self.inner
            .agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
