use crate::protocol::{CollabAgentToolCallItem, PlanStep, ThreadItem, Turn};

/// One translated event on a streaming turn.
///
/// Events are delivered in the order the engine translated them from wire
/// notifications. A `collabAgentToolCall` item always produces its
/// [`TurnEvent::CollabToolCall`] event *before* the generic
/// `ItemStarted`/`ItemCompleted` event for the same item, so sub-agent
/// trackers observe state transitions in causal order.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    TurnStarted {
        turn_id: String,
    },
    /// Incremental agent message text.
    TextDelta {
        item_id: String,
        delta: String,
    },
    /// Incremental reasoning text.
    ReasoningDelta {
        item_id: String,
        delta: String,
    },
    /// Incremental reasoning summary text.
    ReasoningSummaryDelta {
        item_id: String,
        delta: String,
    },
    /// Plan update; `item_id` is absent for turn-level plan updates.
    PlanDelta {
        item_id: Option<String>,
        steps: Vec<PlanStep>,
    },
    /// Incremental output from an in-flight file change.
    FileChangeDelta {
        item_id: String,
        delta: String,
    },
    ItemStarted {
        item: ThreadItem,
    },
    ItemCompleted {
        item: ThreadItem,
    },
    /// A sub-agent operation changed state.
    CollabToolCall {
        phase: CollabPhase,
        call: CollabAgentToolCallItem,
    },
    TurnCompleted {
        turn: Turn,
    },
}

/// Whether a collab tool call was observed starting or completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollabPhase {
    Started,
    Completed,
}
