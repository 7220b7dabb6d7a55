use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Polymorphic record emitted during a turn.
///
/// The `type` discriminator is injected on serialization; payloads with a tag
/// this build does not know fall into [`ThreadItem::Unknown`] and re-serialize
/// verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ThreadItem {
    AgentMessage(AgentMessageItem),
    Reasoning(ReasoningItem),
    CommandExecution(CommandExecutionItem),
    FileChange(FileChangeItem),
    McpToolCall(McpToolCallItem),
    WebSearch(WebSearchItem),
    Plan(PlanItem),
    CollabAgentToolCall(CollabAgentToolCallItem),
    Error(ErrorItem),
    #[serde(untagged)]
    Unknown(Value),
}

impl ThreadItem {
    /// The item id, when the payload carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            ThreadItem::AgentMessage(item) => Some(&item.id),
            ThreadItem::Reasoning(item) => Some(&item.id),
            ThreadItem::CommandExecution(item) => Some(&item.id),
            ThreadItem::FileChange(item) => Some(&item.id),
            ThreadItem::McpToolCall(item) => Some(&item.id),
            ThreadItem::WebSearch(item) => Some(&item.id),
            ThreadItem::Plan(item) => Some(&item.id),
            ThreadItem::CollabAgentToolCall(item) => Some(&item.id),
            ThreadItem::Error(item) => Some(&item.id),
            ThreadItem::Unknown(raw) => raw.get("id").and_then(Value::as_str),
        }
    }

    /// The message text when this is an `agentMessage` item.
    pub fn agent_message_text(&self) -> Option<&str> {
        match self {
            ThreadItem::AgentMessage(item) => Some(&item.text),
            _ => None,
        }
    }

    /// The collab tool call payload, when this item is one.
    pub fn as_collab_tool_call(&self) -> Option<&CollabAgentToolCallItem> {
        match self {
            ThreadItem::CollabAgentToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Final assistant text for a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessageItem {
    pub id: String,
    pub text: String,
}

/// Model reasoning surfaced alongside the answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A shell command the agent ran (or is running).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecutionItem {
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub status: CommandExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_output: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandExecutionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Declined,
    #[serde(untagged)]
    Unknown(String),
}

/// A set of file edits proposed or applied by the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FileUpdateChange>,
    #[serde(default)]
    pub status: FileChangeStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdateChange {
    pub path: PathBuf,
    pub kind: PatchChangeKind,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileChangeStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Declined,
    #[serde(untagged)]
    Unknown(String),
}

/// One edit within a patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PatchChangeKind {
    Add {
        content: String,
    },
    Delete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        unified_diff: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        move_path: Option<PathBuf>,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// A tool call routed through a configured MCP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolCallItem {
    pub id: String,
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub status: McpToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum McpToolCallStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<WebSearchAction>,
}

/// The concrete operation behind a web search item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WebSearchAction {
    Search {
        query: String,
    },
    OpenPage {
        url: String,
    },
    FindInPage {
        url: String,
        pattern: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// The agent's running plan for the turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<PlanStep>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub step: String,
    #[serde(default)]
    pub status: PlanStepStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanStepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    #[serde(untagged)]
    Unknown(String),
}

/// The parent agent invoking a sub-agent operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabAgentToolCallItem {
    pub id: String,
    pub tool: CollabAgentTool,
    pub sender_thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_thread_id: Option<String>,
    #[serde(default)]
    pub status: CollabAgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollabAgentTool {
    SpawnAgent,
    SendMessage,
    Resume,
    Wait,
    Close,
    #[serde(untagged)]
    Unknown(String),
}

/// Lifecycle state of a sub-agent as reported by collab tool calls.
///
/// `Completed`, `Errored`, `Shutdown`, and `NotFound` are terminal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollabAgentStatus {
    Pending,
    #[default]
    Running,
    Completed,
    Errored,
    Shutdown,
    NotFound,
    #[serde(untagged)]
    Unknown(String),
}

impl CollabAgentStatus {
    /// Whether the status is one of the terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CollabAgentStatus::Completed
                | CollabAgentStatus::Errored
                | CollabAgentStatus::Shutdown
                | CollabAgentStatus::NotFound
        )
    }
}

/// Non-fatal error surfaced as an item within the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorItem {
    pub id: String,
    pub message: String,
}
