//! Wire data model for the app-server protocol.
//!
//! Everything here is a direct projection of JSON payloads exchanged with
//! `codex app-server`. The sum types follow one codec convention throughout:
//! internally tagged serde enums (`#[serde(tag = "type")]`) whose
//! discriminator is injected on write, so constructing a variant by value
//! never requires setting the tag by hand, plus a trailing
//! `#[serde(untagged)] Unknown(serde_json::Value)` variant that captures
//! payloads with unrecognized tags verbatim. Unknown variants re-serialize to
//! the JSON they were decoded from, so the client survives protocol additions
//! it has never heard of.

mod accounts;
mod approvals;
mod inputs;
mod items;
mod notifications;
mod threads;

pub use accounts::{
    Account, LoginMethod, RateLimitWindow, RateLimits, REDACTED,
};
pub use approvals::{
    ApplyPatchApprovalParams, ApprovalDecision, ApprovalResponse, AuthTokensRefreshParams,
    AuthTokensRefreshResponse, CommandExecutionApprovalParams, DynamicToolCallParams,
    DynamicToolCallResponse, ExecCommandApprovalParams, FileChangeApprovalParams,
    FuzzyFileSearchParams, FuzzyFileSearchResponse, FuzzyFileSearchResult, SkillApprovalParams,
    ToolUserInputAnswers, ToolUserInputParams, ToolUserInputQuestion,
};
pub use inputs::{AskForApproval, ReviewTarget, SandboxPolicy, SessionSource, UserInput};
pub use items::{
    AgentMessageItem, CollabAgentStatus, CollabAgentTool, CollabAgentToolCallItem,
    CommandExecutionItem, CommandExecutionStatus, ErrorItem, FileChangeItem, FileChangeStatus,
    FileUpdateChange, McpToolCallItem, McpToolCallStatus, PatchChangeKind, PlanItem, PlanStep,
    PlanStepStatus, ReasoningItem, ThreadItem, WebSearchAction, WebSearchItem,
};
pub use notifications::{
    AccountRateLimitsUpdatedNotification, AccountUpdatedNotification, AgentMessageDeltaNotification,
    DeprecationNoticeNotification, ErrorNotification, FileChangeOutputDeltaNotification,
    FuzzyFileSearchSessionCompletedNotification, FuzzyFileSearchSessionUpdatedNotification,
    ItemCompletedNotification, ItemStartedNotification, McpOauthLoginCompletedNotification,
    McpToolCallProgressNotification, ModelReroutedNotification, PlanDeltaNotification,
    RealtimeAudioDeltaNotification, RealtimeTranscriptDeltaNotification,
    ReasoningSummaryDeltaNotification, ReasoningTextDeltaNotification,
    ThreadClosedNotification, ThreadStartedNotification, ThreadStatusChangedNotification,
    ThreadTokenUsageUpdatedNotification, TurnCompletedNotification, TurnDiffUpdatedNotification,
    TurnPlanUpdatedNotification, TurnStartedNotification,
};
pub use threads::{Thread, ThreadStatus, TokenUsage, Turn, TurnStatus};

pub(crate) use notifications::raw_thread_id;

/// Client-to-server request methods.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";

    pub const THREAD_START: &str = "thread/start";
    pub const THREAD_RESUME: &str = "thread/resume";
    pub const THREAD_GET: &str = "thread/get";
    pub const THREAD_LIST: &str = "thread/list";
    pub const THREAD_ARCHIVE: &str = "thread/archive";
    pub const THREAD_COMPACT_START: &str = "thread/compact/start";

    pub const TURN_START: &str = "turn/start";
    pub const TURN_INTERRUPT: &str = "turn/interrupt";
    pub const TURN_STEER: &str = "turn/steer";

    pub const ACCOUNT_LOGIN_START: &str = "account/login/start";
    pub const ACCOUNT_LOGIN_CANCEL: &str = "account/login/cancel";
    pub const ACCOUNT_LOGOUT: &str = "account/logout";
    pub const ACCOUNT_READ: &str = "account/read";
    pub const ACCOUNT_RATE_LIMITS_READ: &str = "account/rateLimits/read";

    pub const CONFIG_READ: &str = "config/read";
    pub const CONFIG_VALUE_WRITE: &str = "config/value/write";
    pub const CONFIG_BATCH_WRITE: &str = "config/batchWrite";

    pub const MODEL_LIST: &str = "model/list";
    pub const SKILLS_LIST: &str = "skills/list";
    pub const SKILLS_CONFIG_WRITE: &str = "skills/config/write";
    pub const APP_LIST: &str = "app/list";

    pub const MCP_SERVER_LIST: &str = "mcpServer/list";
    pub const MCP_SERVER_TOOLS_LIST: &str = "mcpServer/tools/list";
    pub const MCP_SERVER_OAUTH_LOGIN: &str = "mcpServer/oauth/login";

    pub const COMMAND_EXEC: &str = "command/exec";
    pub const REVIEW_START: &str = "review/start";
    pub const FEEDBACK_UPLOAD: &str = "feedback/upload";
    pub const EXTERNAL_AGENT_LIST: &str = "externalAgent/list";
    pub const EXPERIMENTAL_FEATURE_LIST: &str = "experimental/feature/list";
}

/// Server-to-client notification methods.
pub mod notifications_methods {
    pub const TURN_STARTED: &str = "turn/started";
    pub const TURN_COMPLETED: &str = "turn/completed";
    pub const TURN_PLAN_UPDATED: &str = "turn/plan/updated";
    pub const TURN_DIFF_UPDATED: &str = "turn/diff/updated";

    pub const ITEM_STARTED: &str = "item/started";
    pub const ITEM_COMPLETED: &str = "item/completed";
    pub const ITEM_AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    pub const ITEM_REASONING_TEXT_DELTA: &str = "item/reasoning/textDelta";
    pub const ITEM_REASONING_SUMMARY_TEXT_DELTA: &str = "item/reasoning/summaryTextDelta";
    pub const ITEM_PLAN_DELTA: &str = "item/plan/delta";
    pub const ITEM_FILE_CHANGE_OUTPUT_DELTA: &str = "item/fileChange/outputDelta";

    pub const THREAD_STARTED: &str = "thread/started";
    pub const THREAD_CLOSED: &str = "thread/closed";
    pub const THREAD_STATUS_CHANGED: &str = "thread/statusChanged";
    pub const THREAD_TOKEN_USAGE_UPDATED: &str = "thread/tokenUsageUpdated";

    pub const ACCOUNT_UPDATED: &str = "account/updated";
    pub const ACCOUNT_RATE_LIMITS_UPDATED: &str = "account/rateLimits/updated";
    pub const MODEL_REROUTED: &str = "model/rerouted";
    pub const MCP_OAUTH_LOGIN_COMPLETED: &str = "mcp/server/oauthLoginCompleted";
    pub const MCP_TOOL_CALL_PROGRESS: &str = "mcp/toolCallProgress";
    pub const FUZZY_FILE_SEARCH_SESSION_UPDATED: &str = "fuzzyFileSearch/sessionUpdated";
    pub const FUZZY_FILE_SEARCH_SESSION_COMPLETED: &str = "fuzzyFileSearch/sessionCompleted";
    pub const REALTIME_AUDIO_DELTA: &str = "realtime/audio/delta";
    pub const REALTIME_TRANSCRIPT_DELTA: &str = "realtime/transcript/delta";

    pub const ERROR: &str = "error";
    pub const DEPRECATION_NOTICE: &str = "deprecationNotice";
}

/// Server-to-client request methods serviced by approval handlers.
pub mod server_requests {
    pub const APPLY_PATCH_APPROVAL: &str = "applyPatchApproval";
    pub const COMMAND_EXECUTION_REQUEST_APPROVAL: &str = "item/commandExecution/requestApproval";
    /// Legacy spelling still emitted by older servers.
    pub const EXEC_COMMAND_APPROVAL: &str = "execCommandApproval";
    pub const FILE_CHANGE_REQUEST_APPROVAL: &str = "item/fileChange/requestApproval";
    pub const SKILL_REQUEST_APPROVAL: &str = "skill/requestApproval";
    pub const TOOL_CALL: &str = "item/tool/call";
    pub const TOOL_REQUEST_USER_INPUT: &str = "item/tool/requestUserInput";
    pub const FUZZY_FILE_SEARCH: &str = "fuzzyFileSearch";
    pub const ACCOUNT_AUTH_TOKENS_REFRESH: &str = "account/chatgptAuthTokens/refresh";
}
