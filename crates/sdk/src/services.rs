//! Typed service surface over the JSON-RPC router.
//!
//! Each service is a thin wrapper: construct method name and params, decode
//! the result, propagate the error. Grouping is purely organizational; no
//! service carries state beyond the shared router handle.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    protocol::{
        methods, Account, AskForApproval, LoginMethod, RateLimits, ReviewTarget, SandboxPolicy,
        Thread, Turn, UserInput,
    },
    rpc::router::Router,
};

/// Empty result payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

macro_rules! service {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            router: Arc<Router>,
        }

        impl $name {
            pub(crate) fn new(router: Arc<Router>) -> Self {
                Self { router }
            }

            async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, Error>
            where
                P: Serialize,
                R: serde::de::DeserializeOwned,
            {
                self.router
                    .request_typed(method, params, &CancellationToken::new(), None)
                    .await
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Thread

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<SandboxPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<AskForApproval>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartResponse {
    pub thread: Thread,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeParams {
    pub thread_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeResponse {
    pub thread: Thread,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadGetParams {
    pub thread_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadGetResponse {
    pub thread: Thread,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<Thread>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArchiveParams {
    pub thread_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCompactStartParams {
    pub thread_id: String,
}

service! {
    /// `thread/*` operations.
    ThreadService
}

impl ThreadService {
    pub async fn start(&self, params: ThreadStartParams) -> Result<ThreadStartResponse, Error> {
        self.call(methods::THREAD_START, &params).await
    }

    pub async fn resume(&self, params: ThreadResumeParams) -> Result<ThreadResumeResponse, Error> {
        self.call(methods::THREAD_RESUME, &params).await
    }

    pub async fn get(&self, params: ThreadGetParams) -> Result<ThreadGetResponse, Error> {
        self.call(methods::THREAD_GET, &params).await
    }

    pub async fn list(&self, params: ThreadListParams) -> Result<ThreadListResponse, Error> {
        self.call(methods::THREAD_LIST, &params).await
    }

    pub async fn archive(&self, params: ThreadArchiveParams) -> Result<Ack, Error> {
        self.call(methods::THREAD_ARCHIVE, &params).await
    }

    pub async fn compact(&self, params: ThreadCompactStartParams) -> Result<Ack, Error> {
        self.call(methods::THREAD_COMPACT_START, &params).await
    }
}

// ---------------------------------------------------------------------------
// Turn

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    pub thread_id: String,
    pub input: Vec<UserInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_policy: Option<SandboxPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_policy: Option<AskForApproval>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResponse {
    pub turn: Turn,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInterruptParams {
    pub thread_id: String,
    pub turn_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSteerParams {
    pub thread_id: String,
    pub turn_id: String,
    pub input: Vec<UserInput>,
}

service! {
    /// `turn/*` operations.
    TurnService
}

impl TurnService {
    pub async fn start(&self, params: TurnStartParams) -> Result<TurnStartResponse, Error> {
        self.call(methods::TURN_START, &params).await
    }

    pub async fn interrupt(&self, params: TurnInterruptParams) -> Result<Ack, Error> {
        self.call(methods::TURN_INTERRUPT, &params).await
    }

    pub async fn steer(&self, params: TurnSteerParams) -> Result<Ack, Error> {
        self.call(methods::TURN_STEER, &params).await
    }
}

// ---------------------------------------------------------------------------
// Account

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginStartParams {
    pub method: LoginMethod,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginStartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_id: Option<String>,
    /// Present for ChatGPT logins; the caller opens it in a browser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginCancelParams {
    pub login_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRateLimitsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimits>,
}

service! {
    /// `account/*` operations.
    AccountService
}

impl AccountService {
    pub async fn login_start(
        &self,
        params: AccountLoginStartParams,
    ) -> Result<AccountLoginStartResponse, Error> {
        self.call(methods::ACCOUNT_LOGIN_START, &params).await
    }

    pub async fn login_cancel(&self, params: AccountLoginCancelParams) -> Result<Ack, Error> {
        self.call(methods::ACCOUNT_LOGIN_CANCEL, &params).await
    }

    pub async fn logout(&self) -> Result<Ack, Error> {
        self.call(methods::ACCOUNT_LOGOUT, &json!({})).await
    }

    pub async fn read(&self) -> Result<AccountReadResponse, Error> {
        self.call(methods::ACCOUNT_READ, &json!({})).await
    }

    pub async fn rate_limits(&self) -> Result<AccountRateLimitsResponse, Error> {
        self.call(methods::ACCOUNT_RATE_LIMITS_READ, &json!({})).await
    }
}

// ---------------------------------------------------------------------------
// Config

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReadResponse {
    #[serde(default)]
    pub config: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValueWriteParams {
    pub key: String,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBatchWriteParams {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

service! {
    /// `config/*` operations.
    ConfigService
}

impl ConfigService {
    pub async fn read(&self) -> Result<ConfigReadResponse, Error> {
        self.call(methods::CONFIG_READ, &json!({})).await
    }

    pub async fn write_value(&self, params: ConfigValueWriteParams) -> Result<Ack, Error> {
        self.call(methods::CONFIG_VALUE_WRITE, &params).await
    }

    pub async fn batch_write(&self, params: ConfigBatchWriteParams) -> Result<Ack, Error> {
        self.call(methods::CONFIG_BATCH_WRITE, &params).await
    }
}

// ---------------------------------------------------------------------------
// Model / Skills / Apps

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_reasoning_efforts: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelInfo>,
}

service! {
    /// `model/*` operations.
    ModelService
}

impl ModelService {
    pub async fn list(&self) -> Result<ModelListResponse, Error> {
        self.call(methods::MODEL_LIST, &json!({})).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<SkillInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfigWriteParams {
    pub name: String,
    pub enabled: bool,
}

service! {
    /// `skills/*` operations.
    SkillsService
}

impl SkillsService {
    pub async fn list(&self) -> Result<SkillsListResponse, Error> {
        self.call(methods::SKILLS_LIST, &json!({})).await
    }

    pub async fn write_config(&self, params: SkillsConfigWriteParams) -> Result<Ack, Error> {
        self.call(methods::SKILLS_CONFIG_WRITE, &params).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<AppInfo>,
}

service! {
    /// `app/*` operations.
    AppsService
}

impl AppsService {
    pub async fn list(&self) -> Result<AppListResponse, Error> {
        self.call(methods::APP_LIST, &json!({})).await
    }
}

// ---------------------------------------------------------------------------
// Mcp

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerInfo {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<McpServerInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerToolsListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub server: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerToolsListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<McpToolInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpOauthLoginParams {
    pub server: String,
}

service! {
    /// `mcpServer/*` operations.
    McpService
}

impl McpService {
    pub async fn list_servers(&self) -> Result<McpServerListResponse, Error> {
        self.call(methods::MCP_SERVER_LIST, &json!({})).await
    }

    pub async fn list_tools(
        &self,
        params: McpServerToolsListParams,
    ) -> Result<McpServerToolsListResponse, Error> {
        self.call(methods::MCP_SERVER_TOOLS_LIST, &params).await
    }

    /// Kicks off an OAuth login; completion arrives as the
    /// `mcp/server/oauthLoginCompleted` notification.
    pub async fn oauth_login(&self, params: McpOauthLoginParams) -> Result<Ack, Error> {
        self.call(methods::MCP_SERVER_OAUTH_LOGIN, &params).await
    }
}

// ---------------------------------------------------------------------------
// Command / Review / Feedback

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecParams {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecResponse {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

service! {
    /// `command/*` operations.
    CommandService
}

impl CommandService {
    pub async fn exec(&self, params: CommandExecParams) -> Result<CommandExecResponse, Error> {
        self.call(methods::COMMAND_EXEC, &params).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStartParams {
    pub thread_id: String,
    pub target: ReviewTarget,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStartResponse {
    pub turn: Turn,
}

service! {
    /// `review/*` operations.
    ReviewService
}

impl ReviewService {
    pub async fn start(&self, params: ReviewStartParams) -> Result<ReviewStartResponse, Error> {
        self.call(methods::REVIEW_START, &params).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackUploadParams {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub include_logs: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackUploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
}

service! {
    /// `feedback/*` operations.
    FeedbackService
}

impl FeedbackService {
    pub async fn upload(&self, params: FeedbackUploadParams) -> Result<FeedbackUploadResponse, Error> {
        self.call(methods::FEEDBACK_UPLOAD, &params).await
    }
}

// ---------------------------------------------------------------------------
// ExternalAgent / Experimental

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAgentInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAgentListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<ExternalAgentInfo>,
}

service! {
    /// `externalAgent/*` operations.
    ExternalAgentService
}

impl ExternalAgentService {
    pub async fn list(&self) -> Result<ExternalAgentListResponse, Error> {
        self.call(methods::EXTERNAL_AGENT_LIST, &json!({})).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalFeatureListResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<FeatureInfo>,
}

service! {
    /// `experimental/*` operations.
    ExperimentalService
}

impl ExperimentalService {
    pub async fn feature_list(&self) -> Result<ExperimentalFeatureListResponse, Error> {
        self.call(methods::EXPERIMENTAL_FEATURE_LIST, &json!({})).await
    }
}
