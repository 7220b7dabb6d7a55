use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One block of user-provided input for a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserInput {
    Text {
        text: String,
    },
    Image {
        url: String,
    },
    LocalImage {
        path: PathBuf,
    },
    #[serde(untagged)]
    Unknown(Value),
}

impl UserInput {
    /// Convenience constructor for the common plain-text case.
    pub fn text(text: impl Into<String>) -> Self {
        UserInput::Text { text: text.into() }
    }
}

/// When the agent should pause and ask the client for approval.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AskForApproval {
    UnlessTrusted,
    OnFailure,
    #[default]
    OnRequest,
    Never,
    #[serde(untagged)]
    Unknown(String),
}

/// Filesystem/network sandbox applied to commands the agent runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SandboxPolicy {
    ReadOnly,
    #[serde(rename_all = "camelCase")]
    WorkspaceWrite {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        writable_roots: Vec<PathBuf>,
        #[serde(default)]
        network_access: bool,
        #[serde(default)]
        exclude_tmpdir_env_var: bool,
        #[serde(default)]
        exclude_slash_tmp: bool,
    },
    DangerFullAccess,
    #[serde(untagged)]
    Unknown(Value),
}

/// What a code review turn should look at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReviewTarget {
    UncommittedChanges,
    BaseBranch {
        branch: String,
    },
    #[serde(rename_all = "camelCase")]
    Commit {
        sha: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Custom {
        instructions: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

/// Which surface originally created a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionSource {
    Cli,
    VsCode,
    Exec,
    Mcp,
    SubAgent,
    #[serde(untagged)]
    Unknown(String),
}
