#![forbid(unsafe_code)]
//! Async client SDK for driving the Codex app-server over JSON-RPC stdio.
//!
//! The app-server speaks bidirectional JSON-RPC 2.0, one object per line,
//! over the stdio of a locally spawned `codex app-server` child. This crate
//! turns that byte stream into a typed, concurrent client:
//!
//! - [`Transport`] frames newline-delimited JSON over any duplex byte pair;
//!   the spawned child's stdio is the production wiring.
//! - A router (internal) correlates responses to requests, fans
//!   notifications out to listeners in wire order, and services
//!   server-to-client approval requests through [`ApprovalHandlers`].
//! - [`Client::run`] / [`Client::run_streamed`] drive the full
//!   `thread/start → turn/start → events → turn/completed` lifecycle,
//!   returning a [`RunResult`] or a backpressured, single-use [`RunStream`].
//! - [`Conversation`] keeps a thread across turns, enforcing one active turn
//!   at a time and handing out deep-copied state snapshots.
//! - [`AgentTracker`] follows sub-agent collab events and can wait for all
//!   spawned agents to reach a terminal state.
//!
//! ```rust,no_run
//! use codex_sdk::{Client, RunParams};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), codex_sdk::Error> {
//! let client = Client::builder()
//!     .binary("/opt/myapp/bin/codex")
//!     .codex_home("/tmp/my-app-codex")
//!     .spawn()
//!     .await?;
//! let result = client.run(RunParams::from_prompt("Say hello")).await?;
//! println!("{}", result.response);
//! client.close().await;
//! # Ok(()) }
//! ```
//!
//! Forward compatibility: every tagged sum type in [`protocol`] carries an
//! `Unknown` variant preserving unrecognized payloads verbatim, so a newer
//! server never breaks decoding. Unknown notification methods are simply
//! never subscribed to; unknown server-request methods are answered with
//! `-32601`.

mod client;
mod collab;
mod conversation;
mod error;
mod events;
mod process;
pub mod protocol;
mod rpc;
pub mod services;
mod stream;
mod turn;

pub use client::{
    Client, ClientBuilder, ClientInfo, ClientOptions, InitializeParams, InitializeResponse,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use collab::{AgentInfo, AgentTracker};
pub use conversation::Conversation;
pub use error::{Error, TurnError};
pub use events::{CollabPhase, TurnEvent};
pub use process::{ServerLaunchConfig, CODEX_BINARY_ENV, CODEX_HOME_ENV};
pub use rpc::envelope::RequestId;
pub use rpc::router::{
    ApprovalFn, ApprovalHandlers, BoxFuture, HandlerErrorCallback, NotificationSubscription,
};
pub use rpc::transport::Transport;
pub use stream::{RunStream, TurnEvents};
pub use turn::{RunParams, RunResult};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod tests;
