//! Host services a channel plugin calls while handling inbound traffic.
//!
//! The host owns agent routing, reply generation, session persistence and
//! text formatting. Plugins receive a [`PluginRuntime`] at registration time
//! and go through it for all of those; none of them is implemented here.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{config::HostConfig, plugin::ChatType};

/// Handle to the host services, injected into plugins at registration.
#[derive(Clone)]
pub struct PluginRuntime {
    pub routing: Arc<dyn RoutingApi>,
    pub reply: Arc<dyn ReplyApi>,
    pub session: Arc<dyn SessionApi>,
    pub text: Arc<dyn TextApi>,
}

// ── Routing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePeer {
    pub kind: PeerKind,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    pub cfg: &'a HostConfig,
    pub channel: &'a str,
    pub account_id: &'a str,
    pub peer: RoutePeer,
}

/// The agent and session an inbound message belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub session_key: String,
    pub account_id: String,
}

pub trait RoutingApi: Send + Sync {
    fn resolve_agent_route(&self, request: &RouteRequest<'_>) -> Result<ResolvedRoute>;
}

// ── Reply ───────────────────────────────────────────────────────────────────

/// Host-wide formatting options for the agent-facing message envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeFormatOptions {
    pub include_timestamp: bool,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentEnvelopeParams<'a> {
    /// Human-readable channel label (e.g. `WeChat`).
    pub channel: &'a str,
    pub from: &'a str,
    /// Unix milliseconds.
    pub timestamp: Option<i64>,
    pub envelope: EnvelopeFormatOptions,
    pub body: &'a str,
}

/// Canonical inbound message context, keyed the way the host stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundContext {
    pub body: String,
    pub raw_body: String,
    pub command_body: String,
    pub from: String,
    pub to: String,
    pub session_key: Option<String>,
    pub account_id: String,
    pub chat_type: ChatType,
    pub conversation_label: String,
    pub sender_name: String,
    pub sender_id: String,
    pub provider: String,
    pub surface: String,
    pub message_sid: Option<String>,
    pub originating_channel: String,
    pub originating_to: String,
    pub command_authorized: bool,
}

/// One block of agent output to deliver to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyPayload {
    pub text: String,
    pub media_url: Option<String>,
}

/// Channel-side delivery used by the reply dispatcher.
#[async_trait]
pub trait ReplyDelivery: Send + Sync {
    async fn deliver(&self, payload: ReplyPayload) -> Result<()>;
}

/// How markdown tables in replies are rendered for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    #[default]
    Off,
    Bullets,
    Code,
}

pub struct DispatcherOptions {
    pub deliver: Arc<dyn ReplyDelivery>,
    pub table_mode: TableMode,
}

pub struct DispatchRequest {
    pub ctx: InboundContext,
    pub cfg: HostConfig,
    pub options: DispatcherOptions,
}

#[async_trait]
pub trait ReplyApi: Send + Sync {
    fn resolve_envelope_format_options(&self, cfg: &HostConfig) -> EnvelopeFormatOptions;

    fn format_agent_envelope(&self, params: &AgentEnvelopeParams<'_>) -> String;

    /// Fill host-derived defaults into an inbound context.
    fn finalize_inbound_context(&self, ctx: InboundContext) -> InboundContext;

    /// Run the agent for `ctx` and hand every reply block to `deliver`.
    async fn dispatch_reply(&self, request: DispatchRequest) -> Result<()>;
}

// ── Session ─────────────────────────────────────────────────────────────────

pub struct RecordSessionRequest<'a> {
    pub store_path: &'a Path,
    pub session_key: &'a str,
    pub ctx: &'a InboundContext,
    pub on_record_error: &'a (dyn Fn(&anyhow::Error) + Send + Sync),
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    fn resolve_store_path(&self, store: Option<&str>, agent_id: &str) -> PathBuf;

    async fn record_inbound_session(&self, request: RecordSessionRequest<'_>) -> Result<()>;
}

// ── Text ────────────────────────────────────────────────────────────────────

pub trait TextApi: Send + Sync {
    fn resolve_markdown_table_mode(
        &self,
        cfg: &HostConfig,
        channel: &str,
        account_id: &str,
    ) -> TableMode;
}
