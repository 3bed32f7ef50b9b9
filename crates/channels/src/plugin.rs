//! Traits and records a channel plugin exposes to the host.

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::config::{DEFAULT_ACCOUNT_ID, HostConfig};

/// Kind of conversation a channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// Display metadata for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMeta {
    pub id: String,
    pub label: String,
    pub selection_label: String,
    pub blurb: String,
}

/// What a channel supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    pub chat_types: Vec<ChatType>,
    pub media: bool,
}

/// An account as resolved by the plugin, with its plugin-specific config kept
/// as JSON so the host can stay channel-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub enabled: bool,
    pub config: Value,
}

/// Summary shown in the host's channel listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDescription {
    pub account_id: String,
    pub name: String,
    pub enabled: bool,
    pub configured: bool,
}

/// Everything a plugin receives when the host starts one of its accounts.
#[derive(Debug, Clone)]
pub struct ChannelAccountContext {
    pub cfg: HostConfig,
    pub account: ResolvedAccount,
}

/// Handle returned by [`ChannelPlugin::start_account`].
#[async_trait]
pub trait AccountHandle: Send + Sync {
    async fn stop(&self) -> Result<()>;
}

/// How the host should hand replies to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// The plugin sends every message itself.
    Direct,
    /// The host gateway sends on the plugin's behalf.
    Gateway,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTextRequest {
    pub to: String,
    pub text: String,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendMediaRequest {
    pub to: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub account_id: Option<String>,
}

/// Outcome of an outbound send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundResult {
    pub channel: String,
    pub target: String,
    pub success: bool,
}

/// Outbound delivery for caller-initiated sends.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Direct
    }

    /// Maximum characters per outbound message. Enforced by the host dispatcher.
    fn text_chunk_limit(&self) -> Option<usize> {
        None
    }

    async fn send_text(&self, request: SendTextRequest) -> Result<OutboundResult>;

    async fn send_media(&self, request: SendMediaRequest) -> Result<OutboundResult>;
}

/// Target parsing used by the host's `send` tooling.
pub trait ChannelMessaging: Send + Sync {
    fn normalize_target(&self, target: &str) -> String;

    fn looks_like_id(&self, target: &str) -> bool;

    /// Example of a valid target, shown to users.
    fn target_hint(&self) -> &str;
}

/// A channel plugin.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn id(&self) -> &str;

    fn meta(&self) -> &ChannelMeta;

    fn capabilities(&self) -> &ChannelCapabilities;

    /// JSON Schema of the plugin's `channels.<id>` section.
    fn config_schema(&self) -> Value;

    /// Validate the plugin's `channels.<id>` section before any account starts.
    fn validate_config(&self, section: &Value) -> Result<()>;

    fn list_account_ids(&self, cfg: &HostConfig) -> Vec<String>;

    fn default_account_id(&self, _cfg: &HostConfig) -> String {
        DEFAULT_ACCOUNT_ID.to_string()
    }

    fn resolve_account(&self, cfg: &HostConfig, account_id: Option<&str>) -> ResolvedAccount;

    fn is_configured(&self, account: &ResolvedAccount) -> bool;

    fn describe_account(&self, account: &ResolvedAccount) -> AccountDescription;

    fn resolve_allow_from(&self, _cfg: &HostConfig, _account_id: Option<&str>) -> Vec<String> {
        Vec::new()
    }

    fn format_allow_from(&self, allow_from: &[String]) -> Vec<String> {
        allow_from.to_vec()
    }

    /// Bring an account online. The returned handle stops it again.
    async fn start_account(&self, ctx: ChannelAccountContext) -> Result<Box<dyn AccountHandle>>;

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        None
    }

    fn messaging(&self) -> Option<&dyn ChannelMessaging> {
        None
    }
}
