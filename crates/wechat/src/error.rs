//! Error types for the WeChat channel.

use thiserror::Error;

/// Errors raised by the WeChat bot layer and outbound sends.
#[derive(Debug, Error)]
pub enum WechatError {
    #[error("WeChat bot not found for account: {account_id}")]
    BotNotFound { account_id: String },

    #[error("WeChat contact not found: {contact_id}")]
    ContactNotFound { contact_id: String },

    #[error("WeChat sidecar not connected")]
    NotConnected,

    #[error("WeChat sidecar request timed out: {action}")]
    Timeout { action: String },

    #[error("WeChat sidecar error: {0}")]
    Sidecar(String),

    #[error("failed to fetch media from {url}: {source}")]
    Media {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while validating the `channels.wechat` config section.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid wechat config: {0}")]
    Invalid(#[from] serde_json::Error),
}

pub type Result<T, E = WechatError> = std::result::Result<T, E>;
