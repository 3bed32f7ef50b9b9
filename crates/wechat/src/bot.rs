//! The slice of the WeChat automation library the channel relies on.
//!
//! Everything protocol-related (QR login, WeChat transport, contact lookup)
//! happens behind [`WechatBot`]. The production implementation talks to a
//! Wechaty sidecar (see [`crate::sidecar`]); tests plug in fakes through
//! [`BotFactory`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    error::{Result, WechatError},
    types::RawMessage,
};

/// Puppet used when the account does not name one.
pub const DEFAULT_PUPPET: &str = "wechat-puppet-wechat4u";

/// Which puppet backend drives the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuppetSelector {
    /// The bundled wechat4u puppet.
    Wechat4u,
    /// Any other backend, passed to the library as-is.
    Named(String),
}

impl PuppetSelector {
    pub fn from_config(puppet: Option<&str>) -> Self {
        match puppet {
            None | Some("") | Some(DEFAULT_PUPPET) => Self::Wechat4u,
            Some(other) => Self::Named(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Wechat4u => DEFAULT_PUPPET,
            Self::Named(name) => name,
        }
    }
}

/// Options a bot is built with.
#[derive(Debug, Clone)]
pub struct BotOptions {
    pub account_id: String,
    pub name: String,
    pub puppet: PuppetSelector,
    pub token: Option<Secret<String>>,
}

/// A WeChat user the bot can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Contact {
    /// Name for logs, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A file ready to be sent to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBox {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded file content.
    pub data: String,
}

impl FileBox {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Download `url` into a file box.
    pub async fn from_url(client: &reqwest::Client, url: &str) -> Result<Self> {
        let media_err = |source| WechatError::Media {
            url: url.to_string(),
            source,
        };

        let response = client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(media_err)?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let name = file_name_from_url(url);
        let bytes = response.bytes().await.map_err(media_err)?;

        debug!(url, name, mime_type, size = bytes.len(), "fetched media");
        Ok(Self::from_bytes(name, mime_type, &bytes))
    }
}

/// Last non-empty path segment of `url`, without query or fragment.
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    path.split('/')
        .skip(1)
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| "file".to_string())
}

/// Events emitted by a running bot.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Message(RawMessage),
    Scan { qrcode: String, status: i64 },
    Login { user: String },
    Logout { user: String },
    Error { error: String },
}

/// Receives bot events. Called from the connection's reader, must not block.
pub type EventCallback = Arc<dyn Fn(BotEvent) + Send + Sync>;

/// A live WeChat bot.
#[async_trait]
pub trait WechatBot: Send + Sync {
    /// Start the bot, including the interactive QR login on first run.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn find_contact(&self, contact_id: &str) -> Result<Option<Contact>>;

    async fn say_text(&self, contact: &Contact, text: &str) -> Result<()>;

    async fn say_file(&self, contact: &Contact, file: FileBox) -> Result<()>;
}

/// Builds bots for the runtime registry.
#[async_trait]
pub trait BotFactory: Send + Sync {
    async fn build(&self, options: BotOptions, on_event: EventCallback)
    -> Result<Arc<dyn WechatBot>>;
}
