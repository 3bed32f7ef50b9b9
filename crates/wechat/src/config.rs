//! WeChat channel configuration (`channels.wechat`).

use std::collections::BTreeMap;

use {
    moltis_channels::HostConfig,
    schemars::JsonSchema,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{CHANNEL_ID, error::ConfigError};

/// Credentials and display settings for one WeChat identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WechatAccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Puppet backend selector (defaults to `wechat-puppet-wechat4u`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puppet: Option<String>,

    /// Puppet service token.
    #[serde(
        default,
        serialize_with = "serialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub token: Option<Secret<String>>,

    /// Bot display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WechatAccountConfig {
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// A single allow-list entry; WeChat ids are sometimes written as numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum AllowFromEntry {
    Text(String),
    /// Kept as written, so large and fractional values survive.
    Number(#[schemars(with = "f64")] serde_json::Number),
}

impl std::fmt::Display for AllowFromEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Direct-message settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WechatDmConfig {
    #[serde(
        default,
        rename = "allowFrom",
        skip_serializing_if = "Option::is_none"
    )]
    pub allow_from: Option<Vec<AllowFromEntry>>,
}

/// The whole `channels.wechat` section.
///
/// Top-level account fields describe the `default` account; `accounts` adds
/// named ones. Unknown keys are rejected at every level.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WechatConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puppet: Option<String>,

    #[serde(
        default,
        serialize_with = "serialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub token: Option<Secret<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<BTreeMap<String, Option<WechatAccountConfig>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm: Option<WechatDmConfig>,
}

impl WechatConfig {
    /// Strictly parse a `channels.wechat` section.
    pub fn validate(section: &Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(section.clone())?)
    }

    /// Read and parse the section from the host config. Absent section is `Ok(None)`.
    pub fn from_host(cfg: &HostConfig) -> Result<Option<Self>, ConfigError> {
        cfg.channel_section(CHANNEL_ID)
            .map(Self::validate)
            .transpose()
    }

    /// The top-level fields, as the `default` account sees them.
    pub fn top_level(&self) -> WechatAccountConfig {
        WechatAccountConfig {
            enabled: self.enabled,
            puppet: self.puppet.clone(),
            token: self.token.clone(),
            name: self.name.clone(),
        }
    }

    /// Named account config; `None` when missing or explicitly `null`.
    pub fn account(&self, account_id: &str) -> Option<&WechatAccountConfig> {
        self.accounts
            .as_ref()
            .and_then(|accounts| accounts.get(account_id))
            .and_then(Option::as_ref)
    }
}

/// JSON Schema of [`WechatConfig`].
pub fn json_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(WechatConfig)).unwrap_or_default()
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
