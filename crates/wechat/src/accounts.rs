//! Account resolution for the WeChat channel.
//!
//! Accounts are rebuilt from the host config on every lookup; nothing here
//! caches or mutates state.

use {
    moltis_channels::{AccountDescription, DEFAULT_ACCOUNT_ID, HostConfig},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::config::{WechatAccountConfig, WechatConfig};

/// Fallback display name for accounts without a `name`.
pub const DEFAULT_BOT_NAME: &str = "WeChat Bot";

/// A WeChat account as resolved from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WechatAccount {
    pub account_id: String,
    pub enabled: bool,
    pub config: WechatAccountConfig,
}

impl WechatAccount {
    /// `puppet` or `token` is present and non-empty.
    pub fn is_configured(&self) -> bool {
        let puppet = self.config.puppet.as_deref().is_some_and(|p| !p.is_empty());
        let token = self.config.token().is_some_and(|t| !t.is_empty());
        puppet || token
    }

    pub fn describe(&self) -> AccountDescription {
        AccountDescription {
            account_id: self.account_id.clone(),
            name: self
                .config
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_BOT_NAME)
                .to_string(),
            enabled: self.enabled,
            configured: self.is_configured(),
        }
    }
}

/// Parse the wechat section, treating an invalid section like an absent one.
///
/// Strict validation runs once at startup through the plugin's
/// `validate_config`; account lookups stay infallible.
fn section(cfg: &HostConfig) -> Option<WechatConfig> {
    match WechatConfig::from_host(cfg) {
        Ok(section) => section,
        Err(e) => {
            warn!(error = %e, "ignoring invalid wechat config section");
            None
        },
    }
}

/// Account ids declared in config.
pub fn list_account_ids(cfg: &HostConfig) -> Vec<String> {
    let Some(wechat) = section(cfg) else {
        return Vec::new();
    };
    match wechat.accounts {
        Some(accounts) => accounts.into_keys().collect(),
        None => vec![DEFAULT_ACCOUNT_ID.to_string()],
    }
}

/// Resolve an account. Unknown ids resolve to an empty, enabled account.
pub fn resolve_account(cfg: &HostConfig, account_id: Option<&str>) -> WechatAccount {
    let account_id = account_id.unwrap_or(DEFAULT_ACCOUNT_ID);
    let wechat = section(cfg);

    let account = wechat.as_ref().and_then(|w| {
        if account_id == DEFAULT_ACCOUNT_ID {
            Some(w.top_level())
        } else {
            w.account(account_id).cloned()
        }
    });
    let account = account.unwrap_or_default();
    let enabled = account.enabled.unwrap_or(true);

    WechatAccount {
        account_id: account_id.to_string(),
        enabled,
        config: WechatAccountConfig {
            enabled: Some(enabled),
            ..account
        },
    }
}

/// Raw `dm.allowFrom` entries, stringified.
pub fn resolve_allow_from(cfg: &HostConfig, _account_id: Option<&str>) -> Vec<String> {
    section(cfg)
        .and_then(|w| w.dm)
        .and_then(|dm| dm.allow_from)
        .unwrap_or_default()
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Normalize allow-list entries to bare WeChat ids.
///
/// Each entry is trimmed, stripped of leading `@` and of a case-insensitive
/// `wechat:user:` prefix, repeatedly until nothing changes, so the output is
/// a fixed point of this function. Entries that end up empty are dropped.
pub fn format_allow_from(allow_from: &[String]) -> Vec<String> {
    allow_from
        .iter()
        .map(|entry| normalize_allow_entry(entry))
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_allow_entry(mut entry: &str) -> &str {
    loop {
        let next = strip_user_prefix(entry.trim().trim_start_matches('@'));
        if next == entry {
            return entry;
        }
        entry = next;
    }
}

/// Strip a case-insensitive `wechat:user:` prefix.
fn strip_user_prefix(entry: &str) -> &str {
    const PREFIX: &str = "wechat:user:";
    match entry.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &entry[PREFIX.len()..],
        _ => entry,
    }
}
