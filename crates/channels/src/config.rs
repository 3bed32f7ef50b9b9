//! Read-only view over the host configuration handed to channel plugins.

use serde_json::Value;

/// Account id used when a channel has no `accounts` map.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// The host's merged configuration document.
///
/// Plugins only ever read their own `channels.<id>` section and a handful of
/// host-wide settings (session store, envelope format), so the document is
/// kept untyped and each plugin deserializes the part it owns.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    raw: Value,
}

impl HostConfig {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The `channels.<channel>` section, if present and not `null`.
    pub fn channel_section(&self, channel: &str) -> Option<&Value> {
        self.raw
            .get("channels")
            .and_then(|c| c.get(channel))
            .filter(|v| !v.is_null())
    }

    /// The configured session store location (`session.store`).
    pub fn session_store(&self) -> Option<&str> {
        self.raw
            .get("session")
            .and_then(|s| s.get("store"))
            .and_then(Value::as_str)
    }
}

impl From<Value> for HostConfig {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn channel_section_lookup() {
        let cfg = HostConfig::new(json!({
            "channels": { "wechat": { "token": "t" }, "telegram": null }
        }));
        assert_eq!(cfg.channel_section("wechat"), Some(&json!({ "token": "t" })));
        assert!(cfg.channel_section("telegram").is_none());
        assert!(cfg.channel_section("slack").is_none());
    }

    #[test]
    fn session_store_lookup() {
        let cfg = HostConfig::new(json!({ "session": { "store": "~/.moltis/sessions" } }));
        assert_eq!(cfg.session_store(), Some("~/.moltis/sessions"));
        assert!(HostConfig::default().session_store().is_none());
    }
}
