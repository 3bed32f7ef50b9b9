//! Target parsing for `user:<id>` addresses.

use moltis_channels::ChannelMessaging;

/// Example target shown to users.
pub const TARGET_HINT: &str = "user:WeChatId";

/// Prefix bare numeric ids with `user:`; leave everything else alone.
pub fn normalize_target(target: &str) -> String {
    if !target.starts_with("user:") && is_numeric(target) {
        format!("user:{target}")
    } else {
        target.to_string()
    }
}

/// `user:` followed by one or more ASCII digits.
pub fn looks_like_id(target: &str) -> bool {
    target.strip_prefix("user:").is_some_and(is_numeric)
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

pub struct WechatMessaging;

impl ChannelMessaging for WechatMessaging {
    fn normalize_target(&self, target: &str) -> String {
        normalize_target(target)
    }

    fn looks_like_id(&self, target: &str) -> bool {
        looks_like_id(target)
    }

    fn target_hint(&self) -> &str {
        TARGET_HINT
    }
}
