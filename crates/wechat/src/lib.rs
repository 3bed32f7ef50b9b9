//! WeChat personal-account channel plugin for moltis.
//!
//! Implements `ChannelPlugin` on top of Wechaty, which runs in a Node.js
//! sidecar process reached over a WebSocket. Only direct messages that
//! contain [`TRIGGER_KEYWORD`] are handed to the agent.

pub mod accounts;
pub mod bot;
pub mod config;
pub mod error;
pub mod inbound;
pub mod messaging;
pub mod outbound;
pub mod plugin;
pub mod runtime;
pub mod sidecar;
pub mod types;

use std::sync::Arc;

use moltis_channels::{PluginApi, PluginDefinition, empty_plugin_config_schema};

pub use {
    config::WechatConfig,
    error::{ConfigError, WechatError},
    plugin::WechatPlugin,
    runtime::BotRegistry,
    sidecar::{DEFAULT_SIDECAR_URL, SidecarBotFactory},
};

pub const CHANNEL_ID: &str = "wechat";

pub const CHANNEL_LABEL: &str = "WeChat";

/// Substring a direct message must contain to reach the agent.
pub const TRIGGER_KEYWORD: &str = "管家宁贵人";

/// The loadable plugin definition.
pub fn plugin_definition() -> PluginDefinition {
    PluginDefinition {
        id: CHANNEL_ID,
        name: CHANNEL_LABEL,
        description: "WeChat channel plugin",
        config_schema: empty_plugin_config_schema(),
        register,
    }
}

fn register(api: &mut dyn PluginApi) {
    let plugin = WechatPlugin::new(api.runtime());
    api.register_channel(Arc::new(plugin));
}
