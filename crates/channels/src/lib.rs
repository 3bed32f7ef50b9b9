//! Channel plugin contract for moltis.
//!
//! Channel crates (WeChat, WhatsApp, ...) implement [`ChannelPlugin`] and are
//! handed a [`PluginRuntime`] through [`PluginApi`] when the host loads them.
//! The runtime exposes the host's routing, reply, session and text services;
//! this crate only declares their shape.

pub mod config;
pub mod plugin;
pub mod registry;
pub mod runtime;

pub use {
    config::{DEFAULT_ACCOUNT_ID, HostConfig},
    plugin::{
        AccountDescription, AccountHandle, ChannelAccountContext, ChannelCapabilities,
        ChannelMessaging, ChannelMeta, ChannelOutbound, ChannelPlugin, ChatType, DeliveryMode,
        OutboundResult, ResolvedAccount, SendMediaRequest, SendTextRequest,
    },
    registry::{PluginApi, PluginDefinition, empty_plugin_config_schema},
    runtime::PluginRuntime,
};
