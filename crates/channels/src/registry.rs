//! Plugin registration.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{plugin::ChannelPlugin, runtime::PluginRuntime};

/// What the host hands a plugin's `register` callback.
pub trait PluginApi {
    fn runtime(&self) -> PluginRuntime;

    fn register_channel(&mut self, plugin: Arc<dyn ChannelPlugin>);
}

/// A loadable plugin.
pub struct PluginDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Schema of the plugin-level (not channel-level) configuration.
    pub config_schema: Value,
    pub register: fn(&mut dyn PluginApi),
}

/// Schema for plugins that take no plugin-level configuration.
pub fn empty_plugin_config_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {}
    })
}
