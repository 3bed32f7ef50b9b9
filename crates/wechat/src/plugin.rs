//! WeChat channel plugin implementation.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    serde_json::Value,
    tracing::{info, warn},
};

use moltis_channels::{
    AccountDescription, AccountHandle, ChannelAccountContext, ChannelCapabilities,
    ChannelMessaging, ChannelMeta, ChannelOutbound, ChannelPlugin, ChatType, HostConfig,
    PluginRuntime, ResolvedAccount,
};

use crate::{
    CHANNEL_ID, CHANNEL_LABEL,
    accounts::{self, WechatAccount},
    bot::BotFactory,
    config::{self, WechatAccountConfig, WechatConfig},
    inbound::InboundHandler,
    messaging::WechatMessaging,
    outbound::WechatOutbound,
    runtime::{BotRegistry, BotSettings},
    sidecar::SidecarBotFactory,
};

/// WeChat personal-account channel plugin (via a Wechaty sidecar).
pub struct WechatPlugin {
    runtime: PluginRuntime,
    registry: Arc<BotRegistry>,
    outbound: WechatOutbound,
    messaging: WechatMessaging,
    meta: ChannelMeta,
    capabilities: ChannelCapabilities,
    http: reqwest::Client,
}

impl WechatPlugin {
    /// Plugin backed by a sidecar at the default URL.
    pub fn new(runtime: PluginRuntime) -> Self {
        Self::with_factory(runtime, Arc::new(SidecarBotFactory::default()))
    }

    pub fn with_sidecar_url(runtime: PluginRuntime, url: impl Into<String>) -> Self {
        Self::with_factory(runtime, Arc::new(SidecarBotFactory::new(url)))
    }

    pub fn with_factory(runtime: PluginRuntime, factory: Arc<dyn BotFactory>) -> Self {
        let http = reqwest::Client::new();
        let registry = Arc::new(BotRegistry::new(factory));
        Self {
            runtime,
            outbound: WechatOutbound::new(Arc::clone(&registry), http.clone()),
            registry,
            messaging: WechatMessaging,
            meta: ChannelMeta {
                id: CHANNEL_ID.to_string(),
                label: CHANNEL_LABEL.to_string(),
                selection_label: "WeChat (personal account)".to_string(),
                blurb: "Chat with your agent from a personal WeChat account.".to_string(),
            },
            capabilities: ChannelCapabilities {
                chat_types: vec![ChatType::Direct],
                media: true,
            },
            http,
        }
    }

    /// The registry of live bots.
    pub fn registry(&self) -> Arc<BotRegistry> {
        Arc::clone(&self.registry)
    }
}

fn to_resolved(account: WechatAccount) -> ResolvedAccount {
    ResolvedAccount {
        config: serde_json::to_value(&account.config).unwrap_or(Value::Null),
        account_id: account.account_id,
        enabled: account.enabled,
    }
}

fn from_resolved(account: &ResolvedAccount) -> WechatAccount {
    let config: WechatAccountConfig = match serde_json::from_value(account.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            warn!(account_id = %account.account_id, error = %e, "unreadable WeChat account config");
            Default::default()
        },
    };
    WechatAccount {
        account_id: account.account_id.clone(),
        enabled: account.enabled,
        config,
    }
}

#[async_trait]
impl ChannelPlugin for WechatPlugin {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    fn capabilities(&self) -> &ChannelCapabilities {
        &self.capabilities
    }

    fn config_schema(&self) -> Value {
        config::json_schema()
    }

    fn validate_config(&self, section: &Value) -> Result<()> {
        WechatConfig::validate(section)?;
        Ok(())
    }

    fn list_account_ids(&self, cfg: &HostConfig) -> Vec<String> {
        accounts::list_account_ids(cfg)
    }

    fn resolve_account(&self, cfg: &HostConfig, account_id: Option<&str>) -> ResolvedAccount {
        to_resolved(accounts::resolve_account(cfg, account_id))
    }

    fn is_configured(&self, account: &ResolvedAccount) -> bool {
        from_resolved(account).is_configured()
    }

    fn describe_account(&self, account: &ResolvedAccount) -> AccountDescription {
        from_resolved(account).describe()
    }

    fn resolve_allow_from(&self, cfg: &HostConfig, account_id: Option<&str>) -> Vec<String> {
        accounts::resolve_allow_from(cfg, account_id)
    }

    fn format_allow_from(&self, allow_from: &[String]) -> Vec<String> {
        accounts::format_allow_from(allow_from)
    }

    async fn start_account(&self, ctx: ChannelAccountContext) -> Result<Box<dyn AccountHandle>> {
        let account = from_resolved(&ctx.account);
        let account_id = account.account_id.clone();
        info!(%account_id, "starting WeChat account");

        let context = self
            .registry
            .create_wechat_bot(&account_id, BotSettings::from(&account.config))
            .await
            .with_context(|| format!("failed to start WeChat bot for account {account_id}"))?;

        let handler_id = format!("{account_id}-handler");
        context
            .set_handler(
                handler_id.clone(),
                Arc::new(InboundHandler::new(
                    self.runtime.clone(),
                    ctx.cfg,
                    account_id.clone(),
                    Arc::clone(&context.bot),
                    self.http.clone(),
                )),
            )
            .await;

        Ok(Box::new(WechatAccountHandle {
            registry: Arc::clone(&self.registry),
            account_id,
            handler_id,
        }))
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        Some(&self.outbound)
    }

    fn messaging(&self) -> Option<&dyn ChannelMessaging> {
        Some(&self.messaging)
    }
}

/// Stops a started account: drops its handler, then the bot.
pub struct WechatAccountHandle {
    registry: Arc<BotRegistry>,
    account_id: String,
    handler_id: String,
}

#[async_trait]
impl AccountHandle for WechatAccountHandle {
    async fn stop(&self) -> Result<()> {
        if let Some(context) = self.registry.get_wechat_context(&self.account_id).await {
            context.remove_handler(&self.handler_id).await;
        }
        self.registry.stop_wechat_bot(&self.account_id).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use {
        super::*,
        crate::{
            bot::{BotEvent, PuppetSelector},
            inbound::tests::{FakeHost, alice, runtime_for},
            runtime::tests::{FakeBot, FakeFactory, raw},
        },
        moltis_channels::{DeliveryMode, SendTextRequest, runtime::ReplyPayload},
    };

    fn host_cfg() -> HostConfig {
        HostConfig::new(json!({
            "channels": {
                "wechat": {
                    "puppet": "wechaty-puppet-service",
                    "token": "puppet-token",
                    "name": "Butler",
                    "accounts": { "work": { "enabled": false } }
                }
            }
        }))
    }

    fn plugin_with(factory: Arc<FakeFactory>, host: Arc<FakeHost>) -> WechatPlugin {
        WechatPlugin::with_factory(runtime_for(host), factory)
    }

    #[test]
    fn meta_and_capabilities() {
        let plugin = plugin_with(Arc::default(), Arc::default());
        assert_eq!(plugin.id(), "wechat");
        assert_eq!(plugin.meta().label, "WeChat");
        assert_eq!(plugin.capabilities().chat_types, vec![ChatType::Direct]);
        assert!(plugin.capabilities().media);
        let outbound = plugin.outbound().unwrap();
        assert_eq!(outbound.delivery_mode(), DeliveryMode::Direct);
        assert_eq!(outbound.text_chunk_limit(), Some(2000));
        assert_eq!(
            plugin.messaging().unwrap().normalize_target("123"),
            "user:123"
        );
    }

    #[test]
    fn schema_is_strict() {
        let plugin = plugin_with(Arc::default(), Arc::default());
        let schema = plugin.config_schema();
        assert_eq!(schema["additionalProperties"], json!(false));
        assert!(schema["properties"].get("accounts").is_some());

        assert!(plugin.validate_config(&json!({ "token": "t" })).is_ok());
        assert!(plugin.validate_config(&json!({ "bogus": 1 })).is_err());
        assert!(
            plugin
                .validate_config(&json!({ "accounts": { "a": { "bogus": 1 } } }))
                .is_err()
        );
    }

    #[test]
    fn account_callbacks_round_trip() {
        let plugin = plugin_with(Arc::default(), Arc::default());
        let cfg = host_cfg();

        let default = plugin.resolve_account(&cfg, None);
        assert_eq!(default.account_id, "default");
        assert!(default.enabled);
        assert_eq!(default.config["token"], "puppet-token");
        assert!(plugin.is_configured(&default));
        let desc = plugin.describe_account(&default);
        assert_eq!(desc.name, "Butler");
        assert!(desc.configured);

        let work = plugin.resolve_account(&cfg, Some("work"));
        assert!(!work.enabled);
        assert!(!plugin.is_configured(&work));
        assert_eq!(plugin.describe_account(&work).name, "WeChat Bot");

        assert_eq!(plugin.list_account_ids(&cfg), vec!["work"]);
        assert_eq!(plugin.default_account_id(&cfg), "default");
    }

    #[tokio::test]
    async fn start_account_wires_inbound_to_replies() {
        let factory = Arc::new(FakeFactory::default().with_bot("default", FakeBot {
            contacts: vec![alice()],
            ..Default::default()
        }));
        let host = Arc::new(FakeHost {
            reply: ReplyPayload {
                text: "done".into(),
                media_url: None,
            },
            ..Default::default()
        });
        let plugin = plugin_with(factory.clone(), host.clone());
        let cfg = host_cfg();
        let account = plugin.resolve_account(&cfg, None);

        let handle = plugin
            .start_account(ChannelAccountContext { cfg, account })
            .await
            .unwrap();

        let built = factory.built.lock().unwrap()[0].clone();
        assert_eq!(built.name, "Butler");
        assert_eq!(
            built.puppet,
            PuppetSelector::Named("wechaty-puppet-service".into())
        );
        let context = plugin.registry().get_wechat_context("default").await.unwrap();
        assert_eq!(context.handler_ids().await, vec!["default-handler"]);

        let bot = factory.bots.lock().unwrap()["default"].clone();
        let mut message = raw("管家宁贵人 status");
        message.talker_id = "@alice".into();
        factory.emit("default", BotEvent::Message(message));
        for _ in 0..100 {
            if !bot.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(bot.sent.lock().unwrap().clone(), vec![(
            "@alice".to_string(),
            "done".to_string()
        )]);
        assert_eq!(host.dispatched.lock().unwrap()[0].0.command_body, "status");

        handle.stop().await.unwrap();
        assert!(plugin.registry().get_wechat_context("default").await.is_none());
        assert_eq!(context.handler_ids().await, Vec::<String>::new());
        assert_eq!(bot.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outbound_uses_started_bot() {
        let factory = Arc::new(FakeFactory::default().with_bot("default", FakeBot {
            contacts: vec![alice()],
            ..Default::default()
        }));
        let plugin = plugin_with(factory.clone(), Arc::default());
        let cfg = host_cfg();
        let account = plugin.resolve_account(&cfg, None);

        let outbound = plugin.outbound().unwrap();
        assert!(
            outbound
                .send_text(SendTextRequest {
                    to: "@alice".into(),
                    text: "early".into(),
                    account_id: None,
                })
                .await
                .is_err()
        );

        plugin
            .start_account(ChannelAccountContext { cfg, account })
            .await
            .unwrap();
        let result = outbound
            .send_text(SendTextRequest {
                to: "wechat:user:@alice".into(),
                text: "hello".into(),
                account_id: None,
            })
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.target, "wechat:user:@alice");
    }
}
