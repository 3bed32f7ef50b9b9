//! Outbound message sending for WeChat.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::debug,
};

use moltis_channels::{
    DEFAULT_ACCOUNT_ID, DeliveryMode, OutboundResult, SendMediaRequest, SendTextRequest,
    plugin::ChannelOutbound,
};

use crate::{
    CHANNEL_ID,
    bot::{Contact, FileBox, WechatBot},
    error::WechatError,
    runtime::BotRegistry,
};

/// Per-message text ceiling. The host dispatcher enforces it.
pub const TEXT_CHUNK_LIMIT: usize = 2000;

/// Raw contact id for an outbound target: an optional `wechat:` followed by
/// `user:` is removed. Anything else is passed through.
pub fn strip_target_prefix(to: &str) -> &str {
    let rest = to.strip_prefix("wechat:").unwrap_or(to);
    match rest.strip_prefix("user:") {
        Some(id) => id,
        None => to,
    }
}

/// WeChat outbound message sender.
pub struct WechatOutbound {
    registry: Arc<BotRegistry>,
    http: reqwest::Client,
}

impl WechatOutbound {
    pub fn new(registry: Arc<BotRegistry>, http: reqwest::Client) -> Self {
        Self { registry, http }
    }

    async fn resolve(
        &self,
        account_id: Option<&str>,
        to: &str,
    ) -> Result<(Arc<dyn WechatBot>, Contact)> {
        let account_id = account_id.unwrap_or(DEFAULT_ACCOUNT_ID);
        let context = self
            .registry
            .get_wechat_context(account_id)
            .await
            .ok_or_else(|| WechatError::BotNotFound {
                account_id: account_id.to_string(),
            })?;

        let contact_id = strip_target_prefix(to);
        let contact = context
            .bot
            .find_contact(contact_id)
            .await?
            .ok_or_else(|| WechatError::ContactNotFound {
                contact_id: contact_id.to_string(),
            })?;
        Ok((Arc::clone(&context.bot), contact))
    }

    fn sent(to: String) -> OutboundResult {
        OutboundResult {
            channel: CHANNEL_ID.to_string(),
            target: to,
            success: true,
        }
    }
}

#[async_trait]
impl ChannelOutbound for WechatOutbound {
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Direct
    }

    fn text_chunk_limit(&self) -> Option<usize> {
        Some(TEXT_CHUNK_LIMIT)
    }

    async fn send_text(&self, request: SendTextRequest) -> Result<OutboundResult> {
        let (bot, contact) = self
            .resolve(request.account_id.as_deref(), &request.to)
            .await?;
        debug!(to = %request.to, contact_id = %contact.id, "sending WeChat text");

        bot.say_text(&contact, &request.text).await?;
        Ok(Self::sent(request.to))
    }

    async fn send_media(&self, request: SendMediaRequest) -> Result<OutboundResult> {
        let (bot, contact) = self
            .resolve(request.account_id.as_deref(), &request.to)
            .await?;

        // Media goes first; a failed text send after it is not rolled back.
        if let Some(url) = request.media_url.as_deref() {
            debug!(to = %request.to, url, "sending WeChat media");
            let file = FileBox::from_url(&self.http, url).await?;
            bot.say_file(&contact, file).await?;
        }
        if let Some(text) = request.text.as_deref().filter(|t| !t.is_empty()) {
            bot.say_text(&contact, text).await?;
        }
        Ok(Self::sent(request.to))
    }
}
