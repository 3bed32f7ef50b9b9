//! Inbound pipeline: a filtered direct message goes through the host's
//! routing, session and reply services, and replies go back to the sender.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::{debug, error, info},
};

use moltis_channels::{
    ChatType, HostConfig, PluginRuntime,
    runtime::{
        AgentEnvelopeParams, DispatchRequest, DispatcherOptions, InboundContext, PeerKind,
        RecordSessionRequest, ReplyDelivery, ReplyPayload, ResolvedRoute, RoutePeer, RouteRequest,
    },
};

use crate::{
    CHANNEL_ID, CHANNEL_LABEL, TRIGGER_KEYWORD,
    bot::{FileBox, WechatBot},
    runtime::MessageHandler,
    types::WechatMessage,
};

/// Text after the last trigger keyword, trimmed. Falls back to the whole text
/// when nothing follows the keyword.
pub fn extract_command_body(text: &str) -> &str {
    match text.rsplit_once(TRIGGER_KEYWORD) {
        Some((_, tail)) if !tail.trim().is_empty() => tail.trim(),
        _ => text,
    }
}

fn user_address(id: &str) -> String {
    format!("{CHANNEL_ID}:user:{id}")
}

/// The host's inbound context for one message, before host finalization.
pub fn build_inbound_context(
    message: &WechatMessage,
    route: &ResolvedRoute,
    body: String,
    command_body: &str,
) -> InboundContext {
    InboundContext {
        body,
        raw_body: message.text.clone(),
        command_body: command_body.to_string(),
        from: user_address(&message.from_id),
        to: user_address(&message.to_id),
        session_key: Some(route.session_key.clone()),
        account_id: route.account_id.clone(),
        chat_type: ChatType::Direct,
        conversation_label: message.from_id.clone(),
        sender_name: message.from.clone(),
        sender_id: message
            .from_id
            .strip_prefix('@')
            .unwrap_or(&message.from_id)
            .to_string(),
        provider: CHANNEL_ID.to_string(),
        surface: CHANNEL_ID.to_string(),
        message_sid: Some(message.timestamp.to_string()),
        originating_channel: CHANNEL_ID.to_string(),
        originating_to: user_address(&message.to_id),
        command_authorized: true,
    }
}

/// Feeds an account's messages into the host's reply pipeline.
pub struct InboundHandler {
    runtime: PluginRuntime,
    cfg: HostConfig,
    account_id: String,
    bot: Arc<dyn WechatBot>,
    http: reqwest::Client,
}

impl InboundHandler {
    pub fn new(
        runtime: PluginRuntime,
        cfg: HostConfig,
        account_id: impl Into<String>,
        bot: Arc<dyn WechatBot>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            runtime,
            cfg,
            account_id: account_id.into(),
            bot,
            http,
        }
    }

    async fn process(&self, message: &WechatMessage) -> Result<()> {
        let route = self.runtime.routing.resolve_agent_route(&RouteRequest {
            cfg: &self.cfg,
            channel: CHANNEL_ID,
            account_id: &self.account_id,
            peer: RoutePeer {
                kind: PeerKind::Direct,
                id: message.from_id.clone(),
            },
        })?;

        let command_body = extract_command_body(&message.text);
        let reply = &self.runtime.reply;
        let body = reply.format_agent_envelope(&AgentEnvelopeParams {
            channel: CHANNEL_LABEL,
            from: &message.from,
            timestamp: Some(message.timestamp),
            envelope: reply.resolve_envelope_format_options(&self.cfg),
            body: &message.text,
        });
        let ctx = reply.finalize_inbound_context(build_inbound_context(
            message,
            &route,
            body,
            command_body,
        ));

        let store_path = self
            .runtime
            .session
            .resolve_store_path(self.cfg.session_store(), &route.agent_id);
        let session_key = ctx.session_key.as_deref().unwrap_or(&route.session_key);
        let on_record_error = |e: &anyhow::Error| {
            error!(error = %e, "failed updating WeChat session meta");
        };
        if let Err(e) = self
            .runtime
            .session
            .record_inbound_session(RecordSessionRequest {
                store_path: &store_path,
                session_key,
                ctx: &ctx,
                on_record_error: &on_record_error,
            })
            .await
        {
            on_record_error(&e);
        }

        let table_mode =
            self.runtime
                .text
                .resolve_markdown_table_mode(&self.cfg, CHANNEL_ID, &self.account_id);

        debug!(
            account_id = %self.account_id,
            session_key = %route.session_key,
            "dispatching WeChat message"
        );
        reply
            .dispatch_reply(DispatchRequest {
                ctx,
                cfg: self.cfg.clone(),
                options: DispatcherOptions {
                    deliver: Arc::new(ContactReply {
                        bot: Arc::clone(&self.bot),
                        contact_id: message.from_id.clone(),
                        http: self.http.clone(),
                    }),
                    table_mode,
                },
            })
            .await
    }
}

#[async_trait]
impl MessageHandler for InboundHandler {
    async fn handle(&self, message: &WechatMessage) -> Result<()> {
        if let Err(e) = self.process(message).await {
            error!(
                account_id = %self.account_id,
                from_id = %message.from_id,
                error = %e,
                "failed to route WeChat message"
            );
        }
        Ok(())
    }
}

/// Sends reply blocks back to the contact a message came from.
struct ContactReply {
    bot: Arc<dyn WechatBot>,
    contact_id: String,
    http: reqwest::Client,
}

#[async_trait]
impl ReplyDelivery for ContactReply {
    async fn deliver(&self, payload: ReplyPayload) -> Result<()> {
        let Some(contact) = self.bot.find_contact(&self.contact_id).await? else {
            error!(contact_id = %self.contact_id, "WeChat contact not found");
            return Ok(());
        };

        if let Some(url) = payload.media_url.as_deref() {
            let file = FileBox::from_url(&self.http, url).await?;
            self.bot.say_file(&contact, file).await?;
        }
        if !payload.text.is_empty() {
            self.bot.say_text(&contact, &payload.text).await?;
        }

        info!(
            contact = %contact.display_name(),
            contact_id = %self.contact_id,
            "sent WeChat reply"
        );
        Ok(())
    }
}
