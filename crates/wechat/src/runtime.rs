//! Registry of live WeChat bots, one per account.
//!
//! The registry owns bot lifecycles. Each bot gets a dispatcher task that
//! drains its events in arrival order: `message` events are filtered down to
//! direct messages carrying the trigger keyword and handed to the account's
//! handlers on a task of their own, so a slow reply to one contact does not
//! hold up the next event. Lifecycle events are only logged.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::join_all},
    secrecy::Secret,
    tokio::sync::{Mutex, RwLock, mpsc},
    tracing::{debug, error, info, warn},
};

use crate::{
    TRIGGER_KEYWORD,
    bot::{BotEvent, BotFactory, BotOptions, EventCallback, PuppetSelector, WechatBot},
    config::WechatAccountConfig,
    error::Result,
    types::{RawMessage, WechatMessage},
};

/// Subscriber for an account's filtered inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &WechatMessage) -> anyhow::Result<()>;
}

/// Settings a bot is created from.
#[derive(Debug, Clone, Default)]
pub struct BotSettings {
    pub puppet: Option<String>,
    pub token: Option<Secret<String>>,
    pub name: Option<String>,
}

impl From<&WechatAccountConfig> for BotSettings {
    fn from(config: &WechatAccountConfig) -> Self {
        Self {
            puppet: config.puppet.clone(),
            token: config.token.clone(),
            name: config.name.clone(),
        }
    }
}

/// A live bot and the handlers subscribed to its messages.
pub struct BotContext {
    pub account_id: String,
    pub bot: Arc<dyn WechatBot>,
    handlers: RwLock<Vec<(String, Arc<dyn MessageHandler>)>>,
}

impl BotContext {
    fn new(account_id: &str, bot: Arc<dyn WechatBot>) -> Self {
        Self {
            account_id: account_id.to_string(),
            bot,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Install a handler. An existing handler with the same id is replaced in place.
    pub async fn set_handler(&self, handler_id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let handler_id = handler_id.into();
        let mut handlers = self.handlers.write().await;
        match handlers.iter_mut().find(|(id, _)| *id == handler_id) {
            Some(slot) => slot.1 = handler,
            None => handlers.push((handler_id, handler)),
        }
    }

    pub async fn remove_handler(&self, handler_id: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(id, _)| id != handler_id);
        handlers.len() != before
    }

    pub async fn handler_ids(&self) -> Vec<String> {
        self.handlers
            .read()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Run every handler in order. A failing or panicking handler does not
    /// affect the others.
    async fn notify(&self, message: &WechatMessage) {
        let handlers = self.handlers.read().await.clone();
        for (handler_id, handler) in handlers {
            match AssertUnwindSafe(handler.handle(message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    error!(account_id = %self.account_id, %handler_id, error = %e, "message handler failed");
                },
                Err(_) => {
                    error!(account_id = %self.account_id, %handler_id, "message handler panicked");
                },
            }
        }
    }
}

/// Owns every live bot, keyed by account id.
pub struct BotRegistry {
    factory: Arc<dyn BotFactory>,
    bots: RwLock<HashMap<String, Arc<BotContext>>>,
    account_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BotRegistry {
    pub fn new(factory: Arc<dyn BotFactory>) -> Self {
        Self {
            factory,
            bots: RwLock::new(HashMap::new()),
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock serializing create and stop for one account.
    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        Arc::clone(locks.entry(account_id.to_string()).or_default())
    }

    /// Drop the account's lock entry once nobody else holds or waits on it.
    async fn release_account_lock(&self, account_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.account_locks.lock().await;
        // Clones are only handed out under `account_locks`, so the count is
        // stable here: the map and `lock` are the only two holders.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(account_id);
        }
    }

    /// Build, start and register a bot for `account_id`.
    ///
    /// Creates and stops for the same account run one after the other.
    /// Calling this for an account that already has a live bot replaces the
    /// registry entry without stopping the previous bot.
    pub async fn create_wechat_bot(
        &self,
        account_id: &str,
        settings: BotSettings,
    ) -> Result<Arc<BotContext>> {
        let lock = self.account_lock(account_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(account_id, settings).await
        };
        self.release_account_lock(account_id, lock).await;
        result
    }

    async fn create_locked(
        &self,
        account_id: &str,
        settings: BotSettings,
    ) -> Result<Arc<BotContext>> {
        let options = BotOptions {
            account_id: account_id.to_string(),
            name: settings
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("moltbot-wechat-{account_id}")),
            puppet: PuppetSelector::from_config(settings.puppet.as_deref()),
            token: settings.token,
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel::<BotEvent>();
        let on_event: EventCallback = Arc::new(move |event: BotEvent| {
            let _ = event_tx.send(event);
        });

        let bot = self.factory.build(options, on_event).await?;
        let context = Arc::new(BotContext::new(account_id, bot));
        tokio::spawn(dispatch_events(Arc::downgrade(&context), event_rx));

        context.bot.start().await?;

        let previous = self
            .bots
            .write()
            .await
            .insert(account_id.to_string(), Arc::clone(&context));
        if previous.is_some() {
            warn!(account_id, "replaced a live WeChat bot without stopping it");
        }

        info!(account_id, "WeChat bot started");
        Ok(context)
    }

    pub async fn get_wechat_context(&self, account_id: &str) -> Option<Arc<BotContext>> {
        self.bots.read().await.get(account_id).cloned()
    }

    pub async fn account_ids(&self) -> Vec<String> {
        self.bots.read().await.keys().cloned().collect()
    }

    /// Stop and unregister a bot. No-op when the account has none.
    ///
    /// Waits for an in-flight create of the same account. If stopping fails
    /// the bot stays registered.
    pub async fn stop_wechat_bot(&self, account_id: &str) -> Result<()> {
        let lock = self.account_lock(account_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.stop_locked(account_id).await
        };
        self.release_account_lock(account_id, lock).await;
        result
    }

    async fn stop_locked(&self, account_id: &str) -> Result<()> {
        let Some(context) = self.get_wechat_context(account_id).await else {
            debug!(account_id, "no WeChat bot to stop");
            return Ok(());
        };

        context.bot.stop().await?;

        let mut bots = self.bots.write().await;
        // Only remove the entry we stopped; it may have been replaced meanwhile.
        if bots
            .get(account_id)
            .is_some_and(|current| Arc::ptr_eq(current, &context))
        {
            bots.remove(account_id);
        }
        info!(account_id, "WeChat bot stopped");
        Ok(())
    }

    /// Stop every bot concurrently. All stops run to completion; failures are
    /// logged per account and the first one is returned.
    pub async fn stop_all_wechat_bots(&self) -> Result<()> {
        let account_ids = self.account_ids().await;
        let results = join_all(account_ids.iter().map(|id| self.stop_wechat_bot(id))).await;

        let mut first_error = None;
        for (account_id, result) in account_ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(%account_id, error = %e, "failed to stop WeChat bot");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Drain one bot's events in order until the bot goes away.
async fn dispatch_events(context: Weak<BotContext>, mut events: mpsc::UnboundedReceiver<BotEvent>) {
    while let Some(event) = events.recv().await {
        let Some(context) = context.upgrade() else {
            break;
        };
        handle_event(&context, event);
    }
}

fn handle_event(context: &Arc<BotContext>, event: BotEvent) {
    let account_id = context.account_id.as_str();
    match event {
        BotEvent::Message(raw) => {
            if let Some(message) = filter_inbound(raw, unix_now_ms()) {
                let context = Arc::clone(context);
                tokio::spawn(async move { context.notify(&message).await });
            }
        },
        BotEvent::Scan { qrcode, status } => {
            info!(
                account_id,
                status,
                url = %qr_code_url(&qrcode),
                "scan the QR code with WeChat to log in"
            );
        },
        BotEvent::Login { user } => info!(account_id, %user, "WeChat bot logged in"),
        BotEvent::Logout { user } => info!(account_id, %user, "WeChat bot logged out"),
        BotEvent::Error { error } => error!(account_id, %error, "WeChat bot error"),
    }
}

/// Turn a raw `message` event into a [`WechatMessage`], or drop it.
///
/// Only non-empty direct messages containing [`TRIGGER_KEYWORD`] pass.
pub fn filter_inbound(raw: RawMessage, now_ms: i64) -> Option<WechatMessage> {
    if raw.text.trim().is_empty() {
        return None;
    }
    if raw.room_id.is_some() {
        debug!(room_id = ?raw.room_id, "ignoring group message");
        return None;
    }

    debug!(
        from = %raw.talker_name,
        from_id = %raw.talker_id,
        to_id = ?raw.to_id,
        "received direct message"
    );
    if !raw.text.contains(TRIGGER_KEYWORD) {
        debug!(from_id = %raw.talker_id, "message has no trigger keyword, ignoring");
        return None;
    }

    Some(WechatMessage {
        text: raw.text,
        from: raw.talker_name,
        from_id: raw.talker_id,
        to: raw.to_name.unwrap_or_else(|| "Unknown".to_string()),
        to_id: raw.to_id.unwrap_or_else(|| "Unknown".to_string()),
        room: None,
        is_group: false,
        timestamp: raw.timestamp.unwrap_or(now_ms),
    })
}

/// Wechaty's hosted QR image for a login code.
pub fn qr_code_url(qrcode: &str) -> String {
    format!(
        "https://wechaty.js.org/qrcode/{}",
        urlencoding::encode(qrcode)
    )
}

fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
