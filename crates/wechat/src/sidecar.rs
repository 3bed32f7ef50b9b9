//! WebSocket communication with the Wechaty sidecar.
//!
//! Each account gets its own connection, and the sidecar runs one Wechaty
//! instance per connection. Requests carry a `requestId` and are answered by
//! a `result` frame; everything else the sidecar sends is a bot event.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    secrecy::ExposeSecret,
    tokio::sync::{Mutex, RwLock, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use crate::{
    bot::{BotEvent, BotFactory, BotOptions, Contact, EventCallback, FileBox, WechatBot},
    error::{Result, WechatError},
    types::{BridgeCommand, BridgeRequest, SidecarMessage},
};

/// Default sidecar WebSocket URL.
pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:9877";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful reply to a bridge request.
#[derive(Debug, Default)]
struct BridgeReply {
    contact: Option<Contact>,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<BridgeReply>>>>>;

/// Handle for communicating with the sidecar.
#[derive(Clone)]
pub struct SidecarHandle {
    /// Sender for outgoing requests to the sidecar.
    tx: mpsc::Sender<BridgeRequest>,
    /// Requests waiting for a `result` frame.
    pending: PendingMap,
    /// Connection state.
    connected: Arc<RwLock<bool>>,
    timeout: Duration,
}

impl SidecarHandle {
    /// Check if connected to the sidecar.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a command and wait for its result.
    async fn request(&self, command: BridgeCommand) -> Result<BridgeReply> {
        let request_id = Uuid::new_v4().to_string();
        let action = command.action();

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        // The reader flips `connected` before clearing `pending`, so checking
        // after registering means a disconnect either drops our sender or is
        // seen here.
        if !self.is_connected().await {
            self.pending.lock().await.remove(&request_id);
            return Err(WechatError::NotConnected);
        }

        debug!(request_id, action, "sending request to sidecar");
        let request = BridgeRequest {
            request_id: request_id.clone(),
            command,
        };
        if self.tx.send(request).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(WechatError::NotConnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(WechatError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(WechatError::Timeout {
                    action: action.to_string(),
                })
            },
        }
    }
}

/// Connect to the sidecar and spawn reader/writer tasks.
pub async fn connect_to_sidecar(url: &str, on_event: EventCallback) -> Result<SidecarHandle> {
    info!(url, "connecting to WeChat sidecar");

    let (ws_stream, _) = connect_async(url).await?;

    info!(url, "connected to WeChat sidecar");

    let (mut write, mut read) = ws_stream.split();

    // Channel for outgoing requests.
    let (tx, mut rx) = mpsc::channel::<BridgeRequest>(32);

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(RwLock::new(true));
    let pending_reader = Arc::clone(&pending);
    let connected_reader = Arc::clone(&connected);
    let connected_writer = Arc::clone(&connected);

    // Spawn reader task.
    tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<SidecarMessage>(&text) {
                    Ok(msg) => handle_sidecar_message(msg, &pending_reader, &on_event).await,
                    Err(e) => {
                        warn!(error = %e, text = %text, "failed to parse sidecar message");
                    },
                },
                Ok(Message::Close(_)) => {
                    info!("sidecar connection closed");
                    break;
                },
                Ok(_) => {}, // Ignore ping/pong/binary
                Err(e) => {
                    error!(error = %e, "WebSocket read error");
                    break;
                },
            }
        }

        *connected_reader.write().await = false;
        // Dropping the senders fails every in-flight request with NotConnected.
        let abandoned = {
            let mut pending = pending_reader.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            debug!(count = abandoned, "cleared pending sidecar requests on disconnect");
        }
    });

    // Spawn writer task.
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match serde_json::to_string(&request) {
                Ok(json) => {
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        error!(error = %e, "failed to send message to sidecar");
                        break;
                    }
                },
                Err(e) => {
                    error!(error = %e, "failed to serialize message");
                },
            }
        }

        let _ = write.close().await;
        *connected_writer.write().await = false;
    });

    Ok(SidecarHandle {
        tx,
        pending,
        connected,
        timeout: REQUEST_TIMEOUT,
    })
}

async fn handle_sidecar_message(
    msg: SidecarMessage,
    pending: &PendingMap,
    on_event: &EventCallback,
) {
    match msg {
        SidecarMessage::Result {
            request_id,
            success,
            error,
            contact,
        } => {
            let Some(tx) = pending.lock().await.remove(&request_id) else {
                warn!(request_id, "sidecar result for unknown request (timed out?)");
                return;
            };
            let reply = if success {
                Ok(BridgeReply { contact })
            } else {
                Err(WechatError::Sidecar(
                    error.unwrap_or_else(|| "unknown error".to_string()),
                ))
            };
            let _ = tx.send(reply);
        },
        SidecarMessage::Message(raw) => on_event(BotEvent::Message(raw)),
        SidecarMessage::Scan { qrcode, status } => on_event(BotEvent::Scan { qrcode, status }),
        SidecarMessage::Login { user } => on_event(BotEvent::Login { user }),
        SidecarMessage::Logout { user } => on_event(BotEvent::Logout { user }),
        SidecarMessage::Error { error } => on_event(BotEvent::Error { error }),
    }
}

/// A bot backed by a Wechaty instance in the sidecar.
pub struct SidecarBot {
    options: BotOptions,
    handle: SidecarHandle,
}

impl SidecarBot {
    pub fn new(options: BotOptions, handle: SidecarHandle) -> Self {
        Self { options, handle }
    }
}

#[async_trait]
impl WechatBot for SidecarBot {
    async fn start(&self) -> Result<()> {
        info!(
            account_id = %self.options.account_id,
            name = %self.options.name,
            puppet = self.options.puppet.as_str(),
            "starting wechaty bot"
        );
        self.handle
            .request(BridgeCommand::Start {
                name: self.options.name.clone(),
                puppet: self.options.puppet.as_str().to_string(),
                token: self
                    .options
                    .token
                    .as_ref()
                    .map(|t| t.expose_secret().clone()),
            })
            .await
            .map(|_| ())
    }

    async fn stop(&self) -> Result<()> {
        self.handle.request(BridgeCommand::Stop).await.map(|_| ())
    }

    async fn find_contact(&self, contact_id: &str) -> Result<Option<Contact>> {
        let reply = self
            .handle
            .request(BridgeCommand::FindContact {
                contact_id: contact_id.to_string(),
            })
            .await?;
        Ok(reply.contact)
    }

    async fn say_text(&self, contact: &Contact, text: &str) -> Result<()> {
        self.handle
            .request(BridgeCommand::SayText {
                contact_id: contact.id.clone(),
                text: text.to_string(),
            })
            .await
            .map(|_| ())
    }

    async fn say_file(&self, contact: &Contact, file: FileBox) -> Result<()> {
        self.handle
            .request(BridgeCommand::SayFile {
                contact_id: contact.id.clone(),
                file,
            })
            .await
            .map(|_| ())
    }
}

/// Builds [`SidecarBot`]s, one sidecar connection per account.
#[derive(Debug, Clone)]
pub struct SidecarBotFactory {
    url: String,
    timeout: Duration,
}

impl SidecarBotFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for SidecarBotFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SIDECAR_URL)
    }
}

#[async_trait]
impl BotFactory for SidecarBotFactory {
    async fn build(
        &self,
        options: BotOptions,
        on_event: EventCallback,
    ) -> Result<Arc<dyn WechatBot>> {
        let handle = connect_to_sidecar(&self.url, on_event)
            .await?
            .with_timeout(self.timeout);
        Ok(Arc::new(SidecarBot::new(options, handle)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use {
        serde_json::{Value, json},
        tokio::net::TcpListener,
        tokio_tungstenite::accept_async,
    };

    use {super::*, crate::bot::PuppetSelector};

    fn options() -> BotOptions {
        BotOptions {
            account_id: "default".into(),
            name: "moltbot-wechat-default".into(),
            puppet: PuppetSelector::Wechat4u,
            token: None,
        }
    }

    /// Loopback sidecar: answers every request with `reply(request)` and
    /// pushes `events` right after the connection opens.
    async fn spawn_sidecar<F>(events: Vec<Value>, reply: F) -> (String, Arc<StdMutex<Vec<Value>>>)
    where
        F: Fn(&Value) -> Option<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_server = Arc::clone(&seen);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for event in events {
                ws.send(Message::Text(event.to_string().into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                seen_server.lock().unwrap().push(request.clone());
                match reply(&request) {
                    Some(response) => {
                        ws.send(Message::Text(response.to_string().into()))
                            .await
                            .unwrap();
                    },
                    None => break,
                }
            }
        });

        (url, seen)
    }

    fn ok(request: &Value) -> Value {
        json!({ "type": "result", "requestId": request["requestId"], "success": true })
    }

    #[tokio::test]
    async fn start_sends_puppet_and_name() {
        let (url, seen) = spawn_sidecar(Vec::new(), |r| Some(ok(r))).await;
        let bot = SidecarBotFactory::new(url)
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await
            .unwrap();

        bot.start().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["type"], "start");
        assert_eq!(seen[0]["name"], "moltbot-wechat-default");
        assert_eq!(seen[0]["puppet"], "wechat-puppet-wechat4u");
    }

    #[tokio::test]
    async fn find_contact_returns_contact_or_none() {
        let (url, _) = spawn_sidecar(Vec::new(), |r| {
            let contact = if r["contactId"] == "wxid_a" {
                json!({ "id": "wxid_a", "name": "Alice" })
            } else {
                Value::Null
            };
            Some(json!({
                "type": "result",
                "requestId": r["requestId"],
                "success": true,
                "contact": contact
            }))
        })
        .await;
        let bot = SidecarBotFactory::new(url)
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await
            .unwrap();

        let found = bot.find_contact("wxid_a").await.unwrap().unwrap();
        assert_eq!(found.name, "Alice");
        assert!(bot.find_contact("wxid_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_result_is_sidecar_error() {
        let (url, _) = spawn_sidecar(Vec::new(), |r| {
            Some(json!({
                "type": "result",
                "requestId": r["requestId"],
                "success": false,
                "error": "not logged in"
            }))
        })
        .await;
        let bot = SidecarBotFactory::new(url)
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await
            .unwrap();

        let contact = Contact {
            id: "wxid_a".into(),
            name: String::new(),
        };
        let err = bot.say_text(&contact, "hi").await.unwrap_err();
        assert!(matches!(err, WechatError::Sidecar(ref m) if m == "not logged in"));
    }

    #[tokio::test]
    async fn events_reach_callback() {
        let events = vec![
            json!({ "type": "scan", "qrcode": "https://login.weixin.qq.com/l/abc", "status": 2 }),
            json!({ "type": "message", "talkerId": "wxid_a", "talkerName": "Alice", "text": "hi" }),
        ];
        let (url, _) = spawn_sidecar(events, |r| Some(ok(r))).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<BotEvent>();
        let callback: EventCallback = Arc::new(move |event: BotEvent| {
            let _ = tx.send(event);
        });
        let _bot = SidecarBotFactory::new(url)
            .build(options(), callback)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BotEvent::Scan { status: 2, .. }));
        let BotEvent::Message(raw) = rx.recv().await.unwrap() else {
            panic!("expected message event");
        };
        assert_eq!(raw.talker_name, "Alice");
        assert_eq!(raw.text, "hi");
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests() {
        // The sidecar hangs up instead of answering.
        let (url, _) = spawn_sidecar(Vec::new(), |_| None).await;
        let bot = SidecarBotFactory::new(url)
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await
            .unwrap();

        let err = bot.stop().await.unwrap_err();
        assert!(matches!(err, WechatError::NotConnected));
    }

    #[tokio::test]
    async fn request_after_disconnect_fails_fast() {
        // Writer still alive, reader already gone.
        let (tx, _rx) = mpsc::channel(1);
        let handle = SidecarHandle {
            tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(RwLock::new(false)),
            timeout: Duration::from_secs(30),
        };

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            handle.request(BridgeCommand::Stop),
        )
        .await
        .expect("request waited for the full timeout");
        assert!(matches!(result, Err(WechatError::NotConnected)));
        assert!(handle.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Read and ignore everything.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let bot = SidecarBotFactory::new(url)
            .with_timeout(Duration::from_millis(50))
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await
            .unwrap();

        let err = bot.start().await.unwrap_err();
        assert!(matches!(err, WechatError::Timeout { ref action } if action == "start"));
    }

    #[tokio::test]
    async fn connect_failure_is_websocket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = SidecarBotFactory::new(url)
            .build(options(), Arc::new(|_: BotEvent| {}))
            .await;
        assert!(matches!(result, Err(WechatError::WebSocket(_))));
    }
}
