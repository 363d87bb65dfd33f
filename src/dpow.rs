//! Client for a pooled work service (DPoW / BoomPoW style).
//!
//! Requests go over one shared websocket and are matched to answers by a
//! numeric `id`. A background task owns the receive loop and reconnects on a
//! fixed delay. While the socket is down, or if it drops mid-request, the
//! request is sent to the service's HTTP endpoint instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::Dpow;
use crate::difficulty;
use crate::error::{Result, WalletError};
use crate::work::PooledWork;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct DpowClient {
    cfg: Dpow,
    base: u64,
    http: reqwest::Client,
    next_id: AtomicU64,
    waiters: Waiters,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    stopped: Arc<AtomicBool>,
    stop: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DpowClient {
    /// Build the client and start the connection task. The first connect is
    /// attempted immediately; failures are retried every `reconnect_secs`.
    pub fn start(cfg: Dpow, base: u64) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs + 5))
            .build()
            .map_err(|e| WalletError::Internal(format!("http client: {e}")))?;
        let client = Arc::new(DpowClient {
            cfg,
            base,
            http,
            next_id: AtomicU64::new(1),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
            task: Mutex::new(None),
        });
        let handle = tokio::spawn(connection_loop(
            client.cfg.ws_url.clone(),
            Duration::from_secs(client.cfg.reconnect_secs),
            client.sink.clone(),
            client.waiters.clone(),
            client.stopped.clone(),
            client.stop.clone(),
        ));
        if let Ok(mut t) = client.task.lock() {
            *t = Some(handle);
        }
        Ok(client)
    }

    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    /// Stop reconnecting and close the socket.
    pub async fn close(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn request_body(&self, hash: &str, multiplier: f64) -> Value {
        let wanted = difficulty::from_multiplier(multiplier, self.base);
        let difficulty = difficulty::adjust(wanted, self.base);
        json!({
            "user": self.cfg.user,
            "api_key": self.cfg.key,
            "hash": hash,
            "timeout": self.cfg.request_timeout_secs,
            "difficulty": format!("{difficulty:016x}"),
        })
    }

    /// `None` means the socket could not carry the request.
    async fn via_socket(&self, mut body: Value) -> Option<Result<String>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        body["id"] = json!(id.to_string());
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().ok()?.insert(id, tx);

        let sent = {
            let mut guard = self.sink.lock().await;
            match guard.as_mut() {
                Some(sink) => sink.send(Message::Text(body.to_string())).await.is_ok(),
                None => false,
            }
        };
        if !sent {
            self.forget(id);
            return None;
        }

        let wait = Duration::from_secs(self.cfg.request_timeout_secs + 5);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(resp)) => Some(parse_answer(&resp)),
            // Sender dropped: the socket closed under us.
            Ok(Err(_)) => None,
            Err(_) => {
                self.forget(id);
                Some(Err(WalletError::Rpc(format!("pooled work timed out after {}s", wait.as_secs()))))
            }
        }
    }

    async fn via_http(&self, body: Value) -> Result<String> {
        let resp: Value = self.http.post(&self.cfg.http_url).json(&body).send().await?.json().await?;
        parse_answer(&resp)
    }

    fn forget(&self, id: u64) {
        if let Ok(mut w) = self.waiters.lock() {
            w.remove(&id);
        }
    }
}

fn parse_answer(resp: &Value) -> Result<String> {
    if let Some(work) = resp.get("work").and_then(Value::as_str) {
        return Ok(work.to_string());
    }
    if resp.get("timeout").is_some() {
        return Err(WalletError::Rpc("pooled work service timed out".into()));
    }
    let err = resp.get("error").and_then(Value::as_str).unwrap_or("malformed answer");
    Err(WalletError::Rpc(err.to_string()))
}

#[async_trait]
impl PooledWork for DpowClient {
    async fn request_work(&self, hash: &str, multiplier: f64) -> Result<String> {
        let body = self.request_body(hash, multiplier);
        if let Some(answer) = self.via_socket(body.clone()).await {
            return answer;
        }
        tracing::debug!(hash, "pooled work socket unavailable, using http");
        self.via_http(body).await
    }
}

async fn connection_loop(
    url: String,
    reconnect: Duration,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    waiters: Waiters,
    stopped: Arc<AtomicBool>,
    stop: Arc<Notify>,
) {
    while !stopped.load(Ordering::SeqCst) {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!(url = %url, "🔌 connected to pooled work service");
                let (tx, mut rx) = ws.split();
                *sink.lock().await = Some(tx);
                loop {
                    let msg = tokio::select! {
                        m = rx.next() => m,
                        _ = stop.notified() => None,
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => dispatch(&waiters, &text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "pooled work socket error");
                            break;
                        }
                    }
                }
                sink.lock().await.take();
                // Wake every waiter so it retries over http.
                if let Ok(mut w) = waiters.lock() {
                    w.clear();
                }
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(
                    url = %url,
                    retry_secs = reconnect.as_secs(),
                    "pooled work socket closed, reconnecting"
                );
            }
            Err(e) => tracing::debug!(url = %url, error = %e, "pooled work reconnect failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            _ = stop.notified() => break,
        }
    }
}

fn dispatch(waiters: &Waiters, text: &str) {
    let Ok(resp) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("unparsable pooled work message");
        return;
    };
    let id = match resp.get("id") {
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    let Some(id) = id else { return };
    let waiter = waiters.lock().ok().and_then(|mut w| w.remove(&id));
    if let Some(tx) = waiter {
        let _ = tx.send(resp);
    }
}
