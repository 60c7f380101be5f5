//! Event delivery: a bare gateway session whose only job is to notice messages
//! the account sends while a purge is running.

use crate::model::Snowflake;
use crate::pause::PauseHandle;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Whether this is a MESSAGE_CREATE authored by `self_id`.
    pub fn is_message_from(&self, self_id: Snowflake) -> bool {
        if self.op != OP_DISPATCH || self.t.as_deref() != Some("MESSAGE_CREATE") {
            return false;
        }
        let author = &self.d["author"]["id"];
        let author_id = match author {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        };
        author_id == Some(self_id)
    }
}

pub struct GatewaySession {
    url: String,
    token: String,
    self_id: Snowflake,
    pause: PauseHandle,
}

impl GatewaySession {
    pub fn new(url: String, token: String, self_id: Snowflake, pause: PauseHandle) -> Self {
        Self {
            url,
            token,
            self_id,
            pause,
        }
    }

    fn observe(&self, payload: &GatewayPayload) {
        if payload.is_message_from(self.self_id) {
            debug!("Gateway: self-authored message observed");
            self.pause.signal();
        }
    }

    /// Keeps a session open until cancelled, reconnecting after failures.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Gateway: listening for self activity");
        loop {
            match self.connect_once(&cancel).await {
                Ok(()) => break,
                Err(e) => warn!("Gateway: session ended: {}", e),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            debug!("Gateway: reconnecting");
        }
        debug!("Gateway: stopped");
    }

    async fn connect_once(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload: GatewayPayload = serde_json::from_str(&text)?;
                    if payload.op == OP_HELLO {
                        break payload;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("connection closed before hello"),
            }
        };
        let interval_ms = hello.d["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("hello without heartbeat interval"))?;

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "purgecord",
                    "device": "purgecord",
                },
            },
        });
        sink.send(WsMessage::Text(identify.to_string())).await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        let mut seq: Option<u64> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let beat = json!({ "op": OP_HEARTBEAT, "d": seq });
                    sink.send(WsMessage::Text(beat.to_string())).await?;
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            anyhow::bail!("closed by server: {:?}", frame)
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => anyhow::bail!("connection closed"),
                    };
                    let payload: GatewayPayload = match serde_json::from_str(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            debug!("Gateway: skipping undecodable payload: {}", e);
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        seq = payload.s;
                    }
                    match payload.op {
                        OP_HEARTBEAT => {
                            let beat = json!({ "op": OP_HEARTBEAT, "d": seq });
                            sink.send(WsMessage::Text(beat.to_string())).await?;
                        }
                        OP_RECONNECT => anyhow::bail!("server requested reconnect"),
                        OP_INVALID_SESSION => anyhow::bail!("session invalidated"),
                        _ => self.observe(&payload),
                    }
                }
            }
        }
    }
}
