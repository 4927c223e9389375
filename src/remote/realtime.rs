//! Realtime insert subscription
//!
//! The backend pushes row changes over a Phoenix-channel websocket. We join
//! one channel for `INSERT` on the posts table, keep it alive with
//! heartbeats, and forward each decoded record to the receiver returned by
//! [`subscribe`]. Dropping that receiver closes the socket.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::RemotePost;
use crate::error::RemoteError;

const CHANNEL_TOPIC: &str = "realtime:community-feed";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const BUFFER: usize = 64;

/// Phoenix wire frame
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Frame {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

impl Frame {
    fn text(&self) -> Result<Message, RemoteError> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

fn websocket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0")
}

fn join_frame(access_token: &str, table: &str) -> Frame {
    Frame {
        topic: CHANNEL_TOPIC.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": table }
                ]
            },
            "access_token": access_token,
        }),
        reference: Some("1".to_string()),
    }
}

fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Pull the inserted post out of a server frame, if it carries one.
fn decode_insert(text: &str) -> Option<RemotePost> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?;
    if data.get("type").and_then(Value::as_str) != Some("INSERT") {
        return None;
    }
    match serde_json::from_value(data.get("record")?.clone()) {
        Ok(post) => Some(post),
        Err(e) => {
            debug!(error = %e, "Skipping undecodable realtime record");
            None
        }
    }
}

/// Connect, join the insert channel and start forwarding.
pub(crate) async fn subscribe(
    base_url: &str,
    api_key: &str,
    access_token: &str,
    table: &str,
) -> Result<mpsc::Receiver<RemotePost>, RemoteError> {
    let url = websocket_url(base_url, api_key);
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| RemoteError::Realtime(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    sink.send(join_frame(access_token, table).text()?)
        .await
        .map_err(|e| RemoteError::Realtime(e.to_string()))?;
    info!(table, "Realtime channel joined");

    let (tx, rx) = mpsc::channel(BUFFER);

    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("Realtime receiver dropped, closing socket");
                    break;
                }
                _ = heartbeat.tick() => {
                    let frame = match heartbeat_frame(next_ref).text() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Could not encode heartbeat");
                            break;
                        }
                    };
                    next_ref += 1;
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "Realtime heartbeat failed");
                        break;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(post) = decode_insert(&text) {
                            if tx.send(post).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Realtime socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Realtime socket error");
                        break;
                    }
                }
            }
        }

        let _ = sink.send(Message::Close(None)).await;
    });

    Ok(rx)
}
