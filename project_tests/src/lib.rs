//! # Live Pipeline Test Harness
//!
//! An in-memory stand-in for the Tempest websocket. [`ScriptedDialer`] plays
//! one [`Script`] per dial: refuse the dial, hang up right after the upgrade,
//! or accept it over a `tokio::io::duplex` pipe and run a tiny websocket
//! server on the other end that records the subscription requests and serves
//! canned frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use lib_tempest::core::LiveSettings;
use lib_tempest::ingestors::{Dialer, LiveError};
use serde_json::json;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{accept_async, client_async, WebSocketStream};

pub const DEVICE_ID: u64 = 4242;

/// What the far end does after sending its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Then {
    /// Keep the socket open until the client leaves.
    Hold,
    /// Close from the server side.
    Close,
}

#[derive(Debug, Clone)]
pub enum Script {
    Refuse,
    /// Complete the upgrade, then drop the server end before any request arrives.
    DropAfterAccept,
    Serve { frames: Vec<String>, then: Then },
}

impl Script {
    pub fn serve(frames: Vec<String>) -> Self {
        Script::Serve {
            frames,
            then: Then::Hold,
        }
    }

    pub fn silent() -> Self {
        Script::serve(Vec::new())
    }

    pub fn close_after(frames: Vec<String>) -> Self {
        Script::Serve {
            frames,
            then: Then::Close,
        }
    }
}

/// Dialer driven by a queue of scripts; refuses once the queue is empty.
#[derive(Default)]
pub struct ScriptedDialer {
    scripts: Mutex<VecDeque<Script>>,
    dials: AtomicUsize,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    client_closed: Arc<AtomicBool>,
}

impl ScriptedDialer {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Subscription requests received by every served session, in order.
    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().unwrap().clone()
    }

    /// The client sent a Close frame or dropped the pipe on a held session.
    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse)
    }
}

impl Dialer for ScriptedDialer {
    type Io = DuplexStream;

    fn dial(&self) -> BoxFuture<'_, Result<WebSocketStream<Self::Io>, LiveError>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script();
        let requests = Arc::clone(&self.requests);
        let client_closed = Arc::clone(&self.client_closed);

        Box::pin(async move {
            let (client_io, server_io) = tokio::io::duplex(64 * 1024);
            match script {
                Script::Refuse => {
                    return Err(LiveError::Dial(tungstenite::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ))));
                }
                Script::DropAfterAccept => {
                    let (dropped_tx, dropped_rx) = oneshot::channel();
                    tokio::spawn(async move {
                        let _ = accept_async(server_io).await;
                        let _ = dropped_tx.send(());
                    });
                    let ws_stream = upgrade(client_io).await?;
                    // Hand the stream over only once the far end is gone, so
                    // the first write fails with a broken pipe.
                    let _ = dropped_rx.await;
                    return Ok(ws_stream);
                }
                Script::Serve { frames, then } => {
                    tokio::spawn(serve(server_io, frames, then, requests, client_closed));
                }
            }
            upgrade(client_io).await
        })
    }
}

async fn upgrade(io: DuplexStream) -> Result<WebSocketStream<DuplexStream>, LiveError> {
    let (ws_stream, _) = client_async("ws://tempest.test/swd/data", io)
        .await
        .map_err(LiveError::Dial)?;
    Ok(ws_stream)
}

async fn serve(
    io: DuplexStream,
    frames: Vec<String>,
    then: Then,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    client_closed: Arc<AtomicBool>,
) {
    let Ok(mut ws) = accept_async(io).await else {
        return;
    };

    // Both listen requests arrive before any data flows.
    for _ in 0..2 {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(value) = serde_json::from_str(text.as_str()) {
                    requests.lock().unwrap().push(value);
                }
            }
            _ => return,
        }
    }

    for frame in frames {
        if ws.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    match then {
        Then::Close => {
            let _ = ws.close(None).await;
            // Drain until the client acknowledges.
            while let Some(Ok(_)) = ws.next().await {}
        }
        Then::Hold => {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            client_closed.store(true, Ordering::SeqCst);
        }
    }
}

/// Millisecond-scale timings so the suite runs quickly.
pub fn fast_settings() -> LiveSettings {
    LiveSettings {
        reconnect_delay: Duration::from_millis(20),
        max_attempts: 5,
        staleness: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(5),
        tick_interval: Duration::from_millis(50),
    }
}

pub fn obs_frame(epoch: u64, temperature: f64) -> String {
    json!({
        "type": "obs_st",
        "device_id": DEVICE_ID,
        "obs": [[epoch, 0.5, 1.2, 2.0, 180, 3, 1013.2, temperature, 55, 12000, 2, 150, 0.0, 0, 0, 0, 2.6, 60, 0.0]]
    })
    .to_string()
}

pub fn rapid_wind_frame(epoch: u64, speed: f64, direction: u16) -> String {
    json!({
        "type": "rapid_wind",
        "device_id": DEVICE_ID,
        "ob": [epoch, speed, direction]
    })
    .to_string()
}

pub fn strike_frame(epoch: u64, distance_km: f64) -> String {
    json!({
        "type": "evt_strike",
        "device_id": DEVICE_ID,
        "evt": [epoch, distance_km, 3848]
    })
    .to_string()
}

pub fn precip_frame(epoch: u64) -> String {
    json!({
        "type": "evt_precip",
        "device_id": DEVICE_ID,
        "evt": [epoch]
    })
    .to_string()
}

pub fn ack_frame(id: &str) -> String {
    json!({ "type": "ack", "id": id }).to_string()
}
