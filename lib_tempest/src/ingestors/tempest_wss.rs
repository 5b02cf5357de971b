//! # Tempest WSS Ingestor
//!
//! The read task for the WeatherFlow Tempest websocket.
//! Location: lib_tempest/src/ingestors/tempest_wss.rs
//!
//! One call to [`run_session`] owns exactly one websocket for its lifetime:
//! dial, send both subscription requests, announce `Connected`, then read until
//! the socket fails, goes silent past the staleness deadline, or the session is
//! cancelled. It never retries on its own; retry policy belongs to the
//! lifecycle manager that consumes its messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::frames::{decode_frame, Frame, ListenRequest};
use crate::models::{ConnectionErrorKind, LiveMessage};

/// Public Tempest websocket endpoint; the token goes in the query string.
pub const DEFAULT_WSS_URL: &str = "wss://ws.weatherflow.com/swd/data";

/// Staleness deadline re-armed before every read: 11x the ~60s `obs_st` cadence.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(11 * 60);

/// Upper bound on dial, upgrade and both subscription sends together.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

/// Upper bound on sending our Close frame during a deliberate shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Failures of a single session. Converted to text before crossing the channel.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("ws dial: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("ws dial: no handshake within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("ws {request}: {source}")]
    Handshake {
        request: &'static str,
        #[source]
        source: tungstenite::Error,
    },

    #[error("ws encode {request}: {source}")]
    Encode {
        request: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("ws read: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("ws read: no frame received for {0}s")]
    Stale(u64),

    #[error("ws read: connection closed by remote")]
    Closed,
}

impl LiveError {
    pub fn kind(&self) -> ConnectionErrorKind {
        match self {
            LiveError::Dial(_)
            | LiveError::HandshakeTimeout(_)
            | LiveError::Handshake { .. }
            | LiveError::Encode { .. } => {
                ConnectionErrorKind::Setup
            }
            LiveError::Read(_) | LiveError::Stale(_) | LiveError::Closed => {
                ConnectionErrorKind::Transport
            }
        }
    }
}

/// Produces connected websocket streams.
///
/// [`WssDialer`] is the production implementation; tests dial in-memory pipes.
pub trait Dialer: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self) -> BoxFuture<'_, Result<WebSocketStream<Self::Io>, LiveError>>;
}

/// Dials the Tempest websocket over TCP/TLS.
pub struct WssDialer {
    url: Url,
}

impl WssDialer {
    /// Builds the dial URL from a base endpoint and the API token.
    pub fn new(base_url: &str, token: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse_with_params(base_url, &[("token", token)])?;
        Ok(Self { url })
    }

    /// Host being dialed; the URL itself carries the token and is never logged.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("<none>")
    }
}

impl Dialer for WssDialer {
    type Io = MaybeTlsStream<TcpStream>;

    fn dial(&self) -> BoxFuture<'_, Result<WebSocketStream<Self::Io>, LiveError>> {
        Box::pin(async move {
            log::info!("Connecting to Tempest WSS at {}", self.host());
            let (ws_stream, _) = connect_async(self.url.as_str())
                .await
                .map_err(LiveError::Dial)?;
            Ok(ws_stream)
        })
    }
}

/// Everything a session needs besides its dialer.
pub struct SessionContext {
    /// Identifies this session's `Connected` / `ConnectionError` messages.
    pub session: u64,
    pub device_id: u64,
    pub staleness: Duration,
    /// Deadline for [`Dialer::dial`] plus both subscription requests.
    pub handshake_timeout: Duration,
    pub tx: mpsc::UnboundedSender<LiveMessage>,
    pub cancel: CancellationToken,
}

impl SessionContext {
    /// Decodes one payload and forwards recognised telemetry.
    /// Returns `false` once the consumer is gone.
    fn forward(&self, raw: &[u8]) -> bool {
        match decode_frame(raw, Utc::now()) {
            Ok(Frame::Acknowledgement { id }) => {
                log::debug!("Subscription '{}' acknowledged.", id);
                true
            }
            Ok(Frame::Unrecognized { kind }) => {
                log::trace!("Ignoring frame of type '{}'.", kind);
                true
            }
            Ok(frame) => match frame.into_telemetry() {
                Some(event) => self.tx.send(LiveMessage::Telemetry(event)).is_ok(),
                None => true,
            },
            Err(e) => {
                log::trace!("Dropping undecodable frame: {}", e);
                true
            }
        }
    }

    /// Reports a failure upstream, unless the session was deliberately cancelled.
    fn report(&self, error: LiveError) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::warn!("Session {} ended: {}", self.session, error);
        let _ = self.tx.send(LiveMessage::ConnectionError {
            session: self.session,
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

/// Dials and sends both subscription requests.
async fn open<D: Dialer>(
    dialer: &D,
    device_id: u64,
) -> Result<WebSocketStream<D::Io>, LiveError> {
    let mut ws_stream = dialer.dial().await?;

    for request in [
        ListenRequest::listen_start(device_id),
        ListenRequest::listen_rapid_start(device_id),
    ] {
        let text = request.to_json().map_err(|source| LiveError::Encode {
            request: request.kind,
            source,
        })?;
        log::debug!("Sending upstream: {}", text);
        if let Err(source) = ws_stream.send(Message::Text(text.into())).await {
            let _ = timeout(CLOSE_GRACE, ws_stream.close(None)).await;
            return Err(LiveError::Handshake {
                request: request.kind,
                source,
            });
        }
    }

    Ok(ws_stream)
}

/// Runs one session to completion. Spawn this; it never retries.
pub async fn run_session<D: Dialer>(dialer: Arc<D>, ctx: SessionContext) {
    let ws_stream = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return,
        opened = timeout(ctx.handshake_timeout, open(dialer.as_ref(), ctx.device_id)) => match opened {
            Ok(Ok(ws_stream)) => ws_stream,
            Err(_) => {
                ctx.report(LiveError::HandshakeTimeout(ctx.handshake_timeout));
                return;
            }
            Ok(Err(e)) => {
                ctx.report(e);
                return;
            }
        },
    };

    if ctx.tx.send(LiveMessage::Connected { session: ctx.session }).is_err() {
        return;
    }
    log::info!("Session {} subscribed for device {}.", ctx.session, ctx.device_id);

    read_loop(ws_stream, &ctx).await;
}

async fn read_loop<S>(mut ws_stream: WebSocketStream<S>, ctx: &SessionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                log::debug!("Session {} cancelled, closing websocket.", ctx.session);
                let _ = timeout(CLOSE_GRACE, ws_stream.close(None)).await;
                return;
            }
            next = timeout(ctx.staleness, ws_stream.next()) => next,
        };

        let error = match next {
            Ok(Some(Ok(Message::Text(text)))) => {
                if !ctx.forward(text.as_str().as_bytes()) {
                    return;
                }
                continue;
            }
            Ok(Some(Ok(Message::Binary(bin)))) => {
                if !ctx.forward(&bin) {
                    return;
                }
                continue;
            }
            // Ping/Pong are answered by tungstenite; a Close frame is followed by end of stream.
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => LiveError::Read(e),
            Ok(None) => LiveError::Closed,
            Err(_) => LiveError::Stale(ctx.staleness.as_secs()),
        };

        ctx.report(error);
        return;
    }
}
