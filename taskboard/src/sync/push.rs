//! Push link: one WebSocket connection to the service's event stream.
//!
//! [`WsConnector::connect`] opens `<ws_url>?token=<bearer>`, then spawns a
//! pump task that decodes JSON text frames into [`PushMessage`]s, sends the
//! `ping` keepalive, and reports how the connection ended as a final
//! [`LinkFrame::Closed`]. Reconnecting is the supervisor's job (see
//! [`super::reconnect`]).

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::codec;
use taskboard_proto::event::{PING_FRAME, PushMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use url::Url;

use crate::session::AccessToken;

/// Default interval between keepalive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Close codes the service uses when it refuses the token.
pub const REJECT_CLOSE_CODES: [u16; 2] = [4001, 4002];

/// Capacity of the frame channel between the pump and the supervisor.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Errors that prevent a push link from opening.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    /// The push URL is not a valid `ws://` or `wss://` URL.
    #[error("invalid push URL: {0}")]
    InvalidUrl(String),

    /// The service refused the credentials.
    #[error("push connection rejected ({code}): {reason}")]
    Rejected { code: u16, reason: String },

    /// Network-level failure; worth retrying.
    #[error("push connection failed: {0}")]
    Connect(String),

    /// The handshake did not complete in time.
    #[error("push connection timed out")]
    Timeout,
}

impl PushError {
    /// Whether retrying with the same token could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout)
    }
}

/// Why an open link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal close initiated by either side.
    Clean,
    /// The service closed with a rejection code; the token is no good.
    Rejected { code: u16, reason: String },
    /// The connection dropped unexpectedly.
    Lost(String),
}

/// What the pump hands to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// A decoded event (keepalive replies are filtered out).
    Message(PushMessage),
    /// Always the last frame of a link.
    Closed(CloseReason),
}

/// Opens push links.
///
/// Each successful `connect` returns a receiver that yields decoded frames
/// and ends with [`LinkFrame::Closed`]. Dropping the receiver closes the link.
pub trait PushConnector: Send + Sync + 'static {
    fn connect(
        &self,
        token: &AccessToken,
    ) -> impl Future<Output = Result<mpsc::Receiver<LinkFrame>, PushError>> + Send;
}

/// [`PushConnector`] over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: Url,
    keepalive: Duration,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the push endpoint at `ws_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidUrl`] if `ws_url` does not parse or is
    /// not a `ws`/`wss` URL.
    pub fn new(ws_url: &str) -> Result<Self, PushError> {
        let ws_url = Url::parse(ws_url).map_err(|e| PushError::InvalidUrl(e.to_string()))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(PushError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                ws_url.scheme()
            )));
        }
        Ok(Self {
            ws_url,
            keepalive: DEFAULT_KEEPALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    #[must_use]
    pub const fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The push URL with the token attached.
    fn url_for(&self, token: &AccessToken) -> Url {
        let mut url = self.ws_url.clone();
        url.query_pairs_mut().append_pair("token", token.expose());
        url
    }
}

impl PushConnector for WsConnector {
    async fn connect(&self, token: &AccessToken) -> Result<mpsc::Receiver<LinkFrame>, PushError> {
        let url = self.url_for(token);
        tracing::debug!(url = %self.ws_url, "opening push link");

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| PushError::Timeout)?
                .map_err(map_ws_connect_error)?;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(pump(ws_stream, tx, self.keepalive));
        tracing::info!(url = %self.ws_url, "push link open");
        Ok(rx)
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Moves frames from the socket to `tx` until either side goes away.
async fn pump(ws_stream: WsStream, tx: mpsc::Sender<LinkFrame>, keepalive: Duration) {
    let (mut writer, mut reader) = ws_stream.split();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

    let reason = loop {
        tokio::select! {
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => match codec::decode_push(text.as_str()) {
                    Ok(PushMessage::Pong) => tracing::trace!("pong"),
                    Ok(message) => {
                        if tx.send(LinkFrame::Message(message)).await.is_err() {
                            // Supervisor gone; nobody to report to.
                            let _ = writer.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Err(e) => {
                        // Malformed frame: log and skip, don't disconnect.
                        tracing::warn!(err = %e, "malformed push frame, skipping");
                    }
                },
                Some(Ok(Message::Close(frame))) => break close_reason(frame),
                Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "push link read error");
                    break CloseReason::Lost(e.to_string());
                }
                None => break CloseReason::Lost("stream ended".to_string()),
            },
            _ = ticker.tick() => {
                if let Err(e) = writer.send(Message::text(PING_FRAME)).await {
                    tracing::warn!(err = %e, "keepalive failed");
                    break CloseReason::Lost(e.to_string());
                }
            }
            () = tx.closed() => {
                tracing::debug!("push receiver dropped, closing link");
                let _ = writer.send(Message::Close(None)).await;
                return;
            }
        }
    };

    tracing::info!(?reason, "push link closed");
    let _ = tx.send(LinkFrame::Closed(reason)).await;
}

fn close_reason(frame: Option<CloseFrame>) -> CloseReason {
    let Some(frame) = frame else {
        return CloseReason::Clean;
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    if REJECT_CLOSE_CODES.contains(&code) {
        CloseReason::Rejected { code, reason }
    } else if code == 1000 {
        CloseReason::Clean
    } else {
        CloseReason::Lost(format!("closed with code {code}: {reason}"))
    }
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> PushError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        // A close before accept surfaces as an HTTP error on the upgrade.
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                PushError::Rejected {
                    code: status,
                    reason: "push handshake refused".to_string(),
                }
            } else {
                PushError::Connect(format!("push HTTP error: status {status}"))
            }
        }
        WsError::Url(e) => PushError::InvalidUrl(e.to_string()),
        other => PushError::Connect(other.to_string()),
    }
}
