//! Session protocol driver.
//!
//! Opens one WebSocket connection, performs the two-step handshake
//! (`connected_success`, then `task_start` / `task_started`) and afterwards
//! exposes the connection as a borrowed sender/receiver pair that a synthesis
//! stream uses to exchange `task_continue` messages for audio events.
//!
//! ```text
//! Connecting -> AwaitingConnectAck -> SendingSessionStart -> AwaitingSessionStartAck -> Ready
//!      \______________\___________________\______________________\________> Failed
//! ```

use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::config::SynthesisOptions;
use super::messages::{ClientMessage, ServerEvent, TaskStart};
use crate::core::tts::base::{TTSError, TTSResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handshake progress of a connection being established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    AwaitingConnectAck,
    SendingSessionStart,
    AwaitingSessionStartAck,
    Ready,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::AwaitingConnectAck => "awaiting connected_success",
            Self::SendingSessionStart => "sending task_start",
            Self::AwaitingSessionStartAck => "awaiting task_started",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A connection whose session has been started and that can carry tokens.
pub struct SessionConnection {
    id: u64,
    session_id: Option<String>,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    closed: AtomicBool,
}

impl fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConnection")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionConnection {
    /// Connect and run the session handshake.
    ///
    /// Every failure, including an explicit error event from the service, is
    /// reported as [`TTSError::ConnectionFailed`]. The caller owns the timeout.
    pub async fn open(options: &SynthesisOptions) -> TTSResult<Self> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let mut state = HandshakeState::Connecting;

        let url = options.websocket_url()?;
        debug!("[conn {id}] {state}: {}", url.as_str());

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(TTSError::InvalidConfiguration(format!(
                    "WebSocket URL has no host: {url}"
                )));
            }
        };

        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header(AUTHORIZATION, options.authorization_header())
            .header(USER_AGENT, "minimax-tts/0.1")
            .body(())
            .map_err(|e| TTSError::ConnectionFailed(format!("Failed to create request: {e}")))?;

        let (ws, _response) = connect_async(request).await.map_err(|e| {
            TTSError::ConnectionFailed(format!("Failed to connect to MiniMax WebSocket: {e}"))
        })?;
        let (mut sink, mut stream) = ws.split();

        state = HandshakeState::AwaitingConnectAck;
        debug!("[conn {id}] {state}");
        let session_id = match read_handshake_event(&mut stream, id, state).await? {
            ServerEvent::Connected { session_id } => session_id,
            other => {
                let _ = sink.close().await;
                return Err(handshake_error(id, state, &other));
            }
        };

        state = HandshakeState::SendingSessionStart;
        debug!("[conn {id}] {state}");
        let start = ClientMessage::TaskStart(TaskStart::from_options(options)).to_json()?;
        if let Err(e) = sink.send(Message::Text(start.into())).await {
            warn!("[conn {id}] {}: {e}", HandshakeState::Failed);
            return Err(TTSError::ConnectionFailed(format!(
                "Failed to send task_start: {e}"
            )));
        }

        state = HandshakeState::AwaitingSessionStartAck;
        debug!("[conn {id}] {state}");
        match read_handshake_event(&mut stream, id, state).await? {
            ServerEvent::SessionStarted => {}
            other => {
                let _ = sink.close().await;
                return Err(handshake_error(id, state, &other));
            }
        }

        state = HandshakeState::Ready;
        info!(
            "[conn {id}] {state} (session {})",
            session_id.as_deref().unwrap_or("-")
        );

        Ok(Self {
            id,
            session_id,
            sink,
            stream,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drain frames that arrived while the connection sat idle, without waiting.
    ///
    /// Returns `false` once a close frame, a transport error, end of stream or
    /// an event that ends the session has been seen.
    pub fn check_alive(&mut self) -> bool {
        while !self.is_closed() {
            let Some(next) = self.stream.next().now_or_never() else {
                return true;
            };
            let alive = match next {
                Some(Ok(Message::Text(text))) => match ServerEvent::parse(text.as_str()) {
                    Ok(ServerEvent::Error(api)) => {
                        debug!(
                            "[conn {}] Error event while idle (status {}): {}",
                            self.id, api.status_code, api.message
                        );
                        false
                    }
                    Ok(ServerEvent::SessionFinished) => {
                        debug!("[conn {}] Session finished while idle", self.id);
                        false
                    }
                    Ok(other) => {
                        debug!("[conn {}] Discarding stray {} event", self.id, other.kind());
                        true
                    }
                    Err(e) => {
                        debug!("[conn {}] Discarding malformed frame: {e}", self.id);
                        true
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("[conn {}] Closed by peer while idle: {frame:?}", self.id);
                    false
                }
                Some(Ok(_)) => true,
                Some(Err(e)) => {
                    debug!("[conn {}] Transport error while idle: {e}", self.id);
                    false
                }
                None => false,
            };
            if !alive {
                self.closed.store(true, Ordering::Release);
            }
        }
        false
    }

    /// Borrow the two directions independently so they can be driven concurrently.
    pub fn split(&mut self) -> (SessionSender<'_>, SessionReceiver<'_>) {
        (
            SessionSender {
                id: self.id,
                sink: &mut self.sink,
                closed: &self.closed,
            },
            SessionReceiver {
                id: self.id,
                stream: &mut self.stream,
                closed: &self.closed,
            },
        )
    }

    /// Best-effort `task_finish` followed by a transport close.
    pub async fn close(mut self) -> TTSResult<()> {
        if !self.is_closed() {
            match ClientMessage::TaskFinish.to_json() {
                Ok(finish) => {
                    if let Err(e) = self.sink.send(Message::Text(finish.into())).await {
                        debug!("[conn {}] task_finish not sent: {e}", self.id);
                    }
                }
                Err(e) => debug!("[conn {}] {e}", self.id),
            }
        }
        self.closed.store(true, Ordering::Release);
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                debug!("[conn {}] closed", self.id);
                Ok(())
            }
            Err(e) => Err(TTSError::ConnectionFailed(format!(
                "[conn {}] Failed to close: {e}",
                self.id
            ))),
        }
    }
}

async fn read_handshake_event(
    stream: &mut SplitStream<WsStream>,
    id: u64,
    state: HandshakeState,
) -> TTSResult<ServerEvent> {
    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("[conn {id}] {}: transport error while {state}: {e}", HandshakeState::Failed);
                return Err(TTSError::ConnectionFailed(format!(
                    "Transport error while {state}: {e}"
                )));
            }
            None => {
                warn!("[conn {id}] {}: connection closed while {state}", HandshakeState::Failed);
                return Err(TTSError::ConnectionFailed(format!(
                    "Connection closed while {state}"
                )));
            }
        };

        match message {
            Message::Text(text) => {
                return ServerEvent::parse(text.as_str()).map_err(|e| {
                    TTSError::ConnectionFailed(format!("Malformed frame while {state}: {e}"))
                });
            }
            Message::Close(frame) => {
                warn!("[conn {id}] {}: close frame while {state}: {frame:?}", HandshakeState::Failed);
                return Err(TTSError::ConnectionFailed(format!(
                    "Connection closed while {state}"
                )));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Binary(data) => {
                debug!("[conn {id}] ignoring {} byte binary frame while {state}", data.len());
            }
        }
    }
}

fn handshake_error(id: u64, state: HandshakeState, event: &ServerEvent) -> TTSError {
    warn!("[conn {id}] {}: unexpected {} while {state}", HandshakeState::Failed, event.kind());
    match event {
        ServerEvent::Error(api) => TTSError::ConnectionFailed(format!(
            "Session rejected while {state} (status {}): {}",
            api.status_code, api.message
        )),
        other => TTSError::ConnectionFailed(format!(
            "Unexpected {} event while {state}",
            other.kind()
        )),
    }
}

/// Write half of a ready session.
pub struct SessionSender<'a> {
    id: u64,
    sink: &'a mut SplitSink<WsStream, Message>,
    closed: &'a AtomicBool,
}

impl SessionSender<'_> {
    /// Fire-and-forget `task_continue`. The token is followed by one space so
    /// consecutive sentences do not run together.
    pub async fn send_token(&mut self, token: &str) -> TTSResult<()> {
        let message = ClientMessage::TaskContinue {
            text: format!("{token} "),
        }
        .to_json()?;
        self.sink
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| {
                self.closed.store(true, Ordering::Release);
                TTSError::ConnectionFailed(format!(
                    "[conn {}] Failed to send task_continue: {e}",
                    self.id
                ))
            })
    }
}

/// Read half of a ready session.
pub struct SessionReceiver<'a> {
    id: u64,
    stream: &'a mut SplitStream<WsStream>,
    closed: &'a AtomicBool,
}

impl SessionReceiver<'_> {
    /// Next protocol event, or `Ok(None)` once the transport has closed.
    ///
    /// Control frames are skipped; frames that are not valid JSON are logged
    /// and skipped.
    pub async fn next_event(&mut self) -> TTSResult<Option<ServerEvent>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerEvent::parse(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!("[conn {}] Ignoring malformed frame: {e}", self.id),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("[conn {}] Close frame received: {frame:?}", self.id);
                    self.closed.store(true, Ordering::Release);
                    return Ok(None);
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("[conn {}] Ignoring {} byte binary frame", self.id, data.len());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TTSError::ConnectionFailed(format!(
                        "[conn {}] Receive failed: {e}",
                        self.id
                    )));
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    return Ok(None);
                }
            }
        }
    }
}
