//! WebSocket endpoint carrying the media stream, one connection per
//! call.
//!
//! Inbound JSON events drive a [`CallSession`]; outbound events flow
//! through a channel-backed [`MediaSink`] to the socket writer so the
//! session never blocks on the wire. The session is destroyed on
//! `stop` or socket close; there are no other exit paths.

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::gateway::AiGateway;
use crate::session::CallSession;
use crate::transport::MediaSink;
use crate::transport::protocol::{InboundEvent, OutboundEvent, decode_payload};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared handles every connection needs.
#[derive(Clone)]
struct AppState {
    config: Arc<CallConfig>,
    gateway: Arc<dyn AiGateway>,
}

/// Serve the media stream endpoint until the listener fails.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or the listener
/// cannot be created.
pub async fn serve(config: Arc<CallConfig>, gateway: Arc<dyn AiGateway>) -> Result<()> {
    let bind_addr = config.server.bind_addr.clone();
    let app = Router::new()
        .route("/media", get(media_upgrade))
        .with_state(AppState { config, gateway });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "media stream endpoint listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| CallError::Transport(format!("server error: {e}")))
}

async fn media_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Outbound half of the socket: serializes events and forwards them to
/// the writer task. Marks itself closed on the first send failure so
/// every later send is a silent no-op.
struct WsMediaSink {
    tx: mpsc::UnboundedSender<Message>,
    open: AtomicBool,
}

impl MediaSink for WsMediaSink {
    fn send(&self, event: OutboundEvent) {
        if !self.is_open() {
            return;
        }
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "dropping unencodable outbound event");
                return;
            }
        };
        if self.tx.send(Message::Text(json.into())).is_err() {
            self.open.store(false, Ordering::Relaxed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut writer, mut reader) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let sink = Arc::new(WsMediaSink {
        tx,
        open: AtomicBool::new(true),
    });

    // Writer task: drains the outbound channel onto the socket.
    let writer_sink = Arc::clone(&sink);
    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if writer.send(message).await.is_err() {
                writer_sink.open.store(false, Ordering::Relaxed);
                break;
            }
        }
    });

    let mut session: Option<CallSession> = None;
    while let Some(message) = reader.next().await {
        let Ok(message) = message else { break };
        let Message::Text(raw) = message else {
            continue;
        };
        let event: InboundEvent = match serde_json::from_str(&raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "ignoring malformed media stream frame");
                continue;
            }
        };
        match event {
            InboundEvent::Start { stream_sid, start } => {
                if session.is_some() {
                    warn!("duplicate start event, ignoring");
                    continue;
                }
                if let Some(format) = &start.media_format {
                    debug!(
                        encoding = %format.encoding,
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        "media format"
                    );
                }
                let new_session = CallSession::new(
                    Arc::clone(&state.config),
                    Arc::clone(&state.gateway),
                    Arc::clone(&sink) as Arc<dyn MediaSink>,
                    stream_sid,
                    &start.call_sid,
                );
                let greeter = new_session.clone();
                tokio::spawn(async move {
                    greeter.start().await;
                });
                session = Some(new_session);
            }
            InboundEvent::Media { media } => {
                if let Some(session) = &session {
                    session.handle_media(decode_payload(&media));
                }
            }
            InboundEvent::Mark { mark } => {
                if let Some(session) = &session {
                    session.handle_mark(&mark.name);
                }
            }
            InboundEvent::Stop => break,
        }
    }

    sink.open.store(false, Ordering::Relaxed);
    if let Some(session) = session {
        session.stop();
    }
    writer_task.abort();
}
