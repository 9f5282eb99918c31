//! WebSocket transport.
//!
//! One background task owns the socket. It reconnects forever with a fixed
//! delay and reports every session boundary as a [`TransportEvent`], so the
//! multiplexer can resubscribe. Control frames queued while offline are
//! discarded on reconnect; the `Connected` resubscription supersedes them.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::multiplexer::Transport;
use crate::protocol::{decode_inbound, ControlFrame, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the connection task. Dropping it shuts the task down.
pub struct WsTransport {
    outgoing: mpsc::Sender<ControlFrame>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Spawn the connection task.
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields `Connected`, `Data` and `Disconnected` events until the
    /// transport is closed.
    pub fn connect(config: &SyncConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (out_tx, out_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = ConnectionTask {
            url: config.server_url.clone(),
            reconnect_delay: config.reconnect_delay(),
            outgoing: out_rx,
            events: event_tx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(task.run());

        (
            Self {
                outgoing: out_tx,
                shutdown: shutdown_tx,
            },
            event_rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.outgoing.is_closed()
    }
}

impl Transport for WsTransport {
    fn emit(&mut self, frame: ControlFrame) -> SyncResult<()> {
        self.outgoing.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => SyncError::Transport(format!(
                "outgoing queue full, dropped {} for {}",
                frame.event_name(),
                frame.entity_key()
            )),
            TrySendError::Closed(_) => SyncError::ConnectionClosed,
        })
    }

    fn close(&mut self) {
        self.shutdown.send_replace(true);
    }
}

enum SessionEnd {
    Lost(String),
    Shutdown,
}

struct ConnectionTask {
    url: String,
    reconnect_delay: std::time::Duration,
    outgoing: mpsc::Receiver<ControlFrame>,
    events: mpsc::Sender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let attempt = tokio::select! {
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
                _ = self.shutdown.changed() => break,
            };

            match attempt {
                Ok((socket, _)) => {
                    log::info!("Connected to {}", self.url);
                    let mut stale = 0;
                    while self.outgoing.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        log::debug!("Discarded {stale} control frame(s) queued while offline");
                    }

                    if self.events.send(TransportEvent::Connected).await.is_err() {
                        break;
                    }
                    match self.session(socket).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            log::warn!("Connection to {} lost: {reason}", self.url);
                            let event = TransportEvent::Disconnected { reason };
                            if self.events.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => log::warn!("Failed to connect to {}: {e}", self.url),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        log::info!("Transport to {} shut down", self.url);
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut source) = socket.split();

        loop {
            tokio::select! {
                frame = self.outgoing.recv() => {
                    let Some(frame) = frame else {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    };
                    log::debug!("Sending {} for {}", frame.event_name(), frame.entity_key());
                    if let Err(e) = sink.send(Message::Text(frame.encode().into())).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => match decode_inbound(text.as_str()) {
                        Ok(Some(frame)) => {
                            if self.events.send(TransportEvent::Data(frame)).await.is_err() {
                                let _ = sink.close().await;
                                return SessionEnd::Shutdown;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => log::warn!("Dropping undecodable frame: {e}"),
                    },
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|c| c.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SessionEnd::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("stream ended".to_string()),
                },
                _ = self.shutdown.changed() => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
