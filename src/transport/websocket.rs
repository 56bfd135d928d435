//! WebSocket messenger.
//!
//! Carries bridge messages as JSON text frames so the pilot, the worker and
//! the launcher may run in different processes.
//!
//! # Connection Flow
//!
//! 1. Launcher binds [`WebSocketListener`] to `localhost:0` (random port)
//! 2. Content script calls [`WebSocketMessenger::connect`] with the URL
//! 3. Launcher calls [`WebSocketListener::accept`] once per content script
//! 4. Both sides run a handshake over the resulting messengers
//!
//! # Event Loop
//!
//! Each messenger spawns a tokio task that handles:
//!
//! - Incoming text frames, parsed and delivered to listeners
//! - Outgoing messages queued by [`Messenger::post_message`]
//! - Shutdown on request, remote close or socket error

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

use super::{ListenerSet, MessageListener, Messenger, Subscription};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for waiting for a content script to connect.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// MessengerCommand
// ============================================================================

/// Internal commands for the event loop.
enum MessengerCommand {
    /// Send a message.
    Send(Value),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// WebSocketMessenger
// ============================================================================

/// Messenger over one WebSocket connection.
///
/// `WebSocketMessenger` is `Send + Sync`; posting never blocks.
pub struct WebSocketMessenger {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<MessengerCommand>,
    /// Listeners fed by the event loop.
    listeners: ListenerSet,
    /// Set once the event loop has terminated.
    closed: Arc<AtomicBool>,
}

impl WebSocketMessenger {
    /// Connects to a WebSocket server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the connection or upgrade fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;

        debug!(url, "WebSocket client connected");
        Ok(Self::from_stream(ws_stream))
    }

    /// Wraps an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let listeners = ListenerSet::new();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            listeners.clone(),
            Arc::clone(&closed),
        ));

        Self {
            command_tx,
            listeners,
            closed,
        }
    }

    /// Returns `true` once the socket is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the socket gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(MessengerCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<MessengerCommand>,
        listeners: ListenerSet,
        closed: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the peer
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            match from_str::<Value>(&text) {
                                Ok(message) => listeners.dispatch(&message),
                                Err(e) => warn!(error = %e, "Failed to parse incoming frame"),
                            }
                        }

                        Some(Ok(Frame::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Messages posted locally
                command = command_rx.recv() => {
                    match command {
                        Some(MessengerCommand::Send(message)) => {
                            let json = match to_string(&message) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize outgoing message");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Frame::Text(json.into())).await {
                                error!(error = %e, "Failed to send frame");
                                break;
                            }
                            trace!("Frame sent");
                        }

                        Some(MessengerCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        closed.store(true, Ordering::Release);
        debug!("WebSocket event loop terminated");
    }
}

impl Messenger for WebSocketMessenger {
    fn post_message(&self, message: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.command_tx
            .send(MessengerCommand::Send(message))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn add_message_listener(&self, listener: MessageListener) -> Subscription {
        self.listeners.add(listener)
    }
}

// ============================================================================
// WebSocketListener
// ============================================================================

/// A WebSocket server accepting content script connections.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let listener = WebSocketListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let url = listener.ws_url();
///
/// // Start the pilot with `url`...
///
/// let pilot_messenger = listener.accept().await?;
/// ```
pub struct WebSocketListener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Port the server is bound to.
    port: u16,
}

impl WebSocketListener {
    /// Binds to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "WebSocket listener bound");

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Binds to `localhost` on a random port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_localhost() -> Result<Self> {
        Self::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Accepts one connection and upgrades it to WebSocket.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nobody connects within 30s
    /// - [`Error::WebSocket`] if the upgrade fails
    pub async fn accept(&self) -> Result<WebSocketMessenger> {
        let (stream, addr) = timeout(ACCEPT_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| Error::timeout("WebSocket accept", ACCEPT_TIMEOUT))??;

        debug!(?addr, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;

        info!(port = self.port, "WebSocket connection established");
        Ok(WebSocketMessenger::from_stream(ws_stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
