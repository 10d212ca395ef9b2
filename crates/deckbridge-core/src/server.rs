//! The plugin session manager: a loopback WebSocket server speaking the
//! plugin protocol, one session at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::Bridge;
use crate::events::OutboundReceiver;

/// Keep-alive frame sent on every quiet receive tick.
const HEARTBEAT: &str = r#"{"T":"P"}"#;

enum SessionEnd {
    /// The stop signal fired; shut down without arming the grace timer.
    Stopped,
    /// The plugin went away; arm the grace timer.
    Closed,
}

pub struct PluginServer {
    bridge: Arc<Bridge>,
    heartbeat_timeout: Duration,
    grace_period: Duration,
    grace_timer: Mutex<Option<JoinHandle<()>>>,
}

impl PluginServer {
    pub fn new(bridge: Arc<Bridge>, heartbeat_timeout: Duration, grace_period: Duration) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            heartbeat_timeout,
            grace_period,
            grace_timer: Mutex::new(None),
        })
    }

    pub async fn run(
        self: Arc<Self>,
        port: u16,
        outbound: OutboundReceiver,
        stop: watch::Receiver<bool>,
    ) -> Result<(), anyhow::Error> {
        // Loopback only: the protocol is unauthenticated.
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!("Listening for the plugin on 127.0.0.1:{}", port);
        self.run_on(listener, outbound, stop).await
    }

    pub async fn run_on(
        self: Arc<Self>,
        listener: TcpListener,
        mut outbound: OutboundReceiver,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), anyhow::Error> {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("Failed to accept plugin connection: {}", err);
                            continue;
                        }
                    };
                    debug!("Connection received: {}", peer);
                    self.handle_session(stream, &mut outbound, &mut stop).await;
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        self.cancel_grace_timer();
        info!("Plugin server stopped");
        Ok(())
    }

    async fn handle_session(
        &self,
        stream: TcpStream,
        outbound: &mut OutboundReceiver,
        stop: &mut watch::Receiver<bool>,
    ) {
        // Never panic on a failed handshake: a client can disconnect mid-upgrade.
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!("Failed to complete WebSocket handshake: {}", err);
                return;
            }
        };

        // The plugin is back (or here for the first time): any pending visual
        // reset is off, and it needs to learn about the visible page's buttons.
        self.cancel_grace_timer();
        if let Err(err) = self.bridge.replay_active_page() {
            warn!("Failed to replay bound buttons on connect: {:#}", err);
        }

        match self.session_loop(ws, outbound, stop).await {
            SessionEnd::Stopped => {}
            SessionEnd::Closed => self.start_grace_timer(),
        }
    }

    /// Drive one plugin session. The receive timeout is the only suspension
    /// point, so it doubles as the flush-and-heartbeat cadence: queued
    /// outbound frames must not wait for inbound traffic to arrive.
    async fn session_loop(
        &self,
        mut ws: WebSocketStream<TcpStream>,
        outbound: &mut OutboundReceiver,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Stopped;
                }
                received = timeout(self.heartbeat_timeout, ws.next()) => match received {
                    Err(_elapsed) => {
                        while let Some(message) = outbound.try_next() {
                            debug!("Sending {}", message);
                            if ws.send(Message::text(message)).await.is_err() {
                                return SessionEnd::Closed;
                            }
                        }
                        if ws.send(Message::text(HEARTBEAT)).await.is_err() {
                            return SessionEnd::Closed;
                        }
                    }
                    Ok(Some(Ok(message))) => match message {
                        Message::Text(_) | Message::Binary(_) => {
                            let text = match message.into_text() {
                                Ok(text) => text,
                                Err(_) => continue,
                            };
                            match self.bridge.handle_message(text.as_str()).await {
                                Ok(Some(reply)) => {
                                    debug!("Replying {}", reply);
                                    if ws.send(Message::text(reply)).await.is_err() {
                                        return SessionEnd::Closed;
                                    }
                                }
                                Ok(None) => {}
                                // Deliberate: a malformed frame is dropped and
                                // the session survives.
                                Err(err) => warn!("Dropping inbound message: {:#}", err),
                            }
                        }
                        Message::Close(_) => return SessionEnd::Closed,
                        _ => {}
                    },
                    Ok(Some(Err(err))) => {
                        debug!("Plugin connection errored: {}", err);
                        return SessionEnd::Closed;
                    }
                    Ok(None) => return SessionEnd::Closed,
                },
            }
        }
    }

    /// Arm the visual-reset timer, replacing (and cancelling) any running one.
    fn start_grace_timer(&self) {
        info!(
            "Plugin disconnected; bound buttons reset in {:?} unless it returns",
            self.grace_period
        );
        let bridge = Arc::clone(&self.bridge);
        let grace_period = self.grace_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            bridge.disconnect();
        });

        let mut timer = self.grace_timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    fn cancel_grace_timer(&self) {
        let mut timer = self.grace_timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}
