//! Control channel with a persistent connection and automatic reconnection
//!
//! One logical connection to the controller, re-established indefinitely on
//! a fixed delay. The heartbeat timer lives inside the per-connection select
//! loop, so leaving the loop structurally cancels it.

use anyhow::{anyhow, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::identity::SharedIdentity;
use crate::telemetry::StatusCollector;
use warden_shared::state_machine::{ChannelStateMachine, ConnectionState};
use warden_shared::{codec, timing, Envelope, InboundCommand, Outbound};

/// Events emitted by the control channel
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Session established and handshake announcements sent
    Connected,
    /// Session ended; a reconnect follows after the fixed delay
    Disconnected { reason: String },
    /// Failed to establish a session
    ConnectFailed { reason: String },
    /// A decoded command from the controller
    Received(InboundCommand),
}

/// Configuration for the control channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Agent id stamped on every outbound frame
    pub agent_id: String,
    /// Controller WebSocket endpoint
    pub endpoint: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Heartbeat period
    pub heartbeat_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-001".into(),
            endpoint: "ws://127.0.0.1:8080/agent".into(),
            reconnect_delay: Duration::from_millis(timing::RECONNECT_DELAY_MS),
            heartbeat_interval: Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS),
        }
    }
}

pub(crate) enum OutboundFrame {
    Payload(Envelope),
    Flush(oneshot::Sender<()>),
}

/// Clonable sender half of the channel.
///
/// Sends are dropped silently while the transport is down; reports are not
/// buffered across a reconnect and callers must tolerate the loss.
#[derive(Clone)]
pub struct ChannelHandle {
    agent_id: String,
    tx: mpsc::Sender<OutboundFrame>,
    connected: Arc<AtomicBool>,
}

impl ChannelHandle {
    fn new(agent_id: String, tx: mpsc::Sender<OutboundFrame>, connected: Arc<AtomicBool>) -> Self {
        Self {
            agent_id,
            tx,
            connected,
        }
    }

    /// Send a payload if the transport is open, dropping it otherwise
    pub async fn send(&self, payload: Outbound) {
        if !self.connected.load(Ordering::SeqCst) {
            debug!("dropping outbound frame while disconnected");
            return;
        }
        let envelope = Envelope::new(self.agent_id.clone(), payload);
        let _ = self.tx.send(OutboundFrame::Payload(envelope)).await;
    }

    /// Wait until every frame sent so far has been written to the socket
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(OutboundFrame::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// A handle wired to a plain receiver, for exercising handlers in tests
    #[cfg(test)]
    pub(crate) fn test_pair(agent_id: &str) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(100);
        (
            Self::new(agent_id.into(), tx, Arc::new(AtomicBool::new(true))),
            rx,
        )
    }
}

/// Maintains the connection to the controller
pub struct ControlChannel {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    handle: ChannelHandle,
}

impl ControlChannel {
    /// Create the channel and start its connection loop
    pub fn new(
        config: ChannelConfig,
        identity: SharedIdentity,
        collector: Arc<dyn StatusCollector>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);
        let connected = Arc::new(AtomicBool::new(false));

        let handle = ChannelHandle::new(config.agent_id.clone(), outbound_tx, connected.clone());

        tokio::spawn(connection_loop(
            config,
            identity,
            collector,
            outbound_rx,
            event_tx,
            connected,
        ));

        Self { event_rx, handle }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Get a clonable handle for outbound sends
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }
}

/// Build the connect request carrying the three identity headers.
///
/// The secret is read fresh on every attempt so a rotation applies to the
/// next connect, never the live session.
async fn build_request(config: &ChannelConfig, identity: &SharedIdentity) -> Result<Request> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    let identity = identity.read().await.clone();

    let headers = request.headers_mut();
    headers.insert("x-client-type", HeaderValue::from_static("agent"));
    headers.insert("x-agent-id", HeaderValue::from_str(&identity.agent_id)?);
    headers.insert("x-agent-key", HeaderValue::from_str(&identity.shared_secret)?);

    Ok(request)
}

/// Main connection loop: connect, run the session, reconnect after the
/// fixed delay. Unconditional and unbounded.
async fn connection_loop(
    config: ChannelConfig,
    identity: SharedIdentity,
    collector: Arc<dyn StatusCollector>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut fsm = ChannelStateMachine::new();

    loop {
        fsm.transition(ConnectionState::Connecting);

        let attempt = match build_request(&config, &identity).await {
            Ok(request) => connect_async(request).await,
            Err(e) => {
                fsm.transition(ConnectionState::Disconnected);
                error!("invalid connect request: {:#}", e);
                tokio::time::sleep(config.reconnect_delay).await;
                continue;
            }
        };

        match attempt {
            Ok((ws, _response)) => {
                fsm.transition(ConnectionState::Connected);
                connected.store(true, Ordering::SeqCst);
                info!("connected to controller at {}", config.endpoint);
                let _ = event_tx.send(ConnectionEvent::Connected).await;

                let reason = handle_connection(ws, &config, &collector, &mut outbound_rx, &event_tx)
                    .await
                    .map_or_else(|e| e.to_string(), |_| "session ended".to_string());

                connected.store(false, Ordering::SeqCst);
                fsm.transition(ConnectionState::Disconnected);
                drain_pending(&mut outbound_rx);

                warn!("disconnected: {}", reason);
                let _ = event_tx.send(ConnectionEvent::Disconnected { reason }).await;
            }
            Err(e) => {
                fsm.transition(ConnectionState::Disconnected);
                let _ = event_tx
                    .send(ConnectionEvent::ConnectFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

async fn send_frame(sink: &mut WsSink, agent_id: &str, payload: Outbound) -> Result<()> {
    let envelope = Envelope::new(agent_id, payload);
    let text = codec::encode_outbound(&envelope)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

/// Handle one established session until it ends
async fn handle_connection(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &ChannelConfig,
    collector: &Arc<dyn StatusCollector>,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut sink, mut stream): (WsSink, WsStream) = ws.split();

    // Announce the session, then tell the controller to discard any command
    // it still believes is in flight from before a restart
    send_frame(
        &mut sink,
        &config.agent_id,
        Outbound::AgentConnected {
            version: env!("CARGO_PKG_VERSION").into(),
        },
    )
    .await?;
    send_frame(&mut sink, &config.agent_id, Outbound::ClearCommandState).await?;

    let mut heartbeat = interval(config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                match collector.collect_status().await {
                    Ok(snapshot) => {
                        send_frame(
                            &mut sink,
                            &config.agent_id,
                            Outbound::StatusUpdate { status: snapshot },
                        )
                        .await?;
                    }
                    Err(e) => warn!("telemetry collection failed: {:#}", e),
                }
            }

            Some(frame) = outbound_rx.recv() => {
                match frame {
                    OutboundFrame::Payload(envelope) => {
                        let text = codec::encode_outbound(&envelope)?;
                        sink.send(Message::Text(text)).await?;
                    }
                    OutboundFrame::Flush(ack) => {
                        sink.flush().await?;
                        let _ = ack.send(());
                    }
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match codec::decode_inbound(&text) {
                            Ok(command) => {
                                let _ = event_tx.send(ConnectionEvent::Received(command)).await;
                            }
                            Err(e) => {
                                // Malformed frames are reported, never fatal
                                warn!("undecodable frame: {}", e);
                                send_frame(
                                    &mut sink,
                                    &config.agent_id,
                                    Outbound::decode_error(text, e.to_string()),
                                )
                                .await?;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(anyhow!("controller closed the session"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(anyhow!("transport error: {}", e));
                    }
                    None => {
                        return Err(anyhow!("stream ended"));
                    }
                }
            }
        }
    }
}

/// Discard frames queued while the session was going down. Pending flushes
/// are acknowledged; their frames are already lost.
fn drain_pending(outbound_rx: &mut mpsc::Receiver<OutboundFrame>) {
    while let Ok(frame) = outbound_rx.try_recv() {
        if let OutboundFrame::Flush(ack) = frame {
            let _ = ack.send(());
        }
    }
}
