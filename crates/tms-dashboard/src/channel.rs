use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tms_core::stream_ipc::{
    decode_message, encode_namespace_connect, encode_pong, FRAME_UPDATE_EVENT,
};
use tms_core::{ChannelProtocol, ConnectivityState, FrameEvent, InboundMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub url: Url,
    pub protocol: ChannelProtocol,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Depth of the event queue before sends start waiting on the consumer.
    pub capacity: usize,
}

impl ChannelConfig {
    pub fn new(url: Url, protocol: ChannelProtocol) -> Self {
        Self {
            url,
            protocol,
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(10),
            capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    Frame(FrameEvent),
}

/// Persistent push channel to the analysis server.
///
/// Events are delivered in server order on the receiver returned by
/// [`EventChannelClient::new`]. Reconnects restore connectivity only.
pub struct EventChannelClient {
    config: ChannelConfig,
    events: mpsc::Sender<ChannelEvent>,
    connectivity: Arc<watch::Sender<ConnectivityState>>,
    connectivity_rx: watch::Receiver<ConnectivityState>,
    task: Option<JoinHandle<()>>,
}

impl EventChannelClient {
    pub fn new(config: ChannelConfig) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::channel(config.capacity.max(1));
        let (connectivity, connectivity_rx) = watch::channel(ConnectivityState::Disconnected);
        let client = Self {
            config,
            events,
            connectivity: Arc::new(connectivity),
            connectivity_rx,
            task: None,
        };
        (client, events_rx)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Starts the connection loop unless it is already running.
    pub fn connect(&mut self) {
        if self
            .task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
        {
            return;
        }
        info!(
            event = "channel_connect",
            url = %self.config.url,
            protocol = %self.config.protocol
        );
        self.task = Some(tokio::spawn(channel_loop(
            self.config.clone(),
            self.events.clone(),
            self.connectivity.clone(),
        )));
    }

    pub async fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        let _ = task.await;
        let was_connected = self
            .connectivity
            .send_replace(ConnectivityState::Disconnected)
            .is_connected();
        if was_connected {
            let _ = self
                .events
                .send(ChannelEvent::Disconnected {
                    reason: "client disconnect".to_string(),
                })
                .await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        *self.connectivity_rx.borrow()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity_rx.clone()
    }
}

impl Drop for EventChannelClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum ConnectionEnd {
    NeverConnected(String),
    Lost(String),
    ConsumerGone,
}

async fn channel_loop(
    config: ChannelConfig,
    events: mpsc::Sender<ChannelEvent>,
    connectivity: Arc<watch::Sender<ConnectivityState>>,
) {
    let mut backoff = config.reconnect_initial;
    loop {
        match run_connection(&config, &events, &connectivity).await {
            ConnectionEnd::ConsumerGone => {
                debug!(event = "channel_consumer_gone");
                connectivity.send_replace(ConnectivityState::Disconnected);
                return;
            }
            ConnectionEnd::Lost(reason) => {
                warn!(event = "channel_lost", reason = %reason);
                connectivity.send_replace(ConnectivityState::Disconnected);
                if events
                    .send(ChannelEvent::Disconnected { reason })
                    .await
                    .is_err()
                {
                    return;
                }
                backoff = config.reconnect_initial;
            }
            ConnectionEnd::NeverConnected(message) => {
                warn!(event = "channel_connect_error", error = %message);
                if events
                    .send(ChannelEvent::ConnectError { message })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, config.reconnect_max);
    }
}

async fn run_connection(
    config: &ChannelConfig,
    events: &mpsc::Sender<ChannelEvent>,
    connectivity: &watch::Sender<ConnectivityState>,
) -> ConnectionEnd {
    let mut ws = match connect_async(config.url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => return ConnectionEnd::NeverConnected(err.to_string()),
    };

    let mut connected = false;
    if config.protocol == ChannelProtocol::Json {
        connected = true;
        if mark_connected(events, connectivity).await.is_err() {
            return ConnectionEnd::ConsumerGone;
        }
    }

    // Engine.IO servers ping on an interval; silence past interval + timeout means a dead peer.
    let mut idle_limit: Option<Duration> = None;
    let reason = loop {
        let next = match idle_limit {
            Some(limit) => match tokio::time::timeout(limit, ws.next()).await {
                Ok(next) => next,
                Err(_) => break "ping timeout".to_string(),
            },
            None => ws.next().await,
        };
        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => break err.to_string(),
            None => break "stream ended".to_string(),
        };

        let inbound = match decode_message(config.protocol, &text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(event = "channel_decode_error", error = %err);
                continue;
            }
        };
        match inbound {
            InboundMessage::Handshake(open) => {
                debug!(
                    event = "engine_open",
                    sid = %open.sid,
                    ping_interval_ms = open.ping_interval_ms
                );
                if open.ping_interval_ms > 0 {
                    idle_limit = Some(Duration::from_millis(
                        open.ping_interval_ms.saturating_add(open.ping_timeout_ms),
                    ));
                }
                if ws
                    .send(Message::Text(encode_namespace_connect()))
                    .await
                    .is_err()
                {
                    break "namespace connect failed".to_string();
                }
            }
            InboundMessage::Ping(probe) => {
                if ws.send(Message::Text(encode_pong(&probe))).await.is_err() {
                    break "pong failed".to_string();
                }
            }
            InboundMessage::Pong | InboundMessage::Noop => {}
            InboundMessage::Connected => {
                if !connected {
                    connected = true;
                    if mark_connected(events, connectivity).await.is_err() {
                        return ConnectionEnd::ConsumerGone;
                    }
                }
            }
            InboundMessage::Disconnected => break "server disconnect".to_string(),
            InboundMessage::ConnectError(message) => {
                let message = message.unwrap_or_else(|| "connection refused".to_string());
                if !connected {
                    let _ = ws.close(None).await;
                    return ConnectionEnd::NeverConnected(message);
                }
                break message;
            }
            InboundMessage::Event { name, data } => {
                if name != FRAME_UPDATE_EVENT {
                    debug!(event = "channel_event_ignored", name = %name);
                    continue;
                }
                match FrameEvent::from_value(data) {
                    Ok(frame) => {
                        if events.send(ChannelEvent::Frame(frame)).await.is_err() {
                            return ConnectionEnd::ConsumerGone;
                        }
                    }
                    Err(err) => warn!(event = "frame_update_invalid", error = %err),
                }
            }
        }
    };
    let _ = ws.close(None).await;
    if connected {
        ConnectionEnd::Lost(reason)
    } else {
        ConnectionEnd::NeverConnected(reason)
    }
}

async fn mark_connected(
    events: &mpsc::Sender<ChannelEvent>,
    connectivity: &watch::Sender<ConnectivityState>,
) -> Result<(), mpsc::error::SendError<ChannelEvent>> {
    info!(event = "channel_connected");
    connectivity.send_replace(ConnectivityState::Connected);
    events.send(ChannelEvent::Connected).await
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn recv(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timely event")
            .expect("open channel")
    }

    fn fast_config(url: Url, protocol: ChannelProtocol) -> ChannelConfig {
        ChannelConfig {
            reconnect_initial: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(200),
            ..ChannelConfig::new(url, protocol)
        }
    }

    #[tokio::test]
    async fn socketio_handshake_ping_and_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("ws handshake");
            ws.send(Message::Text(
                r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .await
            .expect("open");
            let join = ws.next().await.expect("join").expect("join frame");
            assert_eq!(join, Message::Text("40".into()));
            ws.send(Message::Text(r#"40{"sid":"n1"}"#.into()))
                .await
                .expect("ack");
            ws.send(Message::Text("2".into())).await.expect("ping");
            let pong = ws.next().await.expect("pong").expect("pong frame");
            assert_eq!(pong, Message::Text("3".into()));
            ws.send(Message::Text(r#"42["status",{"ok":true}]"#.into()))
                .await
                .expect("other event");
            ws.send(Message::Text(
                r#"42["frame_update",{"vehicle_counts":{"car":3,"truck":1},"violations":{"speeding":1}}]"#
                    .into(),
            ))
            .await
            .expect("frame");
            ws.send(Message::Text("41".into())).await.expect("disconnect");
        });

        let url = Url::parse(&format!(
            "ws://{addr}/socket.io/?EIO=4&transport=websocket"
        ))
        .expect("url");
        let (mut client, mut rx) =
            EventChannelClient::new(fast_config(url, ChannelProtocol::SocketIo));
        let mut connectivity = client.watch_connectivity();
        client.connect();
        client.connect();

        assert_eq!(recv(&mut rx).await, ChannelEvent::Connected);
        connectivity.changed().await.expect("watch");

        let ChannelEvent::Frame(frame) = recv(&mut rx).await else {
            panic!("expected frame");
        };
        assert_eq!(frame.vehicle_counts.get("car"), Some(&3));
        assert_eq!(frame.violation_counts.get("speeding"), Some(&1));

        assert!(matches!(
            recv(&mut rx).await,
            ChannelEvent::Disconnected { .. }
        ));
        assert_eq!(client.connectivity(), ConnectivityState::Disconnected);

        server.await.expect("server");
        client.disconnect().await;
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn unreachable_server_reports_connect_errors() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
        let (mut client, mut rx) = EventChannelClient::new(fast_config(url, ChannelProtocol::Json));
        client.connect();
        assert!(matches!(
            recv(&mut rx).await,
            ChannelEvent::ConnectError { .. }
        ));
        assert!(matches!(
            recv(&mut rx).await,
            ChannelEvent::ConnectError { .. }
        ));
        assert_eq!(client.connectivity(), ConnectivityState::Disconnected);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn namespace_rejection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("ws handshake");
            ws.send(Message::Text(r#"0{"sid":"s1"}"#.into()))
                .await
                .expect("open");
            let _ = ws.next().await;
            ws.send(Message::Text(r#"44{"message":"Not authorized"}"#.into()))
                .await
                .expect("reject");
            let _ = ws.next().await;
        });

        let url = Url::parse(&format!("ws://{addr}/socket.io/")).expect("url");
        let (mut client, mut rx) =
            EventChannelClient::new(fast_config(url, ChannelProtocol::SocketIo));
        client.connect();
        assert_eq!(
            recv(&mut rx).await,
            ChannelEvent::ConnectError {
                message: "Not authorized".to_string()
            }
        );
        client.disconnect().await;
    }

    #[tokio::test]
    async fn client_disconnect_reports_once_when_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("ws handshake");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
        let (mut client, mut rx) = EventChannelClient::new(fast_config(url, ChannelProtocol::Json));
        client.connect();
        assert_eq!(recv(&mut rx).await, ChannelEvent::Connected);

        client.disconnect().await;
        assert_eq!(
            recv(&mut rx).await,
            ChannelEvent::Disconnected {
                reason: "client disconnect".to_string()
            }
        );
        client.disconnect().await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(10);
        assert_eq!(next_backoff(Duration::from_secs(1), max), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(8), max), max);
        assert_eq!(next_backoff(max, max), max);
        assert_eq!(next_backoff(Duration::MAX, Duration::MAX), Duration::MAX);
        assert_eq!(next_backoff(Duration::MAX, max), max);
    }
}
