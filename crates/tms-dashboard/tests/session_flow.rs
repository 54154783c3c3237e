use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tms_core::{ChannelProtocol, ConnectivityState, SessionState, StartRequest};
use tms_dashboard::{
    ChannelConfig, ControlApi, ControlClient, DisplayUpdate, EventChannelClient, SessionController,
    SessionRuntime, SessionTimings, Severity, UserCommand,
};
use tokio::sync::mpsc;
use url::Url;

#[derive(Clone, Default)]
struct ServerState {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

async fn start_processing(State(state): State<ServerState>) -> Json<serde_json::Value> {
    state.starts.fetch_add(1, Ordering::SeqCst);
    Json(json!({"status": "success", "message": "Processing started successfully"}))
}

async fn stop_processing(State(state): State<ServerState>) -> Json<serde_json::Value> {
    state.stops.fetch_add(1, Ordering::SeqCst);
    Json(json!({"status": "success", "message": "Processing stopped"}))
}

async fn ws_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(stream_frames)
}

async fn stream_frames(mut socket: WebSocket) {
    let update = json!({
        "event": "frame_update",
        "data": {
            "frame": "/9j/4AAQ",
            "vehicle_counts": {"car": 3, "truck": 1},
            "violations": {"speeding": 2, "red_light": 0}
        }
    })
    .to_string();
    loop {
        if socket.send(Message::Text(update.clone())).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn spawn_server() -> (String, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/start_processing", post(start_processing))
        .route("/stop_processing", post(stop_processing))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr.to_string(), state)
}

async fn wait_for(
    display: &mut mpsc::UnboundedReceiver<DisplayUpdate>,
    wanted: impl Fn(&DisplayUpdate) -> bool,
) -> Vec<DisplayUpdate> {
    let mut seen = Vec::new();
    loop {
        let update = tokio::time::timeout(Duration::from_secs(5), display.recv())
            .await
            .expect("timely update")
            .expect("display open");
        let done = wanted(&update);
        seen.push(update);
        if done {
            return seen;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_stream_and_stop_against_local_server() {
    let (addr, server) = spawn_server().await;
    let base = Url::parse(&format!("http://{addr}")).expect("base url");
    let channel_url = Url::parse(&format!("ws://{addr}/ws")).expect("channel url");

    let (display_tx, mut display) = mpsc::unbounded_channel();
    let controller = SessionController::new(display_tx, SessionTimings::default());
    let control: Arc<dyn ControlApi> =
        Arc::new(ControlClient::new(base, Duration::from_secs(2)));
    let (mut channel, channel_rx) =
        EventChannelClient::new(ChannelConfig::new(channel_url, ChannelProtocol::Json));
    channel.connect();

    let (commands, commands_rx) = mpsc::channel(8);
    let runtime = tokio::spawn(SessionRuntime::new(controller, control).run(commands_rx, channel_rx));

    wait_for(&mut display, |update| {
        *update == DisplayUpdate::Connectivity(ConnectivityState::Connected)
    })
    .await;

    commands
        .send(UserCommand::Start(StartRequest::new("my.mp4")))
        .await
        .expect("start");
    let seen = wait_for(&mut display, |update| {
        matches!(update, DisplayUpdate::Notification { .. })
    })
    .await;
    assert!(matches!(
        seen.last(),
        Some(DisplayUpdate::Notification {
            severity: Severity::Success,
            ..
        })
    ));

    let seen = wait_for(&mut display, |update| {
        matches!(update, DisplayUpdate::Alert { .. })
    })
    .await;
    let snapshot = seen
        .iter()
        .rev()
        .find_map(|update| match update {
            DisplayUpdate::Counts(snapshot) => Some(snapshot.clone()),
            _ => None,
        })
        .expect("counts before alert");
    assert_eq!(snapshot.total_vehicles, 4);
    assert_eq!(snapshot.total_violations, 2);
    assert_eq!(snapshot.vehicle("bus"), 0);

    commands.send(UserCommand::Stop).await.expect("stop");
    wait_for(&mut display, |update| {
        *update == DisplayUpdate::Session(SessionState::Idle)
    })
    .await;

    commands.send(UserCommand::Shutdown).await.expect("shutdown");
    let controller = runtime.await.expect("runtime");
    channel.disconnect().await;

    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(server.starts.load(Ordering::SeqCst), 1);
    assert_eq!(server.stops.load(Ordering::SeqCst), 1);
}
