use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    error::Error,
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tms_dashboard::{
    config::{load_config, Args, Config},
    logging::init_logging,
    ui::render_ui,
    ChannelConfig, ControlApi, ControlClient, DashboardView, DisplayUpdate, EventChannelClient,
    SessionController, SessionRuntime, SessionTimings, UserCommand,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 16;
const UI_TICK_MS: u64 = 250;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config(Args::parse())?;
    let _log_guard = init_logging("tms-dashboard", &config.log_dir, config.log_stdout);
    info!(
        event = "dashboard_start",
        server = %config.server_url,
        channel = %config.channel_url,
        protocol = %config.channel_protocol,
        sources = config.video_sources.len()
    );

    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        display_tx,
        SessionTimings {
            notification: config.notification_duration,
            alert: config.alert_duration,
        },
    );
    let control: Arc<dyn ControlApi> = Arc::new(ControlClient::new(
        config.server_url.clone(),
        config.request_timeout,
    ));
    let (mut channel, channel_rx) = EventChannelClient::new(ChannelConfig::new(
        config.channel_url.clone(),
        config.channel_protocol,
    ));
    channel.connect();

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let runtime = tokio::spawn(SessionRuntime::new(controller, control).run(cmd_rx, channel_rx));

    let mut view = DashboardView::new(config.video_sources.clone(), config.frame_out.clone());
    if config.autostart {
        if let Some(request) = view.start_request(config.config_path.clone()) {
            let _ = cmd_tx.send(UserCommand::Start(request)).await;
        }
    }

    let outcome = if config.headless {
        run_headless(&mut view, display_rx).await
    } else {
        run_tui(&config, &mut view, display_rx, &cmd_tx).await
    };

    let _ = cmd_tx.send(UserCommand::Shutdown).await;
    drop(cmd_tx);
    let controller = runtime.await?;
    channel.disconnect().await;
    info!(event = "dashboard_exit", state = %controller.state());
    outcome
}

async fn run_headless(
    view: &mut DashboardView,
    mut display_rx: mpsc::UnboundedReceiver<DisplayUpdate>,
) -> Result<(), Box<dyn Error>> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            Some(update) = display_rx.recv() => {
                log_update(&update);
                view.apply_update(update, Instant::now());
            }
            _ = &mut ctrl_c => {
                info!(event = "interrupt");
                break;
            }
        }
    }
    Ok(())
}

fn log_update(update: &DisplayUpdate) {
    match update {
        DisplayUpdate::Frame(bytes) => debug!(event = "frame", bytes = bytes.len()),
        DisplayUpdate::ResetFrame => debug!(event = "frame_reset"),
        DisplayUpdate::Counts(snapshot) => info!(
            event = "counts",
            vehicles = snapshot.total_vehicles,
            violations = snapshot.total_violations
        ),
        DisplayUpdate::Alert { duration } => warn!(
            event = "violation_alert",
            duration_ms = duration.as_millis() as u64
        ),
        DisplayUpdate::Notification {
            message, severity, ..
        } => info!(event = "notification", severity = %severity, message = %message),
        DisplayUpdate::Connectivity(state) => info!(event = "connectivity", state = %state),
        DisplayUpdate::Session(state) => info!(event = "session_state", state = %state),
    }
}

async fn run_tui(
    config: &Config,
    view: &mut DashboardView,
    display_rx: mpsc::UnboundedReceiver<DisplayUpdate>,
    cmd_tx: &mpsc::Sender<UserCommand>,
) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let outcome = tui_loop(&mut terminal, config, view, display_rx, cmd_tx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    outcome
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: &Config,
    view: &mut DashboardView,
    mut display_rx: mpsc::UnboundedReceiver<DisplayUpdate>,
    cmd_tx: &mpsc::Sender<UserCommand>,
) -> Result<(), Box<dyn Error>> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(UI_TICK_MS));
    loop {
        let now = Instant::now();
        view.prune(now);
        terminal.draw(|frame| render_ui(frame, view, now))?;
        tokio::select! {
            _ = ticker.tick() => {}
            Some(update) = display_rx.recv() => {
                view.apply_update(update, Instant::now());
            }
            maybe_event = events.next() => {
                if let Some(Ok(event)) = maybe_event {
                    if handle_input(event, config, view, cmd_tx) {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_input(
    event: Event,
    config: &Config,
    view: &mut DashboardView,
    cmd_tx: &mpsc::Sender<UserCommand>,
) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, config, view, cmd_tx),
        _ => false,
    }
}

fn handle_key(
    key: KeyEvent,
    config: &Config,
    view: &mut DashboardView,
    cmd_tx: &mpsc::Sender<UserCommand>,
) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => true,
        KeyCode::Char('s') => {
            if let Some(request) = view.start_request(config.config_path.clone()) {
                if cmd_tx.try_send(UserCommand::Start(request)).is_err() {
                    warn!(event = "command_queue_full", command = "start");
                }
            }
            false
        }
        KeyCode::Char('x') => {
            if view.can_stop() && cmd_tx.try_send(UserCommand::Stop).is_err() {
                warn!(event = "command_queue_full", command = "stop");
            }
            false
        }
        KeyCode::Left => {
            view.select_prev();
            false
        }
        KeyCode::Right => {
            view.select_next();
            false
        }
        _ => false,
    }
}
