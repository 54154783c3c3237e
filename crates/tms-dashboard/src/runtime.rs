use crate::channel::ChannelEvent;
use crate::control::ControlApi;
use crate::display::DisplaySink;
use crate::session::{ControlAction, ControlCompletion, ControlRequest, SessionController};
use std::sync::Arc;
use tms_core::{SessionState, StartRequest};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start(StartRequest),
    Stop,
    /// Stop a live session if there is one, then exit the loop.
    Shutdown,
}

/// The one task that owns a [`SessionController`].
///
/// User commands, channel events and control completions are all handled on
/// this task, one at a time and to completion. Control requests run as
/// spawned tasks that post their outcome back into the runtime's own queue.
pub struct SessionRuntime<D: DisplaySink> {
    controller: SessionController<D>,
    control: Arc<dyn ControlApi>,
    completions_tx: mpsc::UnboundedSender<ControlCompletion>,
    completions_rx: mpsc::UnboundedReceiver<ControlCompletion>,
}

impl<D: DisplaySink> SessionRuntime<D> {
    pub fn new(controller: SessionController<D>, control: Arc<dyn ControlApi>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            control,
            completions_tx,
            completions_rx,
        }
    }

    /// Runs until a shutdown (or the command queue closing) has settled.
    /// Hands the controller back so callers can inspect the final state.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<UserCommand>,
        mut channel: mpsc::Receiver<ChannelEvent>,
    ) -> SessionController<D> {
        let SessionRuntime {
            mut controller,
            control,
            completions_tx,
            mut completions_rx,
        } = self;
        let mut shutting_down = false;
        let mut channel_open = true;

        loop {
            if shutting_down {
                if controller.state() == SessionState::Streaming {
                    if let Some(request) = controller.stop() {
                        dispatch(&control, &completions_tx, request);
                    }
                }
                if controller.pending_ticket().is_none() {
                    break;
                }
            }

            tokio::select! {
                Some(completion) = completions_rx.recv() => {
                    controller.apply_control_result(completion);
                }
                event = channel.recv(), if channel_open => match event {
                    Some(event) => controller.apply_channel_event(event),
                    None => {
                        debug!(event = "channel_queue_closed");
                        channel_open = false;
                    }
                },
                command = commands.recv(), if !shutting_down => match command {
                    Some(UserCommand::Start(request)) => {
                        if let Some(request) = controller.start(request) {
                            dispatch(&control, &completions_tx, request);
                        }
                    }
                    Some(UserCommand::Stop) => {
                        if let Some(request) = controller.stop() {
                            dispatch(&control, &completions_tx, request);
                        }
                    }
                    Some(UserCommand::Shutdown) | None => {
                        info!(event = "runtime_shutdown", state = %controller.state());
                        shutting_down = true;
                    }
                },
                else => break,
            }
        }
        controller
    }
}

fn dispatch(
    control: &Arc<dyn ControlApi>,
    completions: &mpsc::UnboundedSender<ControlCompletion>,
    request: ControlRequest,
) {
    let control = Arc::clone(control);
    let completions = completions.clone();
    tokio::spawn(async move {
        let ControlRequest { ticket, action } = request;
        let result = match &action {
            ControlAction::Start(start) => control.start_processing(start).await,
            ControlAction::Stop => control.stop_processing().await,
        };
        let _ = completions.send(ControlCompletion { ticket, result });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlError;
    use crate::display::{DisplayUpdate, Severity};
    use crate::session::SessionTimings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tms_core::{CountMap, FrameData, FrameEvent};

    #[derive(Default)]
    struct FakeControl {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_stop: bool,
    }

    #[async_trait]
    impl ControlApi for FakeControl {
        async fn start_processing(
            &self,
            _request: &StartRequest,
        ) -> Result<Option<String>, ControlError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Some("Processing started successfully".to_string()))
        }

        async fn stop_processing(&self) -> Result<Option<String>, ControlError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                Err(ControlError::HttpStatus(500))
            } else {
                Ok(None)
            }
        }
    }

    struct Harness {
        commands: mpsc::Sender<UserCommand>,
        channel: mpsc::Sender<ChannelEvent>,
        display: mpsc::UnboundedReceiver<DisplayUpdate>,
        task: tokio::task::JoinHandle<SessionController<mpsc::UnboundedSender<DisplayUpdate>>>,
    }

    fn spawn_runtime(control: Arc<FakeControl>) -> Harness {
        let (display_tx, display) = mpsc::unbounded_channel();
        let controller = SessionController::new(display_tx, SessionTimings::default());
        let runtime = SessionRuntime::new(controller, control);
        let (commands, commands_rx) = mpsc::channel(16);
        let (channel, channel_rx) = mpsc::channel(16);
        let task = tokio::spawn(runtime.run(commands_rx, channel_rx));
        Harness {
            commands,
            channel,
            display,
            task,
        }
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

    #[tokio::test]
    async fn double_start_sends_one_request() {
        let control = Arc::new(FakeControl::default());
        let harness = spawn_runtime(control.clone());
        harness
            .commands
            .send(UserCommand::Start(StartRequest::new("my.mp4")))
            .await
            .expect("send");
        harness
            .commands
            .send(UserCommand::Start(StartRequest::new("my.mp4")))
            .await
            .expect("send");
        harness
            .commands
            .send(UserCommand::Shutdown)
            .await
            .expect("send");

        let controller = harness.task.await.expect("runtime");
        assert_eq!(control.starts.load(Ordering::SeqCst), 1);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn failed_stop_still_returns_to_idle() {
        let control = Arc::new(FakeControl {
            fail_stop: true,
            ..FakeControl::default()
        });
        let mut harness = spawn_runtime(control.clone());
        harness
            .commands
            .send(UserCommand::Start(StartRequest::new("my.mp4")))
            .await
            .expect("send");
        wait_for(&mut harness.display, |update| {
            matches!(
                update,
                DisplayUpdate::Notification {
                    severity: Severity::Success,
                    ..
                }
            )
        })
        .await;

        harness.commands.send(UserCommand::Stop).await.expect("send");
        let seen = wait_for(&mut harness.display, |update| {
            matches!(
                update,
                DisplayUpdate::Notification {
                    severity: Severity::Danger,
                    ..
                }
            )
        })
        .await;
        assert!(seen.contains(&DisplayUpdate::Session(SessionState::Stopping)));
        assert!(seen.contains(&DisplayUpdate::Session(SessionState::Idle)));
        assert!(seen.contains(&DisplayUpdate::ResetFrame));

        drop(harness.commands);
        let controller = harness.task.await.expect("runtime");
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_events_reach_the_display() {
        let control = Arc::new(FakeControl::default());
        let mut harness = spawn_runtime(control);
        harness
            .channel
            .send(ChannelEvent::Connected)
            .await
            .expect("send");
        harness
            .commands
            .send(UserCommand::Start(StartRequest::new("my.mp4")))
            .await
            .expect("send");
        wait_for(&mut harness.display, |update| {
            *update == DisplayUpdate::Session(SessionState::Streaming)
        })
        .await;

        let vehicle_counts: CountMap = [("car".to_string(), 2)].into_iter().collect();
        harness
            .channel
            .send(ChannelEvent::Frame(FrameEvent {
                frame: FrameData::Image(vec![1, 2, 3]),
                vehicle_counts,
                violation_counts: CountMap::new(),
            }))
            .await
            .expect("send");
        let seen = wait_for(&mut harness.display, |update| {
            matches!(update, DisplayUpdate::Frame(_))
        })
        .await;
        let counts = seen.iter().find_map(|update| match update {
            DisplayUpdate::Counts(snapshot) => Some(snapshot.total_vehicles),
            _ => None,
        });
        assert_eq!(counts, Some(2));

        harness
            .channel
            .send(ChannelEvent::Disconnected {
                reason: "closed".to_string(),
            })
            .await
            .expect("send");
        wait_for(&mut harness.display, |update| {
            *update == DisplayUpdate::Session(SessionState::Idle)
        })
        .await;

        harness
            .commands
            .send(UserCommand::Shutdown)
            .await
            .expect("send");
        let controller = harness.task.await.expect("runtime");
        assert_eq!(controller.state(), SessionState::Idle);
    }
}
