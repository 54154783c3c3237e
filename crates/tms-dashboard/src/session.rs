use crate::channel::ChannelEvent;
use crate::control::ControlError;
use crate::display::{DisplaySink, Severity};
use std::time::Duration;
use tms_core::{
    ConnectivityState, CountsSnapshot, FrameData, FrameEvent, MetricsAggregator, SessionState,
    StartRequest,
};
use tracing::{debug, info, warn};

pub const START_OK_MESSAGE: &str = "Video processing started successfully";
pub const STOP_OK_MESSAGE: &str = "Video processing stopped";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection to server lost. Video stream interrupted.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    pub video_source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    Start,
    Stop,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Start => "start",
            ControlOp::Stop => "stop",
        }
    }
}

/// Identifies one in-flight control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlTicket {
    pub id: u64,
    pub op: ControlOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Start(StartRequest),
    Stop,
}

/// Work order for the control endpoint, produced by the controller and executed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub ticket: ControlTicket,
    pub action: ControlAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCompletion {
    pub ticket: ControlTicket,
    pub result: Result<Option<String>, ControlError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub notification: Duration,
    pub alert: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            notification: Duration::from_millis(5_000),
            alert: Duration::from_millis(3_000),
        }
    }
}

/// Owns the session lifecycle and drives the display.
///
/// The controller never performs I/O. `start` and `stop` hand back the
/// control request to execute, and the outcome is fed in later through
/// [`SessionController::apply_control_result`]. Channel traffic arrives
/// through [`SessionController::apply_channel_event`]. Both may interleave
/// in any order; a completion is only honoured while the session still
/// waits on that exact ticket.
pub struct SessionController<D: DisplaySink> {
    display: D,
    session: Session,
    aggregator: MetricsAggregator,
    pending: Option<ControlTicket>,
    next_ticket: u64,
    connectivity: ConnectivityState,
    timings: SessionTimings,
}

impl<D: DisplaySink> SessionController<D> {
    pub fn new(display: D, timings: SessionTimings) -> Self {
        Self {
            display,
            session: Session::default(),
            aggregator: MetricsAggregator::new(),
            pending: None,
            next_ticket: 1,
            connectivity: ConnectivityState::Disconnected,
            timings,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn snapshot(&self) -> &CountsSnapshot {
        self.aggregator.snapshot()
    }

    pub fn pending_ticket(&self) -> Option<ControlTicket> {
        self.pending
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn start(&mut self, request: StartRequest) -> Option<ControlRequest> {
        if !self.session.state.can_start() {
            debug!(
                event = "start_ignored",
                state = %self.session.state,
                source = %request.video_source
            );
            return None;
        }
        info!(event = "session_start", source = %request.video_source);
        self.session.video_source = Some(request.video_source.clone());
        let ticket = self.issue_ticket(ControlOp::Start);
        self.transition(SessionState::Starting);
        Some(ControlRequest {
            ticket,
            action: ControlAction::Start(request),
        })
    }

    pub fn stop(&mut self) -> Option<ControlRequest> {
        if !self.session.state.can_stop() {
            debug!(event = "stop_ignored", state = %self.session.state);
            return None;
        }
        info!(event = "session_stop");
        let ticket = self.issue_ticket(ControlOp::Stop);
        self.transition(SessionState::Stopping);
        Some(ControlRequest {
            ticket,
            action: ControlAction::Stop,
        })
    }

    /// Returns false when the completion was stale and ignored.
    pub fn apply_control_result(&mut self, completion: ControlCompletion) -> bool {
        if self.pending != Some(completion.ticket) {
            debug!(
                event = "control_result_stale",
                ticket = completion.ticket.id,
                op = completion.ticket.op.as_str(),
                state = %self.session.state
            );
            return false;
        }
        self.pending = None;
        match (completion.ticket.op, completion.result) {
            (ControlOp::Start, Ok(ack)) => {
                info!(
                    event = "session_streaming",
                    ack = ack.as_deref().unwrap_or("")
                );
                self.transition(SessionState::Streaming);
                self.notify(START_OK_MESSAGE, Severity::Success);
            }
            (ControlOp::Start, Err(err)) => {
                warn!(event = "session_start_failed", error = %err);
                self.session.video_source = None;
                self.transition(SessionState::Idle);
                self.display.reset_frame();
                self.notify(&err.user_message(), Severity::Danger);
            }
            (ControlOp::Stop, Ok(_)) => {
                info!(event = "session_stopped");
                self.finish_stop();
                self.notify(STOP_OK_MESSAGE, Severity::Info);
            }
            (ControlOp::Stop, Err(err)) => {
                warn!(event = "session_stop_failed", error = %err);
                self.finish_stop();
                self.notify(&err.user_message(), Severity::Danger);
            }
        }
        true
    }

    pub fn apply_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.set_connectivity(ConnectivityState::Connected),
            ChannelEvent::Disconnected { reason } => {
                debug!(event = "channel_disconnected", reason = %reason);
                self.channel_lost();
            }
            ChannelEvent::ConnectError { message } => {
                warn!(event = "channel_connect_error", error = %message);
                self.channel_lost();
            }
            ChannelEvent::Frame(frame) => self.consume_frame(&frame),
        }
    }

    fn consume_frame(&mut self, frame: &FrameEvent) {
        if !self.session.state.accepts_frames() {
            debug!(event = "frame_ignored", state = %self.session.state);
            return;
        }
        let snapshot = self.aggregator.apply(frame).clone();
        self.display.render_counts(&snapshot);
        match &frame.frame {
            FrameData::Image(bytes) => self.display.render_frame(bytes),
            FrameData::Missing => {}
            FrameData::Undecodable(reason) => {
                warn!(event = "frame_undecodable", reason = %reason);
            }
        }
        if MetricsAggregator::should_alert(&snapshot) {
            self.display.show_alert(self.timings.alert);
        }
    }

    fn channel_lost(&mut self) {
        self.set_connectivity(ConnectivityState::Disconnected);
        // A pending start or stop is settled by its control response.
        if self.session.state == SessionState::Streaming {
            warn!(event = "session_lost", state = %self.session.state);
            self.session.video_source = None;
            self.transition(SessionState::Idle);
            self.display.reset_frame();
            self.notify(CONNECTION_LOST_MESSAGE, Severity::Warning);
        }
    }

    fn finish_stop(&mut self) {
        self.session.video_source = None;
        self.transition(SessionState::Idle);
        self.display.reset_frame();
    }

    fn set_connectivity(&mut self, state: ConnectivityState) {
        if self.connectivity != state {
            info!(event = "connectivity", state = %state);
        }
        self.connectivity = state;
        self.display.set_connectivity_indicator(state);
    }

    fn issue_ticket(&mut self, op: ControlOp) -> ControlTicket {
        let ticket = ControlTicket {
            id: self.next_ticket,
            op,
        };
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.pending = Some(ticket);
        ticket
    }

    fn transition(&mut self, next: SessionState) {
        self.session.state = next;
        self.display.set_session_state(next);
    }

    fn notify(&mut self, message: &str, severity: Severity) {
        self.display
            .display_notification(message, severity, self.timings.notification);
    }
}
