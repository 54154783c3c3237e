use std::fmt;
use std::time::Duration;
use tms_core::{ConnectivityState, CountsSnapshot, SessionState};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering surface the session controller drives.
pub trait DisplaySink {
    fn render_frame(&mut self, image: &[u8]);
    /// Swap the frame area back to the "press start" placeholder.
    fn reset_frame(&mut self);
    fn render_counts(&mut self, snapshot: &CountsSnapshot);
    fn show_alert(&mut self, duration: Duration);
    fn display_notification(&mut self, message: &str, severity: Severity, duration: Duration);
    fn set_connectivity_indicator(&mut self, state: ConnectivityState);
    fn set_session_state(&mut self, _state: SessionState) {}
}

/// Message form of a [`DisplaySink`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpdate {
    Frame(Vec<u8>),
    ResetFrame,
    Counts(CountsSnapshot),
    Alert {
        duration: Duration,
    },
    Notification {
        message: String,
        severity: Severity,
        duration: Duration,
    },
    Connectivity(ConnectivityState),
    Session(SessionState),
}

impl DisplaySink for mpsc::UnboundedSender<DisplayUpdate> {
    fn render_frame(&mut self, image: &[u8]) {
        let _ = self.send(DisplayUpdate::Frame(image.to_vec()));
    }

    fn reset_frame(&mut self) {
        let _ = self.send(DisplayUpdate::ResetFrame);
    }

    fn render_counts(&mut self, snapshot: &CountsSnapshot) {
        let _ = self.send(DisplayUpdate::Counts(snapshot.clone()));
    }

    fn show_alert(&mut self, duration: Duration) {
        let _ = self.send(DisplayUpdate::Alert { duration });
    }

    fn display_notification(&mut self, message: &str, severity: Severity, duration: Duration) {
        let _ = self.send(DisplayUpdate::Notification {
            message: message.to_string(),
            severity,
            duration,
        });
    }

    fn set_connectivity_indicator(&mut self, state: ConnectivityState) {
        let _ = self.send(DisplayUpdate::Connectivity(state));
    }

    fn set_session_state(&mut self, state: SessionState) {
        let _ = self.send(DisplayUpdate::Session(state));
    }
}
