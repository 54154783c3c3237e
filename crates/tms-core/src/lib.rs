use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod control;
pub mod counts;
pub mod stream_ipc;

pub use control::{ControlResponse, StartRequest, ViolationRecord, ViolationsSummary};
pub use counts::{CountMap, CountsSnapshot, MetricsAggregator, VEHICLE_TYPES, VIOLATION_TYPES};
pub use stream_ipc::{ChannelDecodeError, ChannelProtocol, FrameData, FrameEvent, InboundMessage};

/// Lifecycle of the single monitoring session a viewer can own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }

    /// Frames are only consumed while a session is being armed or is live.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectivityState::Connected)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectivityState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "connected" | "connect" | "online" => Ok(ConnectivityState::Connected),
            "disconnected" | "disconnect" | "offline" => Ok(ConnectivityState::Disconnected),
            other => Err(format!("Unknown connectivity state: {other}")),
        }
    }
}
