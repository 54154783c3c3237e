//! Dashboard client for the traffic monitoring server: session control,
//! the push channel, and the terminal view that renders both.

pub mod channel;
pub mod config;
pub mod control;
pub mod display;
pub mod logging;
pub mod runtime;
pub mod session;
pub mod ui;
pub mod view;

pub use channel::{ChannelConfig, ChannelEvent, EventChannelClient};
pub use config::{load_config, Args, Config, ConfigError};
pub use control::{ControlApi, ControlClient, ControlError};
pub use display::{DisplaySink, DisplayUpdate, Severity};
pub use runtime::{SessionRuntime, UserCommand};
pub use session::{
    ControlAction, ControlCompletion, ControlRequest, ControlTicket, Session, SessionController,
    SessionTimings,
};
pub use view::DashboardView;
