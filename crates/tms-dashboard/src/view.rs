use crate::display::{DisplayUpdate, Severity};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tms_core::{ConnectivityState, CountsSnapshot, SessionState, StartRequest};
use tracing::warn;

const MAX_NOTIFICATIONS: usize = 4;
const FAR_HORIZON: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub last_bytes: usize,
    pub last_at: Option<DateTime<Local>>,
    pub dimensions: Option<(u16, u16)>,
}

/// Everything the terminal dashboard draws, folded from [`DisplayUpdate`]s.
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub session_state: SessionState,
    pub connectivity: ConnectivityState,
    pub counts: CountsSnapshot,
    pub alert_until: Option<Instant>,
    pub notifications: VecDeque<Notification>,
    pub frame: Option<Vec<u8>>,
    pub frame_stats: FrameStats,
    pub sources: Vec<String>,
    pub selected_source: usize,
    pub frame_out: Option<PathBuf>,
}

impl DashboardView {
    pub fn new(sources: Vec<String>, frame_out: Option<PathBuf>) -> Self {
        Self {
            session_state: SessionState::Idle,
            connectivity: ConnectivityState::Disconnected,
            counts: CountsSnapshot::default(),
            alert_until: None,
            notifications: VecDeque::new(),
            frame: None,
            frame_stats: FrameStats::default(),
            sources,
            selected_source: 0,
            frame_out,
        }
    }

    pub fn apply_update(&mut self, update: DisplayUpdate, now: Instant) {
        match update {
            DisplayUpdate::Frame(bytes) => self.set_frame(bytes),
            DisplayUpdate::ResetFrame => {
                self.frame = None;
                self.frame_stats.dimensions = None;
            }
            DisplayUpdate::Counts(snapshot) => self.counts = snapshot,
            DisplayUpdate::Alert { duration } => {
                // A new pulse restarts the timer even if the previous one is still showing.
                self.alert_until = Some(expiry(now, duration));
            }
            DisplayUpdate::Notification {
                message,
                severity,
                duration,
            } => {
                self.notifications.push_back(Notification {
                    message,
                    severity,
                    expires_at: expiry(now, duration),
                });
                while self.notifications.len() > MAX_NOTIFICATIONS {
                    self.notifications.pop_front();
                }
            }
            DisplayUpdate::Connectivity(state) => self.connectivity = state,
            DisplayUpdate::Session(state) => self.session_state = state,
        }
    }

    pub fn prune(&mut self, now: Instant) {
        self.notifications
            .retain(|notification| notification.expires_at > now);
        if self.alert_until.map(|until| until <= now).unwrap_or(false) {
            self.alert_until = None;
        }
    }

    pub fn alert_active(&self, now: Instant) -> bool {
        self.alert_until.map(|until| until > now).unwrap_or(false)
    }

    /// Shown while a start request is in flight.
    pub fn loading(&self) -> bool {
        self.session_state == SessionState::Starting
    }

    pub fn can_start(&self) -> bool {
        self.session_state.can_start() && !self.sources.is_empty()
    }

    pub fn can_stop(&self) -> bool {
        self.session_state.can_stop()
    }

    pub fn selected_source(&self) -> Option<&str> {
        self.sources.get(self.selected_source).map(String::as_str)
    }

    pub fn select_next(&mut self) {
        if !self.sources.is_empty() && self.session_state.can_start() {
            self.selected_source = (self.selected_source + 1) % self.sources.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.sources.is_empty() && self.session_state.can_start() {
            self.selected_source =
                (self.selected_source + self.sources.len() - 1) % self.sources.len();
        }
    }

    pub fn start_request(&self, config_path: Option<String>) -> Option<StartRequest> {
        if !self.can_start() {
            return None;
        }
        self.selected_source()
            .map(|source| StartRequest::new(source).with_config_path(config_path))
    }

    fn set_frame(&mut self, bytes: Vec<u8>) {
        self.frame_stats.frames = self.frame_stats.frames.saturating_add(1);
        self.frame_stats.last_bytes = bytes.len();
        self.frame_stats.last_at = Some(Local::now());
        self.frame_stats.dimensions = jpeg_dimensions(&bytes);
        if let Some(path) = &self.frame_out {
            if let Err(err) = write_frame_atomic(path, &bytes) {
                warn!(event = "frame_out_write_failed", path = %path.display(), error = %err);
            }
        }
        self.frame = Some(bytes);
    }
}

/// Replaces `path` with `bytes` through a sibling temp file so readers never see a partial image.
/// `now + duration`, saturating at a far horizon instead of overflowing.
fn expiry(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_HORIZON))
        .unwrap_or(now)
}

pub fn write_frame_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Width and height from the first JPEG start-of-frame marker.
pub fn jpeg_dimensions(bytes: &[u8]) -> Option<(u16, u16)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0xD8 || marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let length = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if pos + 9 > bytes.len() {
                return None;
            }
            let height = u16::from_be_bytes([bytes[pos + 5], bytes[pos + 6]]);
            let width = u16::from_be_bytes([bytes[pos + 7], bytes[pos + 8]]);
            return Some((width, height));
        }
        if length < 2 {
            return None;
        }
        pos += 2 + length;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> DashboardView {
        DashboardView::new(vec!["my.mp4".to_string(), "0".to_string()], None)
    }

    fn tiny_jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46];
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&[0x01, 0x01, 0x11, 0x00, 0xFF, 0xD9]);
        bytes
    }

    #[test]
    fn alert_retrigger_extends_the_pulse() {
        let mut view = view();
        let start = Instant::now();
        let duration = Duration::from_millis(3_000);
        view.apply_update(DisplayUpdate::Alert { duration }, start);
        let later = start + Duration::from_millis(2_000);
        view.apply_update(DisplayUpdate::Alert { duration }, later);

        assert!(view.alert_active(start + Duration::from_millis(4_000)));
        view.prune(start + Duration::from_millis(5_001));
        assert!(!view.alert_active(start + Duration::from_millis(5_001)));
        assert!(view.alert_until.is_none());
    }

    #[test]
    fn huge_durations_saturate_instead_of_overflowing() {
        let mut view = view();
        let now = Instant::now();
        view.apply_update(
            DisplayUpdate::Alert {
                duration: Duration::MAX,
            },
            now,
        );
        view.apply_update(
            DisplayUpdate::Notification {
                message: "sticky".to_string(),
                severity: Severity::Warning,
                duration: Duration::MAX,
            },
            now,
        );
        let much_later = now + Duration::from_secs(365 * 24 * 60 * 60);
        assert!(view.alert_active(much_later));
        view.prune(much_later);
        assert_eq!(view.notifications.len(), 1);
    }

    #[test]
    fn notifications_expire_and_stack_is_bounded() {
        let mut view = view();
        let now = Instant::now();
        for index in 0..6u64 {
            view.apply_update(
                DisplayUpdate::Notification {
                    message: format!("note {index}"),
                    severity: Severity::Info,
                    duration: Duration::from_millis(1_000 + index * 1_000),
                },
                now,
            );
        }
        assert_eq!(view.notifications.len(), MAX_NOTIFICATIONS);
        assert_eq!(view.notifications[0].message, "note 2");

        view.prune(now + Duration::from_millis(4_500));
        let remaining: Vec<_> = view
            .notifications
            .iter()
            .map(|notification| notification.message.as_str())
            .collect();
        assert_eq!(remaining, vec!["note 4", "note 5"]);
    }

    #[test]
    fn session_state_drives_controls_and_loading() {
        let mut view = view();
        let now = Instant::now();
        assert!(view.can_start());
        view.select_next();
        assert_eq!(view.selected_source(), Some("0"));

        view.apply_update(DisplayUpdate::Session(SessionState::Starting), now);
        assert!(view.loading());
        assert!(view.start_request(None).is_none());
        view.select_prev();
        assert_eq!(view.selected_source(), Some("0"));

        view.apply_update(DisplayUpdate::Session(SessionState::Streaming), now);
        assert!(!view.loading());
        assert!(view.can_stop());
    }

    #[test]
    fn start_request_uses_selected_source() {
        let mut view = view();
        view.select_prev();
        let request = view
            .start_request(Some("config.yaml".to_string()))
            .expect("request");
        assert_eq!(request.video_source, "0");
        assert_eq!(request.config_path.as_deref(), Some("config.yaml"));
    }

    #[test]
    fn frames_update_stats_and_reset_clears_image() {
        let mut view = view();
        let now = Instant::now();
        view.apply_update(DisplayUpdate::Frame(tiny_jpeg(640, 360)), now);
        assert_eq!(view.frame_stats.frames, 1);
        assert_eq!(view.frame_stats.dimensions, Some((640, 360)));
        assert!(view.frame.is_some());

        view.apply_update(DisplayUpdate::ResetFrame, now);
        assert!(view.frame.is_none());
        assert_eq!(view.frame_stats.frames, 1);
    }

    #[test]
    fn frame_out_is_replaced_atomically() {
        let dir = std::env::temp_dir().join(format!("tms-view-{}", std::process::id()));
        let path = dir.join("latest.jpg");
        let mut view = DashboardView::new(vec!["my.mp4".to_string()], Some(path.clone()));
        let now = Instant::now();
        view.apply_update(DisplayUpdate::Frame(vec![1, 2, 3]), now);
        view.apply_update(DisplayUpdate::Frame(vec![4, 5]), now);

        assert_eq!(fs::read(&path).expect("frame file"), vec![4, 5]);
        assert!(!dir.join("latest.jpg.tmp").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn jpeg_dimensions_rejects_non_jpeg() {
        assert_eq!(jpeg_dimensions(&tiny_jpeg(1280, 720)), Some((1280, 720)));
        assert_eq!(jpeg_dimensions(b"\x89PNG\r\n"), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8]), None);
    }
}
