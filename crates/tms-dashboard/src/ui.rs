use crate::display::Severity;
use crate::view::DashboardView;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::time::Instant;
use tms_core::ConnectivityState;

const COMPACT_WIDTH: u16 = 96;
const FRAME_PLACEHOLDER: &str = "Press s to start video processing";

#[derive(Clone, Copy)]
pub struct DashboardTheme {
    pub bg: Color,
    pub surface: Color,
    pub border: Color,
    pub title: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub ok: Color,
    pub warn: Color,
    pub critical: Color,
    pub info: Color,
}

pub fn dashboard_theme() -> DashboardTheme {
    DashboardTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

pub fn render_ui(frame: &mut ratatui::Frame, view: &DashboardView, now: Instant) {
    let size = frame.size();
    let theme = dashboard_theme();
    let alert = view.alert_active(now);
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(if alert { 3 } else { 0 }),
            Constraint::Min(8),
            Constraint::Length(notification_height(view)),
        ])
        .split(size);

    frame.render_widget(render_header(view, theme, size.width), layout[0]);
    if alert {
        frame.render_widget(render_alert(view, theme), layout[1]);
    }
    render_body(frame, view, theme, layout[2]);
    frame.render_widget(render_notifications(view, theme, size.width), layout[3]);
}

fn render_header(view: &DashboardView, theme: DashboardTheme, width: u16) -> Paragraph<'static> {
    let compact = is_compact(width);
    let inner_width = width.saturating_sub(4) as usize;
    let source = view.selected_source().unwrap_or("-");
    let mut fields = vec![
        format!("Server: {}", view.connectivity.as_str()),
        format!("Session: {}", view.session_state.as_str()),
        format!("Source: {}", ellipsize(source, if compact { 16 } else { 40 })),
    ];
    if !compact {
        fields.push(format!(
            "Vehicles: {} | Violations: {}",
            view.counts.total_vehicles, view.counts.total_violations
        ));
    }
    let status_line = fit_fields(&fields, inner_width.max(12));

    let action_text = if view.loading() {
        "Starting video processing...".to_string()
    } else if compact {
        "s start | x stop | q quit".to_string()
    } else {
        "s start | x stop | <-/-> source | q quit".to_string()
    };

    Paragraph::new(Text::from(vec![
        Line::from(vec![
            Span::styled(
                "● ",
                Style::default().fg(connectivity_color(view.connectivity, theme)),
            ),
            Span::styled(status_line, Style::default().fg(theme.text)),
        ]),
        Line::from(Span::styled(
            ellipsize(&action_text, inner_width.max(12)),
            Style::default().fg(if view.loading() {
                theme.accent
            } else {
                theme.muted
            }),
        )),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(panel_block("Traffic Monitor", theme, theme.bg))
}

fn render_alert(view: &DashboardView, theme: DashboardTheme) -> Paragraph<'static> {
    let text = format!(
        "VIOLATION DETECTED: {} active violation(s)",
        view.counts.total_violations
    );
    Paragraph::new(Line::from(Span::styled(
        text,
        Style::default()
            .fg(theme.bg)
            .bg(theme.critical)
            .add_modifier(Modifier::BOLD),
    )))
    .style(Style::default().bg(theme.critical))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.critical))
            .style(Style::default().bg(theme.critical)),
    )
}

fn render_body(frame: &mut ratatui::Frame, view: &DashboardView, theme: DashboardTheme, area: Rect) {
    let columns = if is_compact(area.width) {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(6),
                Constraint::Percentage(50),
                Constraint::Percentage(50),
            ])
            .split(area)
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(40),
                Constraint::Percentage(30),
                Constraint::Percentage(30),
            ])
            .split(area)
    };
    frame.render_widget(render_frame_panel(view, theme), columns[0]);
    frame.render_widget(
        render_count_panel(
            "Vehicles",
            &view.counts.vehicle_rows(),
            view.counts.total_vehicles,
            theme,
            theme.accent,
        ),
        columns[1],
    );
    frame.render_widget(
        render_count_panel(
            "Violations",
            &view.counts.violation_rows(),
            view.counts.total_violations,
            theme,
            theme.critical,
        ),
        columns[2],
    );
}

fn render_frame_panel(view: &DashboardView, theme: DashboardTheme) -> Paragraph<'static> {
    let lines = match &view.frame {
        None => vec![Line::from(Span::styled(
            FRAME_PLACEHOLDER,
            Style::default().fg(theme.muted),
        ))],
        Some(_) => {
            let stats = &view.frame_stats;
            let mut lines = vec![Line::from(Span::styled(
                format!("Frame #{}", stats.frames),
                Style::default()
                    .fg(theme.text)
                    .add_modifier(Modifier::BOLD),
            ))];
            if let Some((width, height)) = stats.dimensions {
                lines.push(Line::from(format!("Resolution: {width}x{height}")));
            }
            lines.push(Line::from(format!("Size: {}", format_bytes(stats.last_bytes))));
            if let Some(at) = stats.last_at {
                lines.push(Line::from(format!("Received: {}", at.format("%H:%M:%S"))));
            }
            if let Some(path) = &view.frame_out {
                lines.push(Line::from(Span::styled(
                    format!("Saved to {}", path.display()),
                    Style::default().fg(theme.muted),
                )));
            }
            lines
        }
    };
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .wrap(Wrap { trim: true })
        .block(panel_block("Video Feed", theme, theme.surface))
}

fn render_count_panel(
    title: &str,
    rows: &[(String, u64)],
    total: u64,
    theme: DashboardTheme,
    highlight: Color,
) -> Paragraph<'static> {
    let label_width = rows
        .iter()
        .map(|(kind, _)| humanize(kind).chars().count())
        .max()
        .unwrap_or(0)
        .max(5);
    let mut lines: Vec<Line<'static>> = rows
        .iter()
        .map(|(kind, value)| {
            let color = if *value > 0 { highlight } else { theme.muted };
            Line::from(vec![
                Span::styled(
                    format!("{:<label_width$}", humanize(kind)),
                    Style::default().fg(theme.text),
                ),
                Span::styled(format!(" {value:>6}"), Style::default().fg(color)),
            ])
        })
        .collect();
    lines.push(Line::from(vec![
        Span::styled(
            format!("{:<label_width$}", "Total"),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {total:>6}"),
            Style::default().fg(highlight).add_modifier(Modifier::BOLD),
        ),
    ]));
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel_block(title, theme, theme.surface))
}

fn render_notifications(
    view: &DashboardView,
    theme: DashboardTheme,
    width: u16,
) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let lines: Vec<Line<'static>> = view
        .notifications
        .iter()
        .rev()
        .map(|notification| {
            Line::from(Span::styled(
                ellipsize(&notification.message, inner_width.max(12)),
                Style::default().fg(severity_color(notification.severity, theme)),
            ))
        })
        .collect();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(panel_block("Notifications", theme, theme.bg))
}

fn panel_block(title: &str, theme: DashboardTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn notification_height(view: &DashboardView) -> u16 {
    if view.notifications.is_empty() {
        0
    } else {
        view.notifications.len() as u16 + 2
    }
}

fn connectivity_color(state: ConnectivityState, theme: DashboardTheme) -> Color {
    match state {
        ConnectivityState::Connected => theme.ok,
        ConnectivityState::Disconnected => theme.critical,
    }
}

fn severity_color(severity: Severity, theme: DashboardTheme) -> Color {
    match severity {
        Severity::Success => theme.ok,
        Severity::Info => theme.info,
        Severity::Warning => theme.warn,
        Severity::Danger => theme.critical,
    }
}

/// `red_light` -> `Red Light`.
pub fn humanize(kind: &str) -> String {
    kind.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}

fn is_compact(width: u16) -> bool {
    width < COMPACT_WIDTH
}

pub fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}

pub fn fit_fields(fields: &[String], max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let mut output = String::new();
    for field in fields {
        if field.trim().is_empty() {
            continue;
        }
        let candidate = if output.is_empty() {
            field.clone()
        } else {
            format!("{output} | {field}")
        };
        if candidate.chars().count() <= max {
            output = candidate;
            continue;
        }
        if output.is_empty() {
            return ellipsize(field, max);
        }
        break;
    }
    output
}
