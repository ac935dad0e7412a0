//! Renders a [`RenderFrame`]. Formatting lives here and nowhere else.

use chrono::{DateTime, Local, Utc};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
    Frame,
};

use crate::keep_awake::KeepAwakeStatus;
use crate::types::{BatteryHealth, NetworkSnapshot, OrderSource, PowerSnapshot, RenderFrame, Section, UptimeReading};

const GOOD: Color = Color::Green;
const FAIR: Color = Color::Yellow;
const BAD: Color = Color::Red;
const DIM: Color = Color::DarkGray;
const ACCENT: Color = Color::Cyan;

/// Draw the whole dashboard.
pub fn render(f: &mut Frame, frame: &RenderFrame) {
    let rows = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(7),
        Constraint::Min(5),
        Constraint::Length(1),
    ])
    .split(f.area());
    let top = Layout::horizontal([Constraint::Percentage(45), Constraint::Percentage(55)]).split(rows[1]);

    render_header(f, rows[0], &frame.keep_awake);
    render_time(f, top[0], frame);
    render_power(f, top[1], &frame.power);
    render_network(f, rows[2], &frame.network);

    let hints = Line::from(Span::styled(" any key quits", Style::default().fg(DIM)));
    f.render_widget(Paragraph::new(hints), rows[3]);
}

fn render_header(f: &mut Frame, area: Rect, status: &KeepAwakeStatus) {
    let line = Line::from(vec![
        Span::styled(" coffee ", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        keep_awake_span(status),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

pub fn keep_awake_span(status: &KeepAwakeStatus) -> Span<'static> {
    match status {
        KeepAwakeStatus::Active { pid, restarts } => {
            let pid = pid.map_or_else(|| "?".to_string(), |p| p.to_string());
            let mut text = format!("● keeping awake (pid {pid})");
            if *restarts > 0 {
                text.push_str(&format!(", restarted {restarts}x"));
            }
            Span::styled(text, Style::default().fg(GOOD))
        }
        KeepAwakeStatus::Degraded { reason } => {
            Span::styled(format!("○ NOT keeping awake: {reason}"), Style::default().fg(BAD))
        }
        KeepAwakeStatus::Idle => Span::styled("◐ starting", Style::default().fg(FAIR)),
        KeepAwakeStatus::Stopped => Span::styled("○ stopped", Style::default().fg(DIM)),
        KeepAwakeStatus::Disabled => Span::styled("○ keep-awake off", Style::default().fg(DIM)),
    }
}

fn render_time(f: &mut Frame, area: Rect, frame: &RenderFrame) {
    let mut lines = vec![
        Line::from(Span::styled(
            frame.now.format("%H:%M:%S").to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(frame.now.format("%A, %d %B %Y").to_string()),
    ];
    if let Some(secondary) = &frame.secondary {
        lines.push(Line::from(format!(
            "{} {}",
            secondary.label,
            secondary.now.format("%H:%M:%S")
        )));
    }
    lines.push(Line::from(format!("up {}", fmt_uptime(&frame.uptime))));
    if let Some(bytes) = frame.memory_bytes {
        lines.push(Line::from(Span::styled(format!("mem {}", fmt_bytes(bytes)), Style::default().fg(DIM))));
    }

    let block = Block::default().borders(Borders::ALL).title(" Time ");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_power(f: &mut Frame, area: Rect, section: &Section<PowerSnapshot>) {
    let block = Block::default().borders(Borders::ALL).title(section_title(" Power ", section));
    let Some(power) = section.value() else {
        f.render_widget(Paragraph::new(section_lines(section, Local::now())).block(block), area);
        return;
    };

    let inner = block.inner(area);
    f.render_widget(block, area);
    let parts = Layout::vertical([Constraint::Length(1), Constraint::Min(1)]).split(inner);

    match power.percentage {
        Some(pct) => {
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(charge_color(pct)))
                .percent(u16::from(pct.min(100)))
                .label(format!("{pct}% {}", power_state(power)));
            f.render_widget(gauge, parts[0]);
        }
        None => f.render_widget(Paragraph::new(format!("no battery, {}", power_state(power))), parts[0]),
    }

    let mut lines = Vec::new();
    let mut details = Vec::new();
    if let Some(watts) = power.charger_wattage {
        details.push(format!("{watts} W charger"));
    }
    if let Some(cycles) = power.cycle_count {
        details.push(format!("{cycles} cycles"));
    }
    if let Some(capacity) = power.max_capacity_percent {
        details.push(format!("{capacity}% max capacity"));
    }
    if !details.is_empty() {
        lines.push(Line::from(details.join("  ")));
    }

    let mut health = vec![
        Span::raw("health "),
        Span::styled(health_label(power.health), Style::default().fg(health_color(power.health))),
    ];
    if let Some(condition) = &power.condition {
        health.push(Span::styled(format!(" ({condition})"), Style::default().fg(DIM)));
    }
    if power.warning_level == Some(true) {
        health.push(Span::styled("  LOW", Style::default().fg(BAD).add_modifier(Modifier::BOLD)));
    }
    lines.push(Line::from(health));
    lines.extend(section_lines(section, Local::now()));

    f.render_widget(Paragraph::new(lines), parts[1]);
}

fn render_network(f: &mut Frame, area: Rect, section: &Section<NetworkSnapshot>) {
    let mut title = section_title(" Network ", section);
    if section.value().is_some_and(|n| n.order_source == OrderSource::ListingOrder) {
        title.push_str("(listing order) ");
    }
    let block = Block::default().borders(Borders::ALL).title(title);

    let Some(network) = section.value() else {
        f.render_widget(Paragraph::new(section_lines(section, Local::now())).block(block), area);
        return;
    };

    let header = Row::new(["#", "", "Interface", "Service", "IPv4", "IPv6", "MAC"])
        .style(Style::default().fg(DIM).add_modifier(Modifier::BOLD));
    let rows = network.interfaces.iter().map(|iface| {
        let (dot, color) = if iface.is_active { ("●", GOOD) } else { ("○", DIM) };
        Row::new(vec![
            Cell::from(iface.service_order_rank.to_string()),
            Cell::from(Span::styled(dot, Style::default().fg(color))),
            Cell::from(iface.name.clone()),
            Cell::from(iface.service.clone().unwrap_or_default()),
            Cell::from(or_dash(&iface.ipv4)),
            Cell::from(or_dash(&iface.ipv6)),
            Cell::from(iface.mac.clone().unwrap_or_else(|| "-".into())),
        ])
    });

    let widths = [
        Constraint::Length(3),
        Constraint::Length(1),
        Constraint::Length(10),
        Constraint::Length(18),
        Constraint::Length(16),
        Constraint::Min(20),
        Constraint::Length(17),
    ];

    let inner = block.inner(area);
    f.render_widget(block, area);
    let parts = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);
    f.render_widget(Table::new(rows, widths).header(header), parts[0]);
    f.render_widget(Paragraph::new(section_lines(section, Local::now())), parts[1]);
}

/// Panel title, flagged when the section is not fresh.
fn section_title<T>(name: &str, section: &Section<T>) -> String {
    match section {
        Section::Fresh { .. } => name.to_string(),
        Section::Stale { .. } => format!("{name}[stale] "),
        Section::Unavailable { .. } => format!("{name}[unavailable] "),
    }
}

/// Last-updated line, plus the error for degraded sections.
pub fn section_lines<T>(section: &Section<T>, now: DateTime<Local>) -> Vec<Line<'static>> {
    match section {
        Section::Fresh { computed_at, .. } => vec![Line::from(Span::styled(
            format!("updated {}", fmt_updated(*computed_at, now)),
            Style::default().fg(DIM),
        ))],
        Section::Stale {
            computed_at, error, ..
        } => vec![Line::from(Span::styled(
            format!("stale, updated {}: {error}", fmt_updated(*computed_at, now)),
            Style::default().fg(FAIR),
        ))],
        Section::Unavailable { error } => vec![Line::from(Span::styled(
            format!("unavailable: {error}"),
            Style::default().fg(BAD),
        ))],
    }
}

/// `14:02:11 (3m ago)`; age is truncated to whole seconds.
pub fn fmt_updated(computed_at: DateTime<Utc>, now: DateTime<Local>) -> String {
    let local = computed_at.with_timezone(&Local);
    let age = (now.with_timezone(&Utc) - computed_at)
        .to_std()
        .map(|d| std::time::Duration::from_secs(d.as_secs()))
        .unwrap_or_default();
    if age.is_zero() {
        format!("{} (just now)", local.format("%H:%M:%S"))
    } else {
        format!("{} ({} ago)", local.format("%H:%M:%S"), humantime::format_duration(age))
    }
}

/// `3d 04:05:06`, days omitted when zero.
pub fn fmt_uptime(uptime: &UptimeReading) -> String {
    let clock = format!("{:02}:{:02}:{:02}", uptime.hours, uptime.minutes, uptime.seconds);
    if uptime.days > 0 {
        format!("{}d {clock}", uptime.days)
    } else {
        clock
    }
}

/// Binary units, one decimal above bytes (e.g. "12.4 MiB").
pub fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn power_state(power: &PowerSnapshot) -> &'static str {
    match (power.is_charging, power.is_plugged_in) {
        (true, _) => "charging",
        (false, true) => "on AC",
        (false, false) => "on battery",
    }
}

fn charge_color(pct: u8) -> Color {
    match pct {
        0..=19 => BAD,
        20..=49 => FAIR,
        _ => GOOD,
    }
}

fn health_label(health: BatteryHealth) -> &'static str {
    match health {
        BatteryHealth::Good => "good",
        BatteryHealth::Fair => "fair",
        BatteryHealth::Poor => "poor",
        BatteryHealth::Unknown => "unknown",
    }
}

fn health_color(health: BatteryHealth) -> Color {
    match health {
        BatteryHealth::Good => GOOD,
        BatteryHealth::Fair => FAIR,
        BatteryHealth::Poor => BAD,
        BatteryHealth::Unknown => DIM,
    }
}

fn or_dash(addrs: &[String]) -> String {
    if addrs.is_empty() {
        "-".into()
    } else {
        addrs.join(", ")
    }
}
