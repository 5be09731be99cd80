use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style},
    text::Line,
    widgets::{Clear, Gauge, List, ListItem, Paragraph},
};

use output_player::TransportSnapshot;

use super::app::App;
use super::widgets::{centered_rect, draw_list_panel, panel_block};

pub(crate) fn draw(f: &mut ratatui::Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(6),
            Constraint::Length(3),
            Constraint::Length(4),
        ])
        .split(f.area());

    let loader = app.controller.loader();
    let file_name = loader
        .path()
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("-");
    let source_line = match loader.source_info() {
        Some(info) => {
            let mut src = info.codec.clone().unwrap_or_else(|| "?".into());
            if let Some(bits) = info.bit_depth {
                src.push_str(&format!(" {bits}b"));
            }
            format!("source: {src} {} Hz, {} ch", info.sample_rate, info.channels)
        }
        None => "source: -".to_string(),
    };
    let header = Paragraph::new(vec![
        Line::from(format!("file: {file_name}")),
        Line::from(source_line),
        Line::from(signal_path_line(&app.snapshot)),
    ])
    .block(panel_block("output-switch"));
    f.render_widget(header, chunks[0]);

    let mid_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(chunks[1]);

    let active = app.active_device_index();
    let items: Vec<ListItem> = if app.devices.is_empty() {
        vec![ListItem::new("<no outputs> (r to rescan)")]
    } else {
        app.devices
            .iter()
            .enumerate()
            .map(|(idx, device)| {
                let tag = if active == Some(idx) { "  [active]" } else { "" };
                ListItem::new(format!("#{} {device}{tag}", device.index))
            })
            .collect()
    };
    let list = draw_list_panel("Outputs (Enter to switch)", items, !app.devices.is_empty());
    f.render_stateful_widget(list, mid_chunks[0], &mut app.device_state);

    let snap = &app.snapshot;
    let transport = Paragraph::new(vec![
        Line::from(format!("state: {}", snap.state.label())),
        Line::from(format!(
            "position: {} / {}",
            format_secs(snap.position_secs),
            format_secs(snap.duration_secs)
        )),
        Line::from(format!(
            "frames: {} / {}",
            snap.position_frames, snap.total_frames
        )),
        Line::from(format!(
            "device: {}",
            snap.device_name.as_deref().unwrap_or("-")
        )),
        Line::from(format!("gain: {:.2}", snap.gain)),
    ])
    .block(panel_block("Transport"));
    f.render_widget(transport, mid_chunks[1]);

    let position_title = if snap.has_graph() {
        "Position (click to seek)"
    } else {
        "Position (no output)"
    };
    let position_block = panel_block(position_title);
    let scrub_area = position_block.inner(chunks[2]);
    app.scrub_area = Some(scrub_area);
    let gauge = Gauge::default()
        .block(position_block)
        .ratio(snap.progress())
        .label(format!(
            "{} / {} [{}]",
            format_secs(snap.position_secs),
            format_secs(snap.duration_secs),
            snap.state.label()
        ))
        .style(Style::default().fg(Color::Black).bg(Color::White))
        .gauge_style(Style::default().fg(Color::White).bg(Color::Black));
    f.render_widget(gauge, chunks[2]);

    let footer_block = panel_block("Status");
    let footer_inner = footer_block.inner(chunks[3]);
    f.render_widget(footer_block, chunks[3]);
    let footer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(footer_inner);
    f.render_widget(
        Paragraph::new(Line::from(format!("status: {}", app.status))),
        footer_chunks[0],
    );
    f.render_widget(
        Paragraph::new(Line::from(
            "keys: Space play/pause | s stop | ←/→ seek | ↑/↓ select | Enter switch | r rescan | +/- gain | l logs | q quit",
        ))
        .alignment(Alignment::Left),
        footer_chunks[1],
    );

    if app.logs.open {
        let area = centered_rect(90, 80, f.area());
        f.render_widget(Clear, area);
        let block = panel_block("Logs (Esc to close, ↑/↓ scroll)");
        let inner = block.inner(area);
        let height = inner.height as usize;
        let total = app.logs.lines.len();
        let end = total.saturating_sub(app.logs.scroll);
        let start = end.saturating_sub(height);
        let mut items = Vec::new();
        for line in app.logs.lines.iter().skip(start).take(end.saturating_sub(start)) {
            items.push(ListItem::new(line.clone()));
        }
        if items.is_empty() {
            items.push(ListItem::new("<no logs>"));
        }
        f.render_widget(List::new(items).block(block), area);
    }
}

/// Buffer rate -> output rate, channel count and gain.
fn signal_path_line(snap: &TransportSnapshot) -> String {
    let buffer = snap
        .buffer_rate
        .map(|hz| format!("{hz} Hz"))
        .unwrap_or_else(|| "-".into());
    let output = snap
        .output_rate
        .map(|hz| format!("{hz} Hz"))
        .unwrap_or_else(|| "-".into());
    let mut line = format!("signal: buffer {buffer} -> output {output}");
    if let Some(ch) = snap.channels {
        line.push_str(&format!(", {ch} ch"));
    }
    line.push_str(&format!(" | gain {:.2}", snap.gain));
    line
}

/// `m:ss.s`
fn format_secs(secs: f64) -> String {
    let tenths = (secs.max(0.0) * 10.0).round() as u64;
    let mins = tenths / 600;
    let rem = tenths % 600;
    format!("{mins}:{:02}.{}", rem / 10, rem % 10)
}
