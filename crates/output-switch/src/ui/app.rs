use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode, KeyEvent,
        KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use output_player::{
    AudioDevice, CpalBackend, FileLoader, TransportController, TransportSnapshot,
};
use ratatui::{Terminal, backend::CrosstermBackend, layout::Rect, widgets::ListState};

use super::render;

pub(crate) type Controller = TransportController<CpalBackend, FileLoader>;

const GAIN_STEP: f32 = 0.1;
const LOG_CAP: usize = 500;

/// User intent decoded from one key press.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Action {
    Quit,
    TogglePlay,
    Play,
    Pause,
    Stop,
    SeekBy(f64),
    SelectPrev,
    SelectNext,
    SwitchSelected,
    Rescan,
    GainBy(f32),
    ToggleLogs,
    ScrollLogsUp,
    ScrollLogsDown,
}

pub(crate) fn action_for_key(key: KeyEvent, logs_open: bool, seek_step: f64) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    if logs_open {
        return match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Esc | KeyCode::Char('l') => Some(Action::ToggleLogs),
            KeyCode::Up => Some(Action::ScrollLogsUp),
            KeyCode::Down => Some(Action::ScrollLogsDown),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char(' ') => Some(Action::TogglePlay),
        KeyCode::Char('p') => Some(Action::Play),
        KeyCode::Char('x') => Some(Action::Pause),
        KeyCode::Char('s') => Some(Action::Stop),
        KeyCode::Left => Some(Action::SeekBy(-seek_step)),
        KeyCode::Right => Some(Action::SeekBy(seek_step)),
        KeyCode::Up => Some(Action::SelectPrev),
        KeyCode::Down => Some(Action::SelectNext),
        KeyCode::Enter => Some(Action::SwitchSelected),
        KeyCode::Char('r') => Some(Action::Rescan),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Action::GainBy(GAIN_STEP)),
        KeyCode::Char('-') => Some(Action::GainBy(-GAIN_STEP)),
        KeyCode::Char('l') => Some(Action::ToggleLogs),
        _ => None,
    }
}

/// Map a pointer cell inside the scrub bar linearly onto `[0, total_frames]`.
///
/// The leftmost column is frame 0 and the rightmost is `total_frames`.
pub(crate) fn scrub_frame(total_frames: u64, area: Rect, column: u16, row: u16) -> Option<u64> {
    if total_frames == 0 || area.width == 0 {
        return None;
    }
    let inside_x = column >= area.x && column < area.x.saturating_add(area.width);
    let inside_y = row >= area.y && row < area.y.saturating_add(area.height);
    if !inside_x || !inside_y {
        return None;
    }
    let span = u64::from(area.width.saturating_sub(1));
    if span == 0 {
        return Some(0);
    }
    let offset = u64::from(column - area.x);
    Some(((offset as f64 / span as f64) * total_frames as f64).round() as u64)
}

/// Scrollable, capped log view.
#[derive(Default)]
pub(crate) struct LogPanel {
    pub(crate) open: bool,
    pub(crate) lines: VecDeque<String>,
    pub(crate) scroll: usize,
}

impl LogPanel {
    fn toggle(&mut self) {
        self.open = !self.open;
        if !self.open {
            self.scroll = 0;
        }
    }

    fn scroll_up(&mut self) {
        let max = self.lines.len().saturating_sub(1);
        self.scroll = (self.scroll + 1).min(max);
    }

    fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    fn push(&mut self, line: String) {
        if self.lines.len() >= LOG_CAP {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

/// Launch the TUI and drive the event loop until the user quits.
pub(crate) fn run_tui(controller: Controller, status: String, log_rx: Receiver<String>) -> Result<()> {
    let mut app = App::new(controller, status, log_rx);

    let mut term = init_terminal()?;
    let result = ui_loop(&mut term, &mut app);

    restore_terminal(&mut term)?;
    app.controller.shutdown();
    result
}

/// In-memory UI state for rendering + interaction.
pub(crate) struct App {
    pub(crate) controller: Controller,
    pub(crate) snapshot: TransportSnapshot,
    pub(crate) devices: Vec<AudioDevice>,
    pub(crate) device_state: ListState,
    pub(crate) status: String,
    pub(crate) logs: LogPanel,
    /// Inner area of the position bar from the last draw.
    pub(crate) scrub_area: Option<Rect>,
    last_status_snapshot: String,
    log_rx: Receiver<String>,
}

impl App {
    fn new(controller: Controller, status: String, log_rx: Receiver<String>) -> Self {
        let snapshot = controller.snapshot();
        let mut app = Self {
            devices: Vec::new(),
            device_state: ListState::default(),
            snapshot,
            controller,
            status,
            logs: LogPanel::default(),
            scrub_area: None,
            last_status_snapshot: String::new(),
            log_rx,
        };
        let devices = app.controller.last_enumeration().to_vec();
        app.set_devices(devices);
        if let Some(active) = app.active_device_index() {
            app.device_state.select(Some(active));
        }
        app
    }

    /// Position of the device the graph is bound to in the displayed list.
    pub(crate) fn active_device_index(&self) -> Option<usize> {
        let id = self.snapshot.device_id.as_ref()?;
        self.devices.iter().position(|d| &d.id == id)
    }

    /// Replace the device list, keeping the highlighted device by identity.
    fn set_devices(&mut self, devices: Vec<AudioDevice>) {
        let keep = self
            .device_state
            .selected()
            .and_then(|i| self.devices.get(i))
            .map(|d| d.id.clone());
        self.devices = devices;
        let index = keep
            .and_then(|id| self.devices.iter().position(|d| d.id == id))
            .or_else(|| (!self.devices.is_empty()).then_some(0));
        self.device_state.select(index);
    }

    fn select_next(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        let i = self.device_state.selected().unwrap_or(0);
        let ni = (i + 1).min(self.devices.len() - 1);
        self.device_state.select(Some(ni));
    }

    fn select_prev(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        let i = self.device_state.selected().unwrap_or(0);
        self.device_state.select(Some(i.saturating_sub(1)));
    }

    fn rescan(&mut self) {
        match self.controller.output_devices() {
            Ok(devices) => {
                self.status = format!("Found {} output devices", devices.len());
                self.set_devices(devices);
            }
            Err(e) => self.status = format!("Rescan failed: {e}"),
        }
    }

    fn switch_selected(&mut self) {
        let Some(device) = self
            .device_state
            .selected()
            .and_then(|i| self.devices.get(i))
            .cloned()
        else {
            self.status = "No device selected".into();
            return;
        };
        match self.controller.switch_to(&device.id) {
            Ok(_) => self.status = format!("Output: {device}"),
            Err(e) => self.status = format!("Switch to {} failed: {e}", device.name),
        }
        let devices = self.controller.last_enumeration().to_vec();
        self.set_devices(devices);
    }

    /// Apply one action. Returns `false` when the UI should exit.
    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::Quit => return false,
            Action::TogglePlay => match self.controller.toggle_play_pause() {
                Ok(state) => self.status = format!("Transport: {}", state.label()),
                Err(e) => self.status = format!("Play/pause failed: {e}"),
            },
            Action::Play => {
                if let Err(e) = self.controller.play() {
                    self.status = format!("Play failed: {e}");
                }
            }
            Action::Pause => {
                if let Err(e) = self.controller.pause() {
                    self.status = format!("Pause failed: {e}");
                }
            }
            Action::Stop => match self.controller.stop() {
                Ok(()) => self.status = "Stopped".into(),
                Err(e) => self.status = format!("Stop failed: {e}"),
            },
            Action::SeekBy(delta) => {
                if let Err(e) = self.controller.seek_relative(delta) {
                    self.status = format!("Seek failed: {e}");
                }
            }
            Action::SelectPrev => self.select_prev(),
            Action::SelectNext => self.select_next(),
            Action::SwitchSelected => self.switch_selected(),
            Action::Rescan => self.rescan(),
            Action::GainBy(delta) => {
                let level = self.controller.set_gain(self.controller.gain() + delta);
                self.status = format!("Gain: {level:.1}");
            }
            Action::ToggleLogs => self.logs.toggle(),
            Action::ScrollLogsUp => self.logs.scroll_up(),
            Action::ScrollLogsDown => self.logs.scroll_down(),
        }
        true
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let pressed = matches!(
            mouse.kind,
            MouseEventKind::Down(MouseButton::Left) | MouseEventKind::Drag(MouseButton::Left)
        );
        if !pressed || self.logs.open {
            return;
        }
        let Some(area) = self.scrub_area else {
            return;
        };
        let Some(frame) = scrub_frame(self.snapshot.total_frames, area, mouse.column, mouse.row)
        else {
            return;
        };
        if let Err(e) = self.controller.seek_to_frame(frame) {
            self.status = format!("Seek failed: {e}");
        }
    }

    fn note_status_change(&mut self) {
        if self.last_status_snapshot == self.status {
            return;
        }
        let line = self.status.clone();
        self.last_status_snapshot = self.status.clone();
        self.logs.push(line);
    }

    fn drain_logs(&mut self) {
        while let Ok(line) = self.log_rx.try_recv() {
            self.logs.push(line);
        }
    }
}

fn ui_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    let tick = Duration::from_millis(33);
    let seek_step = app.controller.config().seek_step_secs;

    loop {
        app.drain_logs();
        app.snapshot = app.controller.snapshot();
        terminal.draw(|f| render::draw(f, app))?;

        if event::poll(tick).context("poll terminal events")? {
            match event::read().context("read terminal event")? {
                CEvent::Key(k) if k.kind == KeyEventKind::Press => {
                    if let Some(action) = action_for_key(k, app.logs.open, seek_step) {
                        if !app.apply(action) {
                            return Ok(());
                        }
                    }
                }
                CEvent::Mouse(m) => app.handle_mouse(m),
                _ => {}
            }
        }

        app.note_status_change();
    }
}

fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("create terminal")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    Ok(())
}
