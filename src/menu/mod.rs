use anyhow::Result;
use crossterm::{
    cursor::{Hide, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::{
    io::{self, Write},
    process::Child,
    time::Duration,
};
use tracing::{debug, error, info};

use crate::config::{Config, TunnelSpec};
use crate::editor;
use crate::error::LaunchError;
use crate::registry::{Registry, Toggle};
use crate::shutdown::{self, ShutdownReport, SHUTDOWN_GRACE};
use crate::ssh;

pub mod render;

use render::View;

/// How often the frame is redrawn while no key arrives.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// One selectable row: tunnels first, then editor projects, then Exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Tunnel(usize),
    Editor(usize),
    Exit,
}

pub fn build_items(config: &Config) -> Vec<MenuItem> {
    (0..config.tunnels().len())
        .map(MenuItem::Tunnel)
        .chain((0..config.projects().len()).map(MenuItem::Editor))
        .chain(std::iter::once(MenuItem::Exit))
        .collect()
}

/// Cursor over the option list. Movement saturates at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuState {
    cursor: usize,
    len: usize,
}

impl MenuState {
    pub fn new(len: usize) -> Self {
        MenuState { cursor: 0, len }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn down(&mut self) {
        if self.cursor + 1 < self.len {
            self.cursor += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
    Confirm,
    Quit,
}

pub fn action_for(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => Some(Action::Up),
        KeyCode::Down | KeyCode::Char('j') => Some(Action::Down),
        KeyCode::Enter | KeyCode::Char(' ') => Some(Action::Confirm),
        KeyCode::Esc | KeyCode::Char('q') => Some(Action::Quit),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

/// Feedback from the last action, shown under the menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

impl Status {
    pub fn info(text: impl Into<String>) -> Self {
        Status { kind: StatusKind::Info, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Status { kind: StatusKind::Error, text: text.into() }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(ShutdownReport),
}

type Launcher = fn(&TunnelSpec) -> Result<Child, LaunchError>;

pub struct Menu {
    config: Config,
    registry: Registry,
    items: Vec<MenuItem>,
    state: MenuState,
    status: Option<Status>,
    ports_per_line: usize,
    launcher: Launcher,
}

impl Menu {
    pub fn new(config: Config, registry: Registry, ports_per_line: usize) -> Self {
        let items = build_items(&config);
        let state = MenuState::new(items.len());
        Menu {
            config,
            registry,
            items,
            state,
            status: None,
            ports_per_line,
            launcher: ssh::launch,
        }
    }

    #[cfg(test)]
    fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    fn selected(&self) -> MenuItem {
        self.items[self.state.cursor()]
    }

    /// Message worth showing before a slow action runs.
    fn busy_message(&self) -> Option<String> {
        match self.selected() {
            MenuItem::Tunnel(id) => {
                let spec = &self.config.tunnels()[id];
                let verb = if self.registry.is_live(id) { "Disconnecting from" } else { "Connecting to" };
                Some(format!("{} {}...", verb, spec.name))
            }
            MenuItem::Editor(id) => Some(format!("Opening project {}...", self.config.projects()[id].name)),
            MenuItem::Exit => None,
        }
    }

    pub fn handle(&mut self, action: Action) -> Flow {
        match action {
            Action::Up => self.state.up(),
            Action::Down => self.state.down(),
            Action::Quit => return self.exit(),
            Action::Confirm => match self.selected() {
                MenuItem::Tunnel(id) => self.toggle_tunnel(id),
                MenuItem::Editor(id) => self.open_project(id),
                MenuItem::Exit => return self.exit(),
            },
        }
        Flow::Continue
    }

    fn toggle_tunnel(&mut self, id: usize) {
        let spec = &self.config.tunnels()[id];
        self.status = Some(match self.registry.toggle(id, spec, self.launcher) {
            Ok(Toggle::Connected { pid }) => Status::info(format!("Connected to {} (pid {})", spec.name, pid)),
            Ok(Toggle::Disconnected) => Status::info(format!("Disconnected from {}", spec.name)),
            Err(e) => {
                error!(tunnel = %spec.name, error = %e, "launch failed");
                Status::error(e.to_string())
            }
        });
    }

    fn open_project(&mut self, id: usize) {
        let project = &self.config.projects()[id];
        let report = editor::open_project(project);
        self.status = Some(if report.is_success() {
            Status::info(format!("Opened {}", project.name))
        } else {
            let first = report.failures.first().map(ToString::to_string).unwrap_or_default();
            Status::error(format!(
                "{}: {} of {} command(s) failed ({})",
                project.name,
                report.failures.len(),
                project.commands.len(),
                first
            ))
        });
    }

    fn exit(&mut self) -> Flow {
        info!("exit requested");
        Flow::Exit(shutdown::shutdown(&self.registry, SHUTDOWN_GRACE))
    }

    fn frame(&self, width: u16, height: u16) -> Vec<render::Line> {
        let connected = self.registry.snapshot();
        let lines = render::layout(&View {
            tunnels: self.config.tunnels(),
            projects: self.config.projects(),
            items: &self.items,
            cursor: self.state.cursor(),
            connected: &connected,
            ports_per_line: self.ports_per_line,
            status: self.status.as_ref(),
        });
        render::clip(lines, width, height)
    }

    fn render<W: Write>(&self, out: &mut W) {
        let (width, height) = terminal::size().unwrap_or((80, 24));
        // a failed frame is simply redrawn on the next pass
        if let Err(e) = render::draw(out, &self.frame(width, height)) {
            debug!(error = %e, "frame draw failed");
        }
    }

    /// Runs the dashboard until Exit. Returns the shutdown sweep's report.
    pub fn run(mut self) -> Result<ShutdownReport> {
        let _guard = TerminalGuard::enter()?;
        let mut out = io::stdout();

        loop {
            self.render(&mut out);

            let Some(action) = next_action(REFRESH_INTERVAL)? else {
                continue;
            };

            if action == Action::Confirm {
                if let Some(message) = self.busy_message() {
                    self.status = Some(Status::info(message));
                    self.render(&mut out);
                }
            }

            if let Flow::Exit(report) = self.handle(action) {
                return Ok(report);
            }
        }
    }
}

fn next_action(timeout: Duration) -> io::Result<Option<Action>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => Ok(action_for(key)),
        _ => Ok(None),
    }
}

/// Raw mode plus alternate screen for as long as it lives.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, Hide) {
            restore_terminal();
            return Err(e);
        }
        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Leaves the alternate screen and raw mode. Safe to call more than once.
pub fn restore_terminal() {
    let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
}
