use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::{collections::BTreeMap, io::Write};

use super::{MenuItem, Status, StatusKind};
use crate::config::{EditorProject, TunnelSpec};
use crate::registry::TunnelId;

pub const DEFAULT_PORTS_PER_LINE: usize = 5;

const HEADER: &str = "portdeck: choose an action";
const HINT: &str = "↑/↓ move · enter select · q quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Header,
    Section,
    Item,
    Selected,
    Connected,
    SelectedConnected,
    Port,
    Info,
    Error,
    Hint,
}

/// One positioned line of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub row: u16,
    pub col: u16,
    pub text: String,
    pub style: LineStyle,
}

/// Everything a frame is drawn from.
pub struct View<'a> {
    pub tunnels: &'a [TunnelSpec],
    pub projects: &'a [EditorProject],
    pub items: &'a [MenuItem],
    pub cursor: usize,
    pub connected: &'a BTreeMap<TunnelId, Vec<u16>>,
    pub ports_per_line: usize,
    pub status: Option<&'a Status>,
}

struct Builder {
    lines: Vec<Line>,
    row: u16,
}

impl Builder {
    fn push(&mut self, col: u16, text: impl Into<String>, style: LineStyle) {
        self.lines.push(Line { row: self.row, col, text: text.into(), style });
        self.row = self.row.saturating_add(1);
    }

    fn blank(&mut self) {
        self.row = self.row.saturating_add(1);
    }

    fn editors_heading(&mut self) {
        self.blank();
        self.push(0, "Editor projects", LineStyle::Section);
    }
}

fn item_text(selected: bool, label: &str) -> String {
    format!("{} {}", if selected { ">" } else { " " }, label)
}

/// Lays the menu out without regard to screen size; see [`clip`].
pub fn layout(view: &View<'_>) -> Vec<Line> {
    let mut b = Builder { lines: Vec::new(), row: 0 };
    let per_line = view.ports_per_line.max(1);

    b.push(0, HEADER, LineStyle::Header);
    b.blank();

    b.push(0, "SSH connections", LineStyle::Section);
    let mut editors_heading = false;
    for (index, item) in view.items.iter().enumerate() {
        let selected = index == view.cursor;
        match *item {
            MenuItem::Tunnel(id) => {
                let name = &view.tunnels[id].name;
                match view.connected.get(&id) {
                    Some(ports) => {
                        let style = if selected { LineStyle::SelectedConnected } else { LineStyle::Connected };
                        b.push(2, item_text(selected, &format!("Connect to {} (connected)", name)), style);
                        for group in ports.chunks(per_line) {
                            let text = group.iter().map(u16::to_string).collect::<Vec<_>>().join("  ");
                            b.push(6, text, LineStyle::Port);
                        }
                    }
                    None => {
                        let style = if selected { LineStyle::Selected } else { LineStyle::Item };
                        b.push(2, item_text(selected, &format!("Connect to {}", name)), style);
                    }
                }
            }
            MenuItem::Editor(id) => {
                if !editors_heading {
                    b.editors_heading();
                    editors_heading = true;
                }
                let style = if selected { LineStyle::Selected } else { LineStyle::Item };
                b.push(2, item_text(selected, &view.projects[id].name), style);
            }
            MenuItem::Exit => {
                // the section stays visible with no projects configured
                if !editors_heading {
                    b.editors_heading();
                    editors_heading = true;
                }
                b.blank();
                let style = if selected { LineStyle::Selected } else { LineStyle::Item };
                b.push(2, item_text(selected, "Exit"), style);
            }
        }
    }

    b.blank();
    if let Some(status) = view.status {
        let style = match status.kind {
            StatusKind::Info => LineStyle::Info,
            StatusKind::Error => LineStyle::Error,
        };
        b.push(0, status.text.as_str(), style);
    }
    b.push(0, HINT, LineStyle::Hint);

    b.lines
}

/// Drops lines below the screen and cuts text at the right edge.
pub fn clip(lines: Vec<Line>, width: u16, height: u16) -> Vec<Line> {
    lines
        .into_iter()
        .filter(|line| line.row < height && line.col < width)
        .map(|mut line| {
            let room = usize::from(width - line.col);
            if line.text.chars().count() > room {
                line.text = line.text.chars().take(room).collect();
            }
            line
        })
        .collect()
}

fn apply_style<W: Write>(out: &mut W, style: LineStyle) -> std::io::Result<()> {
    match style {
        LineStyle::Header => queue!(out, SetAttribute(Attribute::Bold), SetForegroundColor(Color::Cyan)),
        LineStyle::Section => queue!(out, SetAttribute(Attribute::Underlined)),
        LineStyle::Item => Ok(()),
        LineStyle::Selected => queue!(out, SetAttribute(Attribute::Reverse)),
        LineStyle::Connected => queue!(out, SetForegroundColor(Color::Cyan)),
        LineStyle::SelectedConnected => queue!(out, SetAttribute(Attribute::Reverse), SetForegroundColor(Color::Cyan)),
        LineStyle::Port => queue!(out, SetForegroundColor(Color::DarkGrey)),
        LineStyle::Info => queue!(out, SetForegroundColor(Color::Green)),
        LineStyle::Error => queue!(out, SetForegroundColor(Color::Red)),
        LineStyle::Hint => queue!(out, SetAttribute(Attribute::Dim)),
    }
}

/// Queues a full frame and flushes it. Lines must already be clipped.
pub fn draw<W: Write>(out: &mut W, lines: &[Line]) -> std::io::Result<()> {
    queue!(out, Clear(ClearType::All))?;
    for line in lines {
        queue!(out, MoveTo(line.col, line.row))?;
        apply_style(out, line.style)?;
        queue!(out, Print(&line.text), SetAttribute(Attribute::Reset), ResetColor)?;
    }
    out.flush()
}
