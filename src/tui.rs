//! Terminal setup, restoration, and panic-safe cleanup.

use std::io::{self, stdout, Stdout};

use crossterm::{
    cursor,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::app::FrameSink;
use crate::errors::FatalError;
use crate::types::RenderFrame;
use crate::ui;

pub type Backend = CrosstermBackend<Stdout>;

/// Owns the terminal while the dashboard runs; restores it on drop.
pub struct Tui {
    terminal: Terminal<Backend>,
    entered: bool,
}

impl Tui {
    /// Take over the terminal: raw mode, alternate screen, hidden cursor.
    pub fn enter() -> Result<Self, FatalError> {
        let terminal = Terminal::new(CrosstermBackend::new(stdout())).map_err(FatalError::TerminalUnavailable)?;
        let mut tui = Self {
            terminal,
            entered: false,
        };
        tui.setup().map_err(FatalError::TerminalUnavailable)?;
        Ok(tui)
    }

    fn setup(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        self.entered = true;
        stdout().execute(EnterAlternateScreen)?;
        stdout().execute(cursor::Hide)?;
        self.terminal.clear()
    }

    /// Give the terminal back. Safe to call more than once.
    pub fn exit(&mut self) {
        if std::mem::take(&mut self.entered) {
            restore();
        }
    }
}

impl FrameSink for Tui {
    fn draw(&mut self, frame: &RenderFrame) -> io::Result<()> {
        self.terminal.draw(|f| ui::render(f, frame))?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Best effort; partial failures are ignored.
fn restore() {
    let _ = stdout().execute(cursor::Show);
    let _ = stdout().execute(LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
}

/// Install panic and error hooks that restore the terminal before printing.
///
/// Call before [`Tui::enter`] so panics during setup also print cleanly.
pub fn install_hooks() -> color_eyre::Result<()> {
    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .into_hooks();
    eyre_hook.install()?;

    let panic_hook = panic_hook.into_panic_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore();
        panic_hook(info);
    }));
    Ok(())
}
