use std::io::{self, Stdout};

use arboard::Clipboard;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::Terminal;
use sqlnav_core::dispatcher::{Interaction, PromptRequest};
use sqlnav_core::notice::Notice;
use tracing::warn;

use crate::render::{render_modal, render_screen, Screen};

pub(crate) type CrosstermTerminal = Terminal<CrosstermBackend<Stdout>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PromptStep {
    Editing,
    Submitted(String),
    Dismissed,
}

/// Edit buffer of an open prompt. Violations are recomputed on every edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PromptState {
    input: String,
    error: Option<String>,
}

impl PromptState {
    pub(crate) fn new(request: &PromptRequest) -> Self {
        Self {
            input: request.value.clone(),
            error: None,
        }
    }

    pub(crate) fn handle_key(&mut self, request: &PromptRequest, key: KeyEvent) -> PromptStep {
        let control = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => PromptStep::Dismissed,
            KeyCode::Char('c') if control => PromptStep::Dismissed,
            KeyCode::Enter => match request.violation(&self.input) {
                Some(message) => {
                    self.error = Some(message);
                    PromptStep::Editing
                }
                None => PromptStep::Submitted(self.input.clone()),
            },
            KeyCode::Backspace => {
                self.input.pop();
                self.error = request.violation(&self.input);
                PromptStep::Editing
            }
            KeyCode::Char('u') if control => {
                self.input.clear();
                self.error = request.violation(&self.input);
                PromptStep::Editing
            }
            KeyCode::Char(ch) if !control => {
                self.input.push(ch);
                self.error = request.violation(&self.input);
                PromptStep::Editing
            }
            _ => PromptStep::Editing,
        }
    }

    pub(crate) fn display(&self, request: &PromptRequest) -> String {
        if request.password {
            "*".repeat(self.input.chars().count())
        } else {
            self.input.clone()
        }
    }

    pub(crate) fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Only an explicit `y` confirms. Enter is ignored so a key repeat from the
/// previous prompt cannot answer the dialog.
pub(crate) fn confirm_key(key: KeyEvent) -> Option<bool> {
    match key.code {
        KeyCode::Char('y' | 'Y') => Some(true),
        KeyCode::Char('n' | 'N') | KeyCode::Esc => Some(false),
        _ => None,
    }
}

fn clipboard_unavailable(error: &arboard::Error) -> String {
    format!("clipboard unavailable: {error}")
}

/// System clipboard opened on first use and kept for the whole session, so
/// copied text outlives the command that placed it there.
#[derive(Default)]
pub(crate) struct SystemClipboard {
    clipboard: Option<Clipboard>,
}

impl SystemClipboard {
    pub(crate) fn set_text(&mut self, text: &str) -> Result<(), String> {
        let clipboard = match self.clipboard.take() {
            Some(clipboard) => clipboard,
            None => Clipboard::new().map_err(|error| clipboard_unavailable(&error))?,
        };
        self.clipboard
            .insert(clipboard)
            .set_text(text)
            .map_err(|error| error.to_string())
    }
}

fn read_key() -> io::Result<KeyEvent> {
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(key);
            }
        }
    }
}

/// Modal dialogs drawn over a snapshot of the main screen. Notices are
/// collected for the caller to show once the command returns.
pub(crate) struct TerminalInteraction<'a> {
    terminal: &'a mut CrosstermTerminal,
    clipboard: &'a mut SystemClipboard,
    screen: Screen,
    notices: Vec<Notice>,
}

impl<'a> TerminalInteraction<'a> {
    pub(crate) fn new(
        terminal: &'a mut CrosstermTerminal,
        clipboard: &'a mut SystemClipboard,
        screen: Screen,
    ) -> Self {
        Self {
            terminal,
            clipboard,
            screen,
            notices: Vec::new(),
        }
    }

    pub(crate) fn into_notices(self) -> Vec<Notice> {
        self.notices
    }

    fn draw_modal(&mut self, title: &str, lines: Vec<Line<'static>>) -> io::Result<()> {
        let screen = &self.screen;
        self.terminal.draw(|frame| {
            render_screen(frame, screen);
            render_modal(frame, title, lines);
        })?;
        Ok(())
    }

    fn run_confirm(&mut self, message: &str) -> io::Result<bool> {
        loop {
            self.draw_modal(
                "Confirm",
                vec![
                    Line::from(message.to_string()),
                    Line::from(""),
                    Line::from("y: yes    n / Esc: no"),
                ],
            )?;
            if let Some(answer) = confirm_key(read_key()?) {
                return Ok(answer);
            }
        }
    }

    fn run_prompt(&mut self, request: &PromptRequest) -> io::Result<Option<String>> {
        let mut state = PromptState::new(request);
        loop {
            let mut lines = vec![
                Line::from(request.prompt.clone()),
                Line::from(""),
                Line::from(format!("> {}", state.display(request))),
            ];
            if let Some(error) = state.error() {
                lines.push(Line::styled(error.to_string(), Style::default().fg(Color::Red)));
            }
            lines.push(Line::from(""));
            lines.push(Line::from("Enter: submit    Esc: cancel"));
            self.draw_modal("Input", lines)?;

            match state.handle_key(request, read_key()?) {
                PromptStep::Editing => {}
                PromptStep::Submitted(value) => return Ok(Some(value)),
                PromptStep::Dismissed => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl<'a> Interaction for TerminalInteraction<'a> {
    async fn confirm(&mut self, message: &str) -> bool {
        self.run_confirm(message).unwrap_or_else(|error| {
            warn!(%error, "confirmation dialog failed");
            false
        })
    }

    async fn prompt(&mut self, request: &PromptRequest) -> Option<String> {
        self.run_prompt(request).unwrap_or_else(|error| {
            warn!(%error, "input dialog failed");
            None
        })
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn copy_to_clipboard(&mut self, text: &str) -> Result<(), String> {
        self.clipboard.set_text(text)
    }
}
