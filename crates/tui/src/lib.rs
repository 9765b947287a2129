mod prompt;
mod render;
#[cfg(test)]
mod test_support;
mod tree_view;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use sqlnav_core::config::StateStore;
use sqlnav_core::dispatcher::{
    commands_for, CommandDefinition, CommandDispatcher, CommandId, CommandOutcome, CommandOutput,
};
use sqlnav_core::driver::Driver;
use sqlnav_core::node::{NodeKey, NodeKind, TreeNode};
use sqlnav_core::notice::Notice;
use sqlnav_core::tree::{ChangeScope, TreeEvent, TreeSupplier};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::prompt::{CrosstermTerminal, SystemClipboard, TerminalInteraction};
use crate::render::{render_screen, OutputPane, PaletteView, Screen};
use crate::tree_view::TreeView;

const TICK_RATE: Duration = Duration::from_millis(120);
const PAGE_SCROLL: i32 = 10;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    TogglePalette,
    Dismiss,
    Navigate(DirectionKey),
    Activate,
    Run(CommandId),
    DeleteSelected,
    ScrollOutput(i32),
}

/// Work `handle` asks the loop to do against the supplier or dispatcher.
enum Effect<D: Driver> {
    Expand(TreeNode<D>),
    Collapse(NodeKey),
    RefreshKey(NodeKey),
    Run(CommandId, Option<TreeNode<D>>),
}

struct Palette {
    commands: Vec<CommandDefinition>,
    selected: usize,
}

impl Palette {
    fn view(&self) -> PaletteView {
        PaletteView {
            titles: self.commands.iter().map(|command| command.title).collect(),
            selected: self.selected,
        }
    }
}

struct TuiApp<D: Driver> {
    tree: TreeView<D>,
    output: OutputPane,
    status: Option<Notice>,
    show_help: bool,
    palette: Option<Palette>,
    /// Table shown by the last `OpenTable`; queries run against it.
    open_table: Option<TreeNode<D>>,
    should_quit: bool,
}

impl<D: Driver> Default for TuiApp<D> {
    fn default() -> Self {
        Self {
            tree: TreeView::default(),
            output: OutputPane::default(),
            status: None,
            show_help: false,
            palette: None,
            open_table: None,
            should_quit: false,
        }
    }
}

impl<D: Driver> TuiApp<D> {
    fn handle(&mut self, msg: Msg) -> Option<Effect<D>> {
        match msg {
            Msg::Quit => {
                self.should_quit = true;
                None
            }
            Msg::ToggleHelp => {
                self.show_help = !self.show_help;
                None
            }
            Msg::TogglePalette => {
                self.palette = match self.palette.take() {
                    Some(_) => None,
                    None => Some(Palette {
                        commands: commands_for(self.selected_kind()),
                        selected: 0,
                    }),
                };
                None
            }
            Msg::Dismiss => {
                self.palette = None;
                self.show_help = false;
                None
            }
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Activate => self.activate(),
            Msg::Run(CommandId::ExecuteQuery) => Some(Effect::Run(
                CommandId::ExecuteQuery,
                self.open_table.clone().or_else(|| self.tree.selected_node()),
            )),
            Msg::Run(id) => Some(Effect::Run(id, self.tree.selected_node())),
            Msg::DeleteSelected => {
                let id = match self.selected_kind()? {
                    NodeKind::Connection => CommandId::DeleteConnection,
                    NodeKind::Database => CommandId::DropDatabase,
                    NodeKind::Table => CommandId::DeleteTable,
                    NodeKind::Error | NodeKind::Loading => return None,
                };
                Some(Effect::Run(id, self.tree.selected_node()))
            }
            Msg::ScrollOutput(delta) => {
                self.output.scroll_by(delta);
                None
            }
        }
    }

    fn selected_kind(&self) -> Option<NodeKind> {
        self.tree.selected_node().map(|node| node.kind())
    }

    fn navigate(&mut self, direction: DirectionKey) -> Option<Effect<D>> {
        if let Some(palette) = self.palette.as_mut() {
            let last = palette.commands.len().saturating_sub(1);
            palette.selected = match direction {
                DirectionKey::Up => palette.selected.saturating_sub(1),
                DirectionKey::Down => (palette.selected + 1).min(last),
                DirectionKey::Left | DirectionKey::Right => palette.selected,
            };
            return None;
        }

        match direction {
            DirectionKey::Up => {
                self.tree.move_selection(-1);
                None
            }
            DirectionKey::Down => {
                self.tree.move_selection(1);
                None
            }
            DirectionKey::Right => {
                let node = self.tree.selected_node()?;
                (node.is_expandable() && !self.tree.is_expanded(&node.key()))
                    .then_some(Effect::Expand(node))
            }
            DirectionKey::Left => {
                let node = self.tree.selected_node()?;
                let key = node.key();
                if self.tree.is_expanded(&key) {
                    Some(Effect::Collapse(key))
                } else {
                    self.tree.select_key(node.parent());
                    None
                }
            }
        }
    }

    fn activate(&mut self) -> Option<Effect<D>> {
        if let Some(palette) = self.palette.take() {
            let command = palette.commands.get(palette.selected)?;
            return Some(Effect::Run(command.id, self.tree.selected_node()));
        }

        let node = self.tree.selected_node()?;
        match &node {
            TreeNode::Connection { .. } | TreeNode::Database { .. } => {
                let key = node.key();
                if self.tree.is_expanded(&key) {
                    Some(Effect::Collapse(key))
                } else {
                    Some(Effect::Expand(node))
                }
            }
            TreeNode::Table { .. } => Some(Effect::Run(CommandId::OpenTable, Some(node))),
            TreeNode::Error { parent, .. } => match parent {
                Some(parent) => Some(Effect::RefreshKey(parent.clone())),
                None => Some(Effect::Run(CommandId::Refresh, None)),
            },
            TreeNode::Loading => None,
        }
    }

    fn apply_outcome(
        &mut self,
        target: Option<TreeNode<D>>,
        outcome: CommandOutcome,
        notices: Vec<Notice>,
    ) {
        if let Some(notice) = notices.into_iter().last() {
            self.status = Some(notice);
        }
        match outcome {
            CommandOutcome::Completed => {}
            CommandOutcome::Cancelled => self.status = Some(Notice::info("Cancelled")),
            CommandOutcome::Output(output) => {
                match &output {
                    CommandOutput::TableView(_) => self.open_table = target,
                    CommandOutput::Grid { .. } => {}
                    _ => self.open_table = None,
                }
                self.output = OutputPane::from_output(&output);
            }
            CommandOutcome::Failed(message) => {
                if self.status.as_ref().map(|notice| &notice.message) != Some(&message) {
                    self.status = Some(Notice::error(message));
                }
            }
        }
    }

    async fn apply_events<S: StateStore>(
        &mut self,
        events: Vec<TreeEvent>,
        supplier: &TreeSupplier<D, S>,
    ) {
        let mut reload_roots = false;
        let mut refresh = Vec::new();
        for event in events {
            match event {
                TreeEvent::Notice(notice) => self.status = Some(notice),
                TreeEvent::Changed(ChangeScope::Whole) => reload_roots = true,
                TreeEvent::Changed(ChangeScope::Node(key)) => {
                    if !refresh.contains(&key) {
                        refresh.push(key);
                    }
                }
            }
        }

        if reload_roots {
            self.tree.reload_roots(supplier).await;
        }
        for key in refresh {
            self.tree.refresh_key(supplier, &key).await;
        }
    }

    fn screen(&self) -> Screen {
        Screen {
            tree: self.tree.lines(),
            selected: self.tree.selected(),
            output: self.output.clone(),
            status: self.status.clone(),
            show_help: self.show_help,
            palette: self.palette.as_ref().map(Palette::view),
        }
    }
}

#[must_use]
pub fn ui_name() -> &'static str {
    "sqlnav-tui"
}

/// Runs the explorer until the user quits. Async work is driven through
/// `runtime` from the UI thread.
pub fn run<D: Driver, S: StateStore>(
    dispatcher: &CommandDispatcher<D, S>,
    runtime: &Runtime,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, dispatcher, runtime);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<CrosstermTerminal, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut CrosstermTerminal) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn drain_events(events: &mut broadcast::Receiver<TreeEvent>) -> Vec<TreeEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "tree events lagged, reloading");
                drained.push(TreeEvent::Changed(ChangeScope::Whole));
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
        }
    }
}

fn run_loop<D: Driver, S: StateStore>(
    terminal: &mut CrosstermTerminal,
    dispatcher: &CommandDispatcher<D, S>,
    runtime: &Runtime,
) -> Result<(), TuiError> {
    let supplier = Arc::clone(dispatcher.supplier());
    let mut events = supplier.subscribe();
    let mut app = TuiApp::default();
    let mut clipboard = SystemClipboard::default();
    runtime.block_on(app.tree.reload_roots(&supplier));

    loop {
        let pending = drain_events(&mut events);
        if !pending.is_empty() {
            debug!(events = pending.len(), "applying tree events");
            runtime.block_on(app.apply_events(pending, &supplier));
        }

        let screen = app.screen();
        terminal.draw(|frame| render_screen(frame, &screen))?;

        if !event::poll(TICK_RATE)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let Some(effect) = map_key_event(key).and_then(|msg| app.handle(msg)) else {
            if app.should_quit {
                break;
            }
            continue;
        };

        match effect {
            Effect::Expand(node) => runtime.block_on(app.tree.expand(&supplier, &node)),
            Effect::Collapse(key) => app.tree.collapse(&key),
            Effect::RefreshKey(key) => runtime.block_on(app.tree.refresh_key(&supplier, &key)),
            Effect::Run(id, target) => {
                let mut ui = TerminalInteraction::new(terminal, &mut clipboard, app.screen());
                let outcome = runtime.block_on(dispatcher.execute(id, target.as_ref(), &mut ui));
                let notices = ui.into_notices();
                app.apply_outcome(target, outcome, notices);
            }
        }
    }

    Ok(())
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('p')) | (_, KeyCode::Char(':')) => {
            Some(Msg::TogglePalette)
        }
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Esc) => Some(Msg::Dismiss),
        (_, KeyCode::Enter) => Some(Msg::Activate),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left | KeyCode::Char('h')) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right | KeyCode::Char('l')) => Some(Msg::Navigate(DirectionKey::Right)),
        (_, KeyCode::PageUp) => Some(Msg::ScrollOutput(-PAGE_SCROLL)),
        (_, KeyCode::PageDown) => Some(Msg::ScrollOutput(PAGE_SCROLL)),
        (_, KeyCode::Delete | KeyCode::Char('d')) => Some(Msg::DeleteSelected),
        (_, KeyCode::Char('a')) => Some(Msg::Run(CommandId::AddConnection)),
        (_, KeyCode::Char('e')) => Some(Msg::Run(CommandId::ExecuteQuery)),
        (_, KeyCode::Char('r')) => Some(Msg::Run(CommandId::Refresh)),
        (_, KeyCode::Char('R')) => Some(Msg::Run(CommandId::Reconnect)),
        (_, KeyCode::Char('s')) => Some(Msg::Run(CommandId::ShowStructure)),
        (_, KeyCode::Char('i')) => Some(Msg::Run(CommandId::ShowIndexes)),
        (_, KeyCode::Char('c')) => Some(Msg::Run(CommandId::CopyCreateTable)),
        _ => None,
    }
}
