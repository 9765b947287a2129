use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use sqlnav_core::connection::{ColumnInfo, IndexInfo, QueryResult, TableInfo};
use sqlnav_core::dispatcher::{CommandOutput, TableView};
use sqlnav_core::notice::{Notice, NoticeLevel};

use crate::tree_view::TreeLine;

const KEY_HINTS: &str =
    "Enter:open  a:add  e:query  r:refresh  d:delete  Ctrl+P:commands  ?:help  q:quit";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OutputPane {
    pub title: String,
    pub lines: Vec<String>,
    pub scroll: u16,
}

impl OutputPane {
    pub(crate) fn from_output(output: &CommandOutput) -> Self {
        let (title, lines) = match output {
            CommandOutput::Text { title, body } => {
                (title.clone(), body.lines().map(str::to_string).collect())
            }
            CommandOutput::Grid { title, result } => (title.clone(), result_lines(result)),
            CommandOutput::Structure { title, columns } => {
                (format!("{title} structure"), structure_lines(columns))
            }
            CommandOutput::Indexes { title, indexes } => {
                (format!("{title} indexes"), index_lines(indexes))
            }
            CommandOutput::Info { title, info } => (format!("{title} info"), info_lines(info)),
            CommandOutput::TableView(view) => {
                (format!("{}.{}", view.database, view.table), table_view_lines(view))
            }
        };
        Self {
            title,
            lines,
            scroll: 0,
        }
    }

    pub(crate) fn scroll_by(&mut self, delta: i32) {
        let max = u16::try_from(self.lines.len().saturating_sub(1)).unwrap_or(u16::MAX);
        let next = i32::from(self.scroll).saturating_add(delta).clamp(0, i32::from(max));
        self.scroll = u16::try_from(next).unwrap_or(max);
    }
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct Screen {
    pub tree: Vec<TreeLine>,
    pub selected: usize,
    pub output: OutputPane,
    pub status: Option<Notice>,
    pub show_help: bool,
    pub palette: Option<PaletteView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PaletteView {
    pub titles: Vec<&'static str>,
    pub selected: usize,
}

pub(crate) fn format_grid(headers: &[String], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let render_row = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" │ ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(render_row(headers));
    lines.push(
        widths
            .iter()
            .map(|width| "─".repeat(*width))
            .collect::<Vec<_>>()
            .join("─┼─"),
    );
    lines.extend(rows.iter().map(|row| render_row(row)));
    lines
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

fn result_lines(result: &QueryResult) -> Vec<String> {
    if result.columns.is_empty() {
        return vec!["Query OK, no rows returned".to_string()];
    }

    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            row.fields()
                .iter()
                .map(|(_, value)| value.clone().unwrap_or_else(|| "NULL".to_string()))
                .collect()
        })
        .collect();
    let mut lines = format_grid(&result.columns, &rows);
    lines.push(format!("{} row(s)", rows.len()));
    lines
}

fn structure_lines(columns: &[ColumnInfo]) -> Vec<String> {
    let rows: Vec<Vec<String>> = columns
        .iter()
        .map(|column| {
            vec![
                column.name.clone(),
                column.column_type.clone(),
                if column.nullable { "YES" } else { "NO" }.to_string(),
                column.key.clone(),
                column
                    .default_value
                    .clone()
                    .unwrap_or_else(|| "NULL".to_string()),
                column.extra.clone(),
                column.comment.clone(),
            ]
        })
        .collect();
    format_grid(
        &headers(&["Field", "Type", "Null", "Key", "Default", "Extra", "Comment"]),
        &rows,
    )
}

fn index_lines(indexes: &[IndexInfo]) -> Vec<String> {
    if indexes.is_empty() {
        return vec!["(no indexes)".to_string()];
    }
    let rows: Vec<Vec<String>> = indexes
        .iter()
        .map(|index| {
            vec![
                index.name.clone(),
                index.column.clone(),
                if index.unique { "YES" } else { "NO" }.to_string(),
                index.sequence.to_string(),
                index.index_type.clone(),
            ]
        })
        .collect();
    format_grid(&headers(&["Key", "Column", "Unique", "Seq", "Type"]), &rows)
}

fn info_lines(info: &TableInfo) -> Vec<String> {
    fn or_dash<T: ToString>(value: Option<&T>) -> String {
        value.map_or_else(|| "-".to_string(), ToString::to_string)
    }

    vec![
        format!("Name:           {}", info.name),
        format!("Engine:         {}", or_dash(info.engine.as_ref())),
        format!("Row format:     {}", or_dash(info.row_format.as_ref())),
        format!("Rows:           {}", or_dash(info.rows.as_ref())),
        format!("Data length:    {}", or_dash(info.data_length.as_ref())),
        format!("Index length:   {}", or_dash(info.index_length.as_ref())),
        format!("Auto increment: {}", or_dash(info.auto_increment.as_ref())),
        format!("Created:        {}", or_dash(info.created_at.as_ref())),
        format!("Updated:        {}", or_dash(info.updated_at.as_ref())),
        format!("Collation:      {}", or_dash(info.collation.as_ref())),
        format!("Comment:        {}", info.comment),
    ]
}

fn table_view_lines(view: &TableView) -> Vec<String> {
    let mut lines = vec!["Columns".to_string()];
    lines.extend(structure_lines(&view.columns));
    lines.push(String::new());
    lines.push("Indexes".to_string());
    lines.extend(index_lines(&view.indexes));
    lines.push(String::new());
    lines.push(format!("Default query: {}", view.default_query));
    lines.push("Press e to run a query against this table".to_string());
    lines
}

fn status_style(level: NoticeLevel) -> Style {
    match level {
        NoticeLevel::Info => Style::default().fg(Color::Green),
        NoticeLevel::Warning => Style::default().fg(Color::Yellow),
        NoticeLevel::Error => Style::default().fg(Color::Red),
    }
}

fn tree_line(line: &TreeLine, selected: bool) -> Line<'static> {
    let mut spans = vec![
        Span::raw(format!("{}{} ", "  ".repeat(line.depth), line.marker)),
        Span::styled(line.icon, Style::default().fg(line.color)),
        Span::raw(format!(" {}", line.label)),
    ];
    if let Some(description) = &line.description {
        spans.push(Span::styled(
            format!("  {description}"),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let line = Line::from(spans);
    if selected {
        line.style(Style::default().add_modifier(Modifier::REVERSED))
    } else {
        line
    }
}

pub(crate) fn render_screen(frame: &mut Frame<'_>, screen: &Screen) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let selected_label = screen
        .tree
        .get(screen.selected)
        .map_or("-", |line| line.label.as_str());
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            " Connections ",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Selected: {selected_label}")),
    ]))
    .block(Block::default().borders(Borders::ALL).title("sqlnav"));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(chunks[1]);

    let visible_rows = usize::from(body[0].height.saturating_sub(2)).max(1);
    let offset = screen.selected.saturating_sub(visible_rows - 1);
    let tree_lines: Vec<Line<'static>> = if screen.tree.is_empty() {
        vec![Line::from("No connections. Press a to add one.")]
    } else {
        screen
            .tree
            .iter()
            .enumerate()
            .map(|(index, line)| tree_line(line, index == screen.selected))
            .collect()
    };
    let tree = Paragraph::new(tree_lines)
        .scroll((u16::try_from(offset).unwrap_or(u16::MAX), 0))
        .block(Block::default().borders(Borders::ALL).title("Explorer"));
    frame.render_widget(tree, body[0]);

    let output_title = if screen.output.title.is_empty() {
        "Output".to_string()
    } else {
        screen.output.title.clone()
    };
    let output = Paragraph::new(
        screen
            .output
            .lines
            .iter()
            .map(|line| Line::from(line.clone()))
            .collect::<Vec<_>>(),
    )
    .scroll((screen.output.scroll, 0))
    .block(Block::default().borders(Borders::ALL).title(output_title))
    .alignment(Alignment::Left);
    frame.render_widget(output, body[1]);

    let status = screen.status.as_ref().map_or_else(
        || Line::from("Ready"),
        |notice| Line::styled(notice.message.clone(), status_style(notice.level)),
    );
    let footer = Paragraph::new(vec![Line::from(KEY_HINTS), status])
        .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, chunks[2]);

    if let Some(palette) = &screen.palette {
        render_palette(frame, palette);
    }
    if screen.show_help {
        render_help_popup(frame);
    }
}

fn render_palette(frame: &mut Frame<'_>, palette: &PaletteView) {
    let lines: Vec<Line<'static>> = palette
        .titles
        .iter()
        .enumerate()
        .map(|(index, title)| {
            if index == palette.selected {
                Line::styled(
                    format!("> {title}"),
                    Style::default().add_modifier(Modifier::REVERSED),
                )
            } else {
                Line::from(format!("  {title}"))
            }
        })
        .collect();
    render_modal(frame, "Commands", lines);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    render_modal(
        frame,
        "Help",
        vec![
            Line::from("Arrows or hjkl: move, expand, collapse"),
            Line::from("Enter: expand, connect, retry or open table"),
            Line::from("a: add connection"),
            Line::from("e: query the open table, else the selected database"),
            Line::from("r: refresh selected node"),
            Line::from("d: delete the selected item"),
            Line::from("s / i: table structure / indexes"),
            Line::from("c: copy CREATE TABLE"),
            Line::from("PgUp / PgDn: scroll output"),
            Line::from("Ctrl+P or :: all commands for the selection"),
            Line::from("q: quit"),
        ],
    );
}

pub(crate) fn render_modal(frame: &mut Frame<'_>, title: &str, lines: Vec<Line<'static>>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    frame.render_widget(modal, area);
}

pub(crate) fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}
