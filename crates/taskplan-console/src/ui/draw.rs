use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Clear, List, ListItem, Paragraph, Tabs, Widget, Wrap,
};

use super::{App, InputMode, ParamRow, Tab};
use crate::editor::{EditorState, TaskMode};
use crate::sanitize::sanitize;
use crate::task::{Task, TaskEntry, TaskState, legal_actions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Choice,
    Toggle,
}

struct Field {
    label: &'static str,
    value: String,
    kind: FieldKind,
}

impl Field {
    fn text(label: &'static str, value: &str) -> Self {
        Self {
            label,
            value: value.to_string(),
            kind: FieldKind::Text,
        }
    }
}

fn fields(state: &EditorState) -> Vec<Field> {
    match state {
        EditorState::Closed => Vec::new(),
        EditorState::Param(d) => {
            let mut out = vec![
                Field::text("name", &d.fields.name),
                Field::text("condition", &d.fields.condition),
            ];
            // Selectors exist only once the param has values.
            if d.has_selectors() {
                for (label, uuid) in [
                    ("default value", &d.fields.default_param_value),
                    ("deprecated value", &d.fields.deprecated_param_value),
                ] {
                    out.push(Field {
                        label,
                        value: d.option_name(uuid).unwrap_or(uuid.as_str()).to_string(),
                        kind: FieldKind::Choice,
                    });
                }
            }
            out
        }
        EditorState::ParamValue(d) => vec![
            Field::text("name", &d.name),
            Field::text("template defaults", &d.template_defaults),
            Field::text("template deprecated", &d.template_deprecated),
            Field {
                label: "template",
                value: checkbox(d.is_template),
                kind: FieldKind::Toggle,
            },
        ],
        EditorState::Batch(d) => vec![Field::text("document", &d.document)],
        EditorState::Task(d) => vec![
            Field::text("iterations", &d.iterations),
            Field::text("device", &d.device),
            Field::text("tags", &d.tags),
            Field {
                label: "test run",
                value: checkbox(d.is_test),
                kind: FieldKind::Toggle,
            },
        ],
    }
}

fn checkbox(on: bool) -> String {
    if on { "[x]".into() } else { "[ ]".into() }
}

pub(super) fn field_count(state: &EditorState) -> usize {
    fields(state).len()
}

pub(super) fn field_is_toggle(state: &EditorState, focus: usize) -> bool {
    fields(state)
        .get(focus)
        .is_some_and(|f| f.kind == FieldKind::Toggle)
}

/// The text buffer behind field `focus`, if that field is free text.
pub(super) fn field_text_mut(state: &mut EditorState, focus: usize) -> Option<&mut String> {
    match (state, focus) {
        (EditorState::Param(d), 0) => Some(&mut d.fields.name),
        (EditorState::Param(d), 1) => Some(&mut d.fields.condition),
        (EditorState::ParamValue(d), 0) => Some(&mut d.name),
        (EditorState::ParamValue(d), 1) => Some(&mut d.template_defaults),
        (EditorState::ParamValue(d), 2) => Some(&mut d.template_deprecated),
        (EditorState::Batch(d), 0) => Some(&mut d.document),
        (EditorState::Task(d), 0) => Some(&mut d.iterations),
        (EditorState::Task(d), 1) => Some(&mut d.device),
        (EditorState::Task(d), 2) => Some(&mut d.tags),
        _ => None,
    }
}

/// Steps a selector or flips a toggle; text fields are left alone.
pub(super) fn cycle_field(state: &mut EditorState, focus: usize, step: isize) {
    match (state, focus) {
        (EditorState::Param(d), 2) => d.cycle_default(step),
        (EditorState::Param(d), 3) => d.cycle_deprecated(step),
        (EditorState::ParamValue(d), 3) => d.is_template = !d.is_template,
        (EditorState::Task(d), 3) => d.is_test = !d.is_test,
        _ => {}
    }
}

fn state_color(state: TaskState) -> Color {
    match state {
        TaskState::Running => Color::Green,
        TaskState::Queued => Color::Cyan,
        TaskState::Paused => Color::Yellow,
        TaskState::Finished => Color::Gray,
        TaskState::Terminated => Color::Red,
    }
}

fn progress_bar(frac: f64, width: usize) -> String {
    let filled = ((frac.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        (frac.clamp(0.0, 1.0) * 100.0).round() as u64
    )
}

impl App {
    pub(super) fn draw(&mut self, f: &mut ratatui::Frame) {
        let size = f.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(notice_height(self.notices.len())),
                Constraint::Length(1),
            ])
            .split(size);

        self.draw_header(f, chunks[0]);
        match self.tab {
            Tab::Tasks => self.draw_tasks(f, chunks[1]),
            Tab::Params => self.draw_params(f, chunks[1]),
        }
        self.draw_notices(f, chunks[2]);
        self.draw_footer(f, chunks[3]);

        self.draw_modal(f);
    }

    fn draw_header(&self, f: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(22), Constraint::Min(0)])
            .split(area);

        let idx: usize = match self.tab {
            Tab::Tasks => 0,
            Tab::Params => 1,
        };
        let tabs = Tabs::new(vec![Line::from("Tasks"), Line::from("Params")])
            .select(idx)
            .block(Block::default().borders(Borders::BOTTOM))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow));
        f.render_widget(tabs, cols[0]);

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let refresh = match (&self.refresh_error, self.last_refresh) {
            (Some(_), _) => Span::styled("refresh failing", Style::default().fg(Color::Red)),
            (None, Some(at)) => Span::styled(
                format!("refreshed {}s ago", at.elapsed().as_secs()),
                Style::default().fg(Color::Gray),
            ),
            (None, None) => Span::styled("waiting for state", Style::default().fg(Color::Gray)),
        };
        let mut spans = vec![
            Span::styled("Taskplan", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled(self.dispatcher.url(""), Style::default().fg(Color::Gray)),
            Span::raw("  "),
            refresh,
        ];
        if !self.in_flight.is_empty() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("{} pending", self.in_flight.len()),
                Style::default().fg(Color::LightBlue),
            ));
        }
        if let Some(filter) = &self.filter {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("like {}", filter.source().unwrap_or("?")),
                Style::default().fg(Color::Magenta),
            ));
        }
        spans.push(Span::raw("  "));
        spans.push(Span::styled(now, Style::default().fg(Color::Yellow)));

        let p = Paragraph::new(Text::from(Line::from(spans))).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, cols[1]);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame, area: Rect) {
        let hint = if self.drag.is_some() {
            "[j/k] Move over target  [Enter] Drop  [Esc] Abandon"
        } else {
            match (&self.input, self.tab) {
                (InputMode::Editor { .. }, _) => {
                    "[Tab/Up/Down] Field  [Left/Right/Space] Choose  [Enter] Save  [Esc] Close"
                }
                (InputMode::Iterations { .. } | InputMode::Tags { .. }, _) => {
                    "[Enter] Submit  [Esc] Cancel"
                }
                (InputMode::ConfirmRemove { .. }, _) => "[y/Enter] Remove  [n/Esc] Keep",
                (InputMode::Normal, Tab::Tasks) => {
                    "[j/k] Move  [n] New  [g] Grab  [t] Tags  [Z] Pause all  [u] Clear filter  [Tab] Params  [q] Quit"
                }
                (InputMode::Normal, Tab::Params) => {
                    "[j/k] Move  [a] New param  [b] Batch  [v] New value  [e] Edit  [f] Force  [s] Sort  [g] Grab  [Tab] Tasks  [q] Quit"
                }
            }
        };
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_tasks(&self, f: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
            .split(area);

        let snap = self.store.current();
        let detail_col = self.cfg.ui.detail_col.as_str();
        let items: Vec<ListItem> = self
            .task_entries()
            .into_iter()
            .map(|entry| match entry {
                TaskEntry::Stub { uuid } => ListItem::new(Line::from(Span::styled(
                    format!("Loading... {}", sanitize(uuid)),
                    Style::default().fg(Color::DarkGray),
                ))),
                TaskEntry::Loaded(task) => {
                    let queue_index = snap.queue_index(&task.uuid);
                    ListItem::new(self.task_line(task, queue_index, detail_col))
                }
            })
            .collect();

        let title = match &self.filter {
            Some(_) => "Tasks (filtered)",
            None => "Tasks",
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow))
            .highlight_symbol("> ");
        let mut state = self.task_list.clone();
        f.render_stateful_widget(list, cols[0], &mut state);

        let detail = match self.selected_entry() {
            Some(TaskEntry::Loaded(task)) => task_detail(task),
            Some(TaskEntry::Stub { uuid }) => {
                Text::from(format!("{} (details requested)", sanitize(uuid)))
            }
            None => Text::from("no task selected"),
        };
        let p = Paragraph::new(detail).wrap(Wrap { trim: false }).block(
            Block::default()
                .title("Details")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        f.render_widget(p, cols[1]);
    }

    fn task_line(&self, task: &Task, queue_index: Option<usize>, detail_col: &str) -> Line<'static> {
        let marker = match &self.drag {
            Some(d) if d.payload().key == task.uuid => "* ",
            Some(d) if d.hovered() == Some(task.uuid.as_str()) && d.highlighted() => "v ",
            _ => "  ",
        };
        let name = match task.display_name() {
            Ok(n) => Span::raw(sanitize(&n)),
            Err(e) => Span::styled(format!("<{e}>"), Style::default().fg(Color::Red)),
        };
        let detail = match task.detail_value(detail_col) {
            Ok(v) => sanitize(&v),
            Err(e) => format!("<{e}>"),
        };
        let mut spans = vec![
            Span::styled(marker, Style::default().fg(Color::LightMagenta)),
            Span::styled(
                format!("{:<10}", task.state.as_str()),
                Style::default().fg(state_color(task.state)),
            ),
            Span::raw(format!("{:<16}", task.status_text(queue_index))),
            name,
            Span::raw("  "),
            Span::styled(progress_bar(task.progress(), 10), Style::default().fg(Color::Green)),
            Span::raw("  "),
            Span::styled(detail, Style::default().fg(Color::Gray)),
        ];
        if let Some(action) = task.current_action_label() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(action, Style::default().fg(Color::Yellow)));
        }
        if task.had_error {
            spans.push(Span::styled("  error", Style::default().fg(Color::Red)));
        }
        if !task.tags.is_empty() {
            spans.push(Span::styled(
                format!("  [{}]", sanitize(&task.tags.join(", "))),
                Style::default().fg(Color::LightBlue),
            ));
        }
        Line::from(spans)
    }

    fn draw_params(&self, f: &mut ratatui::Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .param_rows()
            .into_iter()
            .map(|row| match row {
                ParamRow::Group(label) => ListItem::new(Line::from(Span::styled(
                    sanitize(label),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ))),
                ParamRow::Param(p) => {
                    let marker = match &self.drag {
                        Some(d) if d.payload().key == p.uuid => "* ",
                        Some(d) if d.hovered() == Some(p.uuid.as_str()) && d.highlighted() => "v ",
                        _ => "  ",
                    };
                    let mut spans = vec![
                        Span::styled(marker, Style::default().fg(Color::LightMagenta)),
                        Span::styled(sanitize(&p.name), Style::default().fg(Color::White)),
                        Span::styled(
                            format!("  rank {}", p.sorting),
                            Style::default().fg(Color::DarkGray),
                        ),
                    ];
                    if p.force {
                        spans.push(Span::styled("  forced", Style::default().fg(Color::Yellow)));
                    }
                    if !p.condition.trim().is_empty() {
                        spans.push(Span::styled(
                            format!("  if {}", sanitize(&p.condition)),
                            Style::default().fg(Color::Gray),
                        ));
                    }
                    ListItem::new(Line::from(spans))
                }
                ParamRow::Value(p, v) => {
                    let mut spans = vec![Span::raw("      "), Span::raw(sanitize(&v.name))];
                    if p.effective_default() == Some(v.uuid.as_str()) {
                        spans.push(Span::styled("  default", Style::default().fg(Color::Green)));
                    }
                    if p.effective_deprecated() == Some(v.uuid.as_str()) {
                        spans.push(Span::styled(
                            "  deprecated",
                            Style::default().fg(Color::DarkGray),
                        ));
                    }
                    if v.is_template {
                        spans.push(Span::styled("  template", Style::default().fg(Color::Magenta)));
                    }
                    ListItem::new(Line::from(spans))
                }
            })
            .collect();

        let title = if self.sort_params {
            "Params (sorting)"
        } else {
            "Params"
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            )
            .highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow))
            .highlight_symbol("> ");
        let mut state = self.param_list.clone();
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_notices(&self, f: &mut ratatui::Frame, area: Rect) {
        if area.height == 0 {
            return;
        }
        let visible = area.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = self
            .notices
            .iter()
            .rev()
            .take(visible)
            .rev()
            .map(|n| {
                let style = if n.failed {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default().fg(Color::Gray)
                };
                Line::from(vec![
                    Span::styled(
                        n.at.format("%H:%M:%S ").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(n.text.clone(), style),
                ])
            })
            .collect();
        let p = Paragraph::new(Text::from(lines)).block(
            Block::default()
                .title("Notifications")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
        f.render_widget(p, area);
    }

    fn draw_modal(&self, f: &mut ratatui::Frame) {
        let (title, text, px, py) = match &self.input {
            InputMode::Normal => return,
            InputMode::Editor { focus } => {
                let state = self.editors.state();
                (state.title(), editor_text(state, *focus), 70, 60)
            }
            InputMode::Iterations {
                action,
                uuid,
                buffer,
                error,
            } => {
                let mut text = vec![
                    Line::from(vec![
                        Span::styled("Task: ", Style::default().fg(Color::Yellow)),
                        Span::raw(sanitize(uuid)),
                    ]),
                    Line::from("total iterations  enter=submit  esc=cancel"),
                ];
                if let Some(e) = error {
                    text.push(Line::from(Span::styled(
                        format!("error: {e}"),
                        Style::default().fg(Color::Red),
                    )));
                }
                text.push(Line::from(""));
                text.push(Line::from(buffer.clone()));
                (format!("Iterations ({})", action.as_str()), Text::from(text), 60, 25)
            }
            InputMode::Tags { uuid, buffer } => {
                let text = vec![
                    Line::from(vec![
                        Span::styled("Task: ", Style::default().fg(Color::Yellow)),
                        Span::raw(sanitize(uuid)),
                    ]),
                    Line::from("comma separated  enter=save  esc=cancel"),
                    Line::from(""),
                    Line::from(buffer.clone()),
                ];
                ("Tags".to_string(), Text::from(text), 60, 25)
            }
            InputMode::ConfirmRemove { label, .. } => {
                let text = vec![
                    Line::from(vec![
                        Span::styled("Remove ", Style::default().fg(Color::Red)),
                        Span::raw(sanitize(label)),
                        Span::raw("?"),
                    ]),
                    Line::from(""),
                    Line::from("y=remove  n=keep"),
                ];
                ("Confirm".to_string(), Text::from(text), 50, 20)
            }
        };

        let area = centered_rect(px, py, f.area());
        let shadow = shadow_rect(area, f.area());
        f.render_widget(
            Fill {
                style: Style::default()
                    .bg(Color::Black)
                    .add_modifier(Modifier::DIM),
            },
            shadow,
        );
        f.render_widget(Clear, area);

        let p = Paragraph::new(text)
            .style(Style::default().fg(Color::White).bg(Color::DarkGray))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(sanitize(&title))
                    .borders(Borders::ALL)
                    .border_type(BorderType::Double),
            );
        f.render_widget(p, area);
    }
}

fn notice_height(count: usize) -> u16 {
    (count.min(5) as u16).saturating_add(2).max(3)
}

fn task_detail(task: &Task) -> Text<'static> {
    let label = Style::default().fg(Color::Yellow);
    let mut lines = vec![
        Line::from(vec![Span::styled("uuid: ", label), Span::raw(sanitize(&task.uuid))]),
        Line::from(vec![
            Span::styled("state: ", label),
            Span::styled(
                task.state.as_str(),
                Style::default().fg(state_color(task.state)),
            ),
            Span::raw(format!("  try {}", task.try_number)),
        ]),
        Line::from(vec![
            Span::styled("iterations: ", label),
            Span::raw(task.iterations_text()),
        ]),
    ];
    for column in ["created", "started", "saved"] {
        let value = task.detail_value(column).unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(format!("{column}: "), label),
            Span::raw(value),
        ]));
    }
    if let Some(device) = &task.device {
        lines.push(Line::from(vec![
            Span::styled("device: ", label),
            Span::raw(sanitize(device)),
        ]));
    }
    if task.is_test {
        lines.push(Line::from(Span::styled("test run", Style::default().fg(Color::Magenta))));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("params", label)));
    for p in &task.params {
        let line = match p.resolved_name() {
            Ok(name) => Line::from(format!("  {}", sanitize(&name))),
            Err(e) => Line::from(Span::styled(
                format!("  {}: {e}", sanitize(&p.value.name)),
                Style::default().fg(Color::Red),
            )),
        };
        lines.push(line);
    }

    if !task.metrics.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("metrics", label)));
        for name in task.metrics.keys() {
            let value = task
                .metric(name)
                .map(|v| format!("{v:.3}"))
                .unwrap_or_else(|| "N/A".into());
            lines.push(Line::from(format!("  {}: {value}", sanitize(name))));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("actions", label)));
    let keys: Vec<String> = legal_actions(task)
        .into_iter()
        .map(|a| format!("[{}] {}", a.key(), a.as_str()))
        .collect();
    lines.push(Line::from(keys.join("  ")));
    Text::from(lines)
}

fn editor_text(state: &EditorState, focus: usize) -> Text<'static> {
    let mut lines = Vec::new();
    for (i, field) in fields(state).into_iter().enumerate() {
        let focused = i == focus;
        let label_style = if focused {
            Style::default().fg(Color::Black).bg(Color::LightYellow)
        } else {
            Style::default().fg(Color::Yellow)
        };
        let value = match field.kind {
            FieldKind::Text if focused => format!("{}_", field.value),
            FieldKind::Choice => format!("< {} >", sanitize(&field.value)),
            _ => field.value,
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:<20}", field.label), label_style),
            Span::raw(" "),
            Span::raw(value),
        ]));
    }

    match state {
        EditorState::Batch(d) => {
            lines.push(Line::from(""));
            let keys = d.preview();
            lines.push(Line::from(Span::styled(
                format!("{} params", keys.len()),
                Style::default().fg(Color::Gray),
            )));
            lines.extend(keys.into_iter().map(|k| Line::from(format!("  {k}"))));
        }
        EditorState::Task(d) => {
            lines.push(Line::from(""));
            if let TaskMode::Rerun { source } = &d.mode {
                lines.push(Line::from(Span::styled(
                    format!("rerun of {}", sanitize(source)),
                    Style::default().fg(Color::Gray),
                )));
            }
            for sel in &d.selections {
                let line = match sel.resolved_name() {
                    Ok(name) => Line::from(format!("  {}", sanitize(&name))),
                    Err(e) => Line::from(Span::styled(
                        format!("  {}: {e}", sanitize(&sel.value.name)),
                        Style::default().fg(Color::Red),
                    )),
                };
                lines.push(line);
            }
        }
        _ => {}
    }
    Text::from(lines)
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn shadow_rect(inner: Rect, bounds: Rect) -> Rect {
    let max_x = bounds.x.saturating_add(bounds.width);
    let max_y = bounds.y.saturating_add(bounds.height);
    let x = inner.x.saturating_add(1).min(max_x.saturating_sub(1));
    let y = inner.y.saturating_add(1).min(max_y.saturating_sub(1));
    Rect {
        x,
        y,
        width: inner.width.min(max_x.saturating_sub(x)),
        height: inner.height.min(max_y.saturating_sub(y)),
    }
}

struct Fill {
    style: Style,
}

impl Widget for Fill {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for y in area.y..area.y.saturating_add(area.height) {
            for x in area.x..area.x.saturating_add(area.width) {
                buf[(x, y)].set_char(' ').set_style(self.style);
            }
        }
    }
}
