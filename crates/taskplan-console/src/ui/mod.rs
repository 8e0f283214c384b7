mod draw;

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;

use crate::catalog::{self, Param, ParamValue};
use crate::config::ClientConfig;
use crate::dispatch::{
    self, ActionArgs, ActionRoute, ChannelSink, Dispatch, DispatchEvent, HttpDispatcher,
};
use crate::editor::EditorCoordinator;
use crate::error::{Error, Result};
use crate::reorder::{DragSession, QueueSlot};
use crate::sanitize::sanitize;
use crate::snapshot::{
    FileSnapshotSource, HttpSnapshotSource, Poller, Snapshot, SnapshotSource, SnapshotStore,
};
use crate::task::{Task, TaskAction, TaskEntry, TaskFilter, actions::is_legal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Tasks,
    Params,
}

#[derive(Debug, Clone)]
enum InputMode {
    Normal,
    /// The coordinator's open editor has focus.
    Editor { focus: usize },
    Iterations {
        action: TaskAction,
        uuid: String,
        buffer: String,
        error: Option<String>,
    },
    Tags {
        uuid: String,
        buffer: String,
    },
    ConfirmRemove {
        uuid: String,
        label: String,
    },
}

#[derive(Debug, Clone)]
struct Notice {
    at: chrono::DateTime<chrono::Local>,
    text: String,
    failed: bool,
}

/// One line of the params tab.
#[derive(Debug, Clone, Copy)]
enum ParamRow<'a> {
    Group(&'a str),
    Param(&'a Param),
    Value(&'a Param, &'a ParamValue),
}

struct App {
    cfg: ClientConfig,
    store: SnapshotStore,
    snapshot_rx: Option<mpsc::Receiver<Result<Snapshot>>>,
    dispatcher: Arc<dyn Dispatch>,
    dispatch_rx: Option<mpsc::Receiver<DispatchEvent>>,
    editors: EditorCoordinator,
    tab: Tab,
    task_list: ListState,
    param_list: ListState,
    sort_params: bool,
    filter: Option<TaskFilter>,
    drag: Option<DragSession>,
    input: InputMode,
    notices: VecDeque<Notice>,
    in_flight: BTreeMap<u64, String>,
    last_refresh: Option<Instant>,
    refresh_error: Option<String>,
}

impl App {
    fn new(cfg: ClientConfig, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            cfg,
            store: SnapshotStore::new(),
            snapshot_rx: None,
            dispatcher,
            dispatch_rx: None,
            editors: EditorCoordinator::new(),
            tab: Tab::Tasks,
            task_list: ListState::default(),
            param_list: ListState::default(),
            sort_params: false,
            filter: None,
            drag: None,
            input: InputMode::Normal,
            notices: VecDeque::new(),
            in_flight: BTreeMap::new(),
            last_refresh: None,
            refresh_error: None,
        }
    }

    fn notify(&mut self, text: impl Into<String>, failed: bool) {
        let max = self.cfg.ui.max_notifications;
        push_bounded(
            &mut self.notices,
            Notice {
                at: chrono::Local::now(),
                text: sanitize(&text.into()),
                failed,
            },
            max,
        );
    }

    fn report<T>(&mut self, res: Result<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(kind = e.kind().as_str(), error = %e, "action failed");
                self.notify(format!("{}: {e}", e.kind().as_str()), true);
                None
            }
        }
    }

    fn drain_snapshots(&mut self) {
        let mut results = Vec::new();
        if let Some(rx) = self.snapshot_rx.as_ref() {
            while let Ok(res) = rx.try_recv() {
                results.push(res);
            }
        }
        for res in results {
            match res {
                Ok(snap) => self.apply_snapshot(snap),
                Err(e) => {
                    let msg = e.to_string();
                    if self.refresh_error.as_deref() != Some(msg.as_str()) {
                        self.notify(format!("refresh failed: {msg}"), true);
                    }
                    self.refresh_error = Some(msg);
                }
            }
        }
    }

    fn apply_snapshot(&mut self, snap: Snapshot) {
        self.store.replace(snap);
        self.last_refresh = Some(Instant::now());
        if self.refresh_error.take().is_some() {
            self.notify("refresh recovered", false);
        }
        let dispatcher = self.dispatcher.clone();
        let res = self.store.request_missing_details(dispatcher.as_ref());
        self.report(res);
        self.clamp_tasks();
        self.clamp_params();
    }

    fn drain_dispatch_events(&mut self) {
        let mut events = Vec::new();
        if let Some(rx) = self.dispatch_rx.as_ref() {
            while let Ok(ev) = rx.try_recv() {
                events.push(ev);
            }
        }
        for ev in events {
            match ev {
                DispatchEvent::Sent { ticket, label, .. } => {
                    self.in_flight.insert(ticket, label);
                }
                DispatchEvent::Completed {
                    ticket,
                    label,
                    path,
                    error,
                } => {
                    self.in_flight.remove(&ticket);
                    match error {
                        None => self.notify(format!("{label}: ok"), false),
                        Some(e) => {
                            self.notify(format!("{label} failed ({path}): {e}"), true);
                        }
                    }
                }
            }
        }
    }

    fn clamp_tasks(&mut self) {
        let n = self.task_entries().len();
        clamp_selection(&mut self.task_list, n);
    }

    fn clamp_params(&mut self) {
        let n = self.param_rows().len();
        clamp_selection(&mut self.param_list, n);
    }

    // Rows of the tasks tab: loaded tasks narrowed by the active filter,
    // stubs only when unfiltered.
    fn task_entries(&self) -> Vec<&TaskEntry> {
        self.store
            .current()
            .tasks
            .iter()
            .filter(|e| match (&self.filter, e.task()) {
                (None, _) => true,
                (Some(f), Some(t)) => f.matches(t),
                (Some(_), None) => false,
            })
            .collect()
    }

    fn selected_entry(&self) -> Option<&TaskEntry> {
        let idx = self.task_list.selected()?;
        self.task_entries().get(idx).copied()
    }

    fn selected_task(&self) -> Option<&Task> {
        self.selected_entry()?.task()
    }

    fn queue_slot<'a>(&'a self, task: &'a Task) -> Option<QueueSlot<'a>> {
        let index = self.store.current().queue_index(&task.uuid)?;
        Some(QueueSlot { task, index })
    }

    fn param_rows(&self) -> Vec<ParamRow<'_>> {
        let params = &self.store.current().params;
        if self.sort_params {
            return catalog::sorted_by_rank(params)
                .into_iter()
                .map(ParamRow::Param)
                .collect();
        }
        let mut rows = Vec::new();
        for members in catalog::group_params(params).into_values() {
            if let Some(first) = members.first() {
                rows.push(ParamRow::Group(first.group_label()));
            }
            for p in members {
                rows.push(ParamRow::Param(p));
                rows.extend(p.values.iter().map(|v| ParamRow::Value(p, v)));
            }
        }
        rows
    }

    fn selected_param_row(&self) -> Option<ParamRow<'_>> {
        let idx = self.param_list.selected()?;
        self.param_rows().get(idx).copied()
    }

    fn move_selection(&mut self, delta: isize) {
        let (len, list) = match self.tab {
            Tab::Tasks => (self.task_entries().len(), &mut self.task_list),
            Tab::Params => (self.param_rows().len(), &mut self.param_list),
        };
        if len == 0 {
            list.select(None);
            return;
        }
        let cur = list.selected().unwrap_or(0);
        let next = add_signed_saturating(cur, delta).min(len - 1);
        list.select(Some(next));
        self.update_hover();
    }

    fn update_hover(&mut self) {
        let Some(mut drag) = self.drag.take() else {
            return;
        };
        match self.tab {
            Tab::Tasks => {
                let slot = self.selected_task().and_then(|t| self.queue_slot(t));
                drag.hover(slot.as_ref());
            }
            Tab::Params => match self.selected_param_row() {
                Some(ParamRow::Param(p)) => drag.hover(Some(p)),
                _ => drag.hover::<Param>(None),
            },
        }
        self.drag = Some(drag);
    }

    fn grab(&mut self) {
        let session = match self.tab {
            Tab::Tasks => self
                .selected_task()
                .and_then(|t| self.queue_slot(t))
                .and_then(|slot| DragSession::grab(&slot)),
            Tab::Params if self.sort_params => match self.selected_param_row() {
                Some(ParamRow::Param(p)) => DragSession::grab(p),
                _ => None,
            },
            Tab::Params => {
                self.notify("switch to sorting mode (s) to reorder params", false);
                return;
            }
        };
        match session {
            Some(s) => {
                let key = s.payload().key.clone();
                self.drag = Some(s);
                self.notify(format!("grabbed {key}: move and press Enter to drop"), false);
            }
            None => self.notify("only queued tasks can be moved", false),
        }
    }

    fn drop_drag(&mut self) {
        let Some(session) = self.drag.take() else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        let res = match self.tab {
            Tab::Tasks => match self.selected_task().and_then(|t| self.queue_slot(t)) {
                Some(slot) => session.drop_on(&slot, dispatcher.as_ref()),
                None => Ok(false),
            },
            Tab::Params => match self.selected_param_row() {
                Some(ParamRow::Param(p)) => session.drop_on(p, dispatcher.as_ref()),
                _ => Ok(false),
            },
        };
        if let Some(false) = self.report(res) {
            self.notify("drop target rejected the move", false);
        }
    }

    fn run_task_action(&mut self, action: TaskAction) {
        let Some(task) = self.selected_task().cloned() else {
            return;
        };
        if !is_legal(&task, action) {
            return;
        }
        match action {
            a if a.needs_iterations() => {
                self.input = InputMode::Iterations {
                    action,
                    uuid: task.uuid.clone(),
                    buffer: task.total_iterations.to_string(),
                    error: None,
                };
            }
            TaskAction::Remove => {
                let label = task.display_name().unwrap_or_else(|_| task.uuid.clone());
                self.input = InputMode::ConfirmRemove {
                    uuid: task.uuid.clone(),
                    label,
                };
            }
            _ => {
                let args = self.action_args(&task, None);
                self.route_action(action, &task.uuid, &args);
            }
        }
    }

    fn action_args(&self, task: &Task, iterations: Option<u64>) -> ActionArgs {
        ActionArgs {
            iterations,
            device: task
                .device
                .clone()
                .or_else(|| self.cfg.tasks.device().map(str::to_string)),
        }
    }

    fn route_action(&mut self, action: TaskAction, uuid: &str, args: &ActionArgs) {
        let res = dispatch::route_task_action(action, uuid, args);
        let Some(route) = self.report(res) else {
            return;
        };
        match route {
            ActionRoute::Send(req) => {
                tracing::info!(action = action.as_str(), task = uuid, "dispatch action");
                self.dispatcher.dispatch(req);
            }
            ActionRoute::Open { path } => {
                let url = self.dispatcher.url(&path);
                self.notify(format!("log: {url}"), false);
            }
            ActionRoute::Local(local) => self.run_local_action(local, uuid),
        }
    }

    fn run_local_action(&mut self, action: TaskAction, uuid: &str) {
        let Some(task) = self.store.current().find_task(uuid).cloned() else {
            return;
        };
        match action {
            TaskAction::EditConfig => {
                self.editors.edit_task(&task, &self.cfg.tasks);
                self.input = InputMode::Editor { focus: 0 };
            }
            TaskAction::Rerun => {
                self.editors.rerun_task(&task, &self.cfg.tasks);
                self.input = InputMode::Editor { focus: 0 };
            }
            TaskAction::FilterSimilar => {
                self.filter = Some(TaskFilter::like(&task));
                self.task_list.select(Some(0));
                self.clamp_tasks();
            }
            _ => {}
        }
    }

    fn submit_iterations(&mut self) {
        let InputMode::Iterations {
            action,
            uuid,
            buffer,
            error,
        } = &mut self.input
        else {
            return;
        };
        let n = match buffer.trim().parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                *error = Some("enter a positive number".into());
                return;
            }
        };
        let (action, uuid) = (*action, uuid.clone());
        self.input = InputMode::Normal;
        let args = match self.store.current().find_task(&uuid) {
            Some(task) => self.action_args(task, Some(n)),
            None => ActionArgs {
                iterations: Some(n),
                device: self.cfg.tasks.device().map(str::to_string),
            },
        };
        self.route_action(action, &uuid, &args);
    }

    fn submit_tags(&mut self) {
        let InputMode::Tags { uuid, buffer } = &self.input else {
            return;
        };
        let tags: Vec<String> = buffer
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        let res = dispatch::set_tags_request(uuid, &tags);
        self.input = InputMode::Normal;
        if let Some(req) = self.report(res) {
            self.dispatcher.dispatch(req);
        }
    }

    fn open_editor(&mut self, open: impl FnOnce(&mut EditorCoordinator, &ClientConfig, &Snapshot)) {
        open(&mut self.editors, &self.cfg, self.store.current());
        self.input = InputMode::Editor { focus: 0 };
    }

    fn save_editor(&mut self) {
        let dispatcher = self.dispatcher.clone();
        let res = self.editors.save(dispatcher.as_ref());
        self.input = InputMode::Normal;
        self.report(res);
    }

    fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers) -> Result<bool> {
        if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
            return Ok(true);
        }

        match &mut self.input {
            InputMode::Normal => {}
            InputMode::Editor { focus } => {
                let focus = *focus;
                self.handle_editor_key(focus, code, mods);
                return Ok(false);
            }
            InputMode::Iterations { .. } | InputMode::Tags { .. } => {
                self.handle_prompt_key(code);
                return Ok(false);
            }
            InputMode::ConfirmRemove { uuid, .. } => {
                match code {
                    KeyCode::Enter | KeyCode::Char('y') => {
                        let uuid = uuid.clone();
                        self.input = InputMode::Normal;
                        self.route_action(TaskAction::Remove, &uuid, &ActionArgs::default());
                    }
                    KeyCode::Esc | KeyCode::Char('n') => self.input = InputMode::Normal,
                    _ => {}
                }
                return Ok(false);
            }
        }

        if self.drag.is_some() {
            match code {
                KeyCode::Enter => self.drop_drag(),
                KeyCode::Esc => {
                    self.drag = None;
                    self.notify("move abandoned", false);
                }
                KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
                KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
                _ => {}
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Tab | KeyCode::BackTab => {
                self.tab = match self.tab {
                    Tab::Tasks => Tab::Params,
                    Tab::Params => Tab::Tasks,
                };
            }
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::Char('g') => self.grab(),
            _ => match self.tab {
                Tab::Tasks => self.handle_tasks_key(code),
                Tab::Params => self.handle_params_key(code),
            },
        }
        Ok(false)
    }

    fn prompt_buffer(&mut self) -> Option<&mut String> {
        match &mut self.input {
            InputMode::Iterations { buffer, .. } | InputMode::Tags { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    fn handle_prompt_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.input = InputMode::Normal,
            KeyCode::Enter if matches!(self.input, InputMode::Iterations { .. }) => {
                self.submit_iterations();
            }
            KeyCode::Enter => self.submit_tags(),
            KeyCode::Backspace => {
                if let Some(buf) = self.prompt_buffer() {
                    buf.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(buf) = self.prompt_buffer() {
                    buf.push(c);
                }
            }
            _ => {}
        }
    }

    fn handle_tasks_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('n') => {
                self.open_editor(|ed, cfg, snap| ed.new_task(&cfg.tasks, &snap.params));
            }
            KeyCode::Char('Z') => {
                let res = dispatch::pause_all_request();
                if let Some(req) = self.report(res) {
                    self.dispatcher.dispatch(req);
                }
            }
            KeyCode::Char('t') => {
                if let Some(task) = self.selected_task() {
                    self.input = InputMode::Tags {
                        uuid: task.uuid.clone(),
                        buffer: task.tags.join(", "),
                    };
                }
            }
            KeyCode::Char('u') => {
                if self.filter.take().is_some() {
                    self.clamp_tasks();
                }
            }
            KeyCode::Char(c) => {
                if let Some(action) = TaskAction::ALL.into_iter().find(|a| a.key() == c) {
                    self.run_task_action(action);
                }
            }
            _ => {}
        }
    }

    fn handle_params_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('a') => self.open_editor(|ed, _, _| ed.new_param()),
            KeyCode::Char('b') => self.open_editor(|ed, _, _| ed.open_batch()),
            KeyCode::Char('s') => {
                self.sort_params = !self.sort_params;
                self.param_list.select(Some(0));
                self.clamp_params();
            }
            KeyCode::Char('e') | KeyCode::Enter => match self.selected_param_row() {
                Some(ParamRow::Param(p)) => {
                    let p = p.clone();
                    self.open_editor(|ed, _, _| ed.edit_param(&p));
                }
                Some(ParamRow::Value(p, v)) => {
                    let (p, v) = (p.clone(), v.clone());
                    self.open_editor(|ed, _, _| ed.edit_value(&p, &v));
                }
                _ => {}
            },
            KeyCode::Char('v') => {
                if let Some(ParamRow::Param(p) | ParamRow::Value(p, _)) = self.selected_param_row() {
                    let p = p.clone();
                    self.open_editor(|ed, _, _| ed.new_value(&p));
                }
            }
            KeyCode::Char('f') => {
                if let Some(ParamRow::Param(p)) = self.selected_param_row() {
                    let res = catalog::force_param_request(&p.uuid, !p.force);
                    if let Some(req) = self.report(res) {
                        self.dispatcher.dispatch(req);
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_editor_key(&mut self, focus: usize, code: KeyCode, mods: KeyModifiers) {
        let count = draw::field_count(self.editors.state());
        let step_focus = |f: usize, d: isize| -> usize {
            if count == 0 {
                0
            } else {
                (f as isize + d).rem_euclid(count as isize) as usize
            }
        };
        match code {
            KeyCode::Esc => {
                self.editors.close();
                self.input = InputMode::Normal;
            }
            KeyCode::Enter => self.save_editor(),
            KeyCode::Char('s') if mods.contains(KeyModifiers::CONTROL) => self.save_editor(),
            KeyCode::Tab | KeyCode::Down => {
                self.input = InputMode::Editor {
                    focus: step_focus(focus, 1),
                };
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.input = InputMode::Editor {
                    focus: step_focus(focus, -1),
                };
            }
            KeyCode::Left => draw::cycle_field(self.editors.state_mut(), focus, -1),
            KeyCode::Right => draw::cycle_field(self.editors.state_mut(), focus, 1),
            KeyCode::Backspace => {
                if let Some(buf) = draw::field_text_mut(self.editors.state_mut(), focus) {
                    buf.pop();
                }
            }
            KeyCode::Char(' ') if draw::field_is_toggle(self.editors.state(), focus) => {
                draw::cycle_field(self.editors.state_mut(), focus, 1);
            }
            KeyCode::Char(c) => {
                if let Some(buf) = draw::field_text_mut(self.editors.state_mut(), focus) {
                    buf.push(c);
                }
            }
            _ => {}
        }
        if !self.editors.is_open() {
            self.input = InputMode::Normal;
        }
    }
}

/// Runs the interactive console until the operator quits.
///
/// With `snapshot_file`, the state feed is read from that JSON file instead of
/// the backend; actions still go to the backend.
pub fn run_tui(cfg: ClientConfig, snapshot_file: Option<PathBuf>) -> Result<()> {
    let (dtx, drx) = mpsc::channel();
    let dispatcher = Arc::new(HttpDispatcher::from_config(
        &cfg.server,
        Arc::new(ChannelSink::new(dtx)),
    )?);

    let source: Box<dyn SnapshotSource> = match snapshot_file {
        Some(path) => Box::new(FileSnapshotSource::new(path)),
        None => Box::new(HttpSnapshotSource::from_config(&cfg)?),
    };
    let (stx, srx) = mpsc::channel();
    let mut poller = Poller::spawn(source, cfg.refresh.interval(), stx)?;

    let mut app = App::new(cfg, dispatcher);
    app.snapshot_rx = Some(srx);
    app.dispatch_rx = Some(drx);

    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let result = run_loop(&mut terminal, app);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();
    poller.stop();
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<()> {
    let tick = Duration::from_millis(100);
    loop {
        app.drain_snapshots();
        app.drain_dispatch_events();

        let mut draw_panicked = false;
        let draw_result = terminal.draw(|f| {
            if catch_unwind(AssertUnwindSafe(|| app.draw(f))).is_err() {
                draw_panicked = true;
            }
        });
        if draw_panicked {
            tracing::error!("draw panicked");
            let _ = terminal.clear();
            continue;
        }
        if let Err(e) = draw_result {
            tracing::error!(error = %e, "draw failed");
            let _ = terminal.clear();
            continue;
        }

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            if let Event::Key(k) = event::read().map_err(|e| Error::msg(e.to_string()))? {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if app.handle_key(k.code, k.modifiers)? {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn push_bounded<T>(q: &mut VecDeque<T>, v: T, max: usize) {
    if max == 0 {
        return;
    }
    while q.len() >= max {
        q.pop_front();
    }
    q.push_back(v);
}

fn add_signed_saturating(base: usize, delta: isize) -> usize {
    if delta >= 0 {
        base.saturating_add(delta as usize)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}

fn clamp_selection(list: &mut ListState, len: usize) {
    match (list.selected(), len) {
        (_, 0) => list.select(None),
        (None, _) => list.select(Some(0)),
        (Some(i), n) if i >= n => list.select(Some(n - 1)),
        _ => {}
    }
}
