//! Editor coordination.
//!
//! At most one editor is open across the whole console. Every `open_*` /
//! `new_*` replaces whatever was open, `close` discards the draft, and
//! `save` dispatches exactly one request and closes regardless of outcome.

use serde_json::{Value, json};

use crate::catalog::template::{ParamValueRef, arg_text};
use crate::catalog::{self, Param, ParamFields, ParamValue, ParamValueFields};
use crate::config::TasksConfig;
use crate::dispatch::{Dispatch, Endpoint, Request, endpoints};
use crate::error::{Error, Result};
use crate::task::Task;

pub const NEW_PARAM_TITLE: &str = "New parameter";

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDraft {
    pub uuid: Option<String>,
    pub title: String,
    pub fields: ParamFields,
    /// `(uuid, name)` of the param's values; empty means no selectors.
    pub options: Vec<(String, String)>,
}

impl ParamDraft {
    fn blank() -> Self {
        Self {
            uuid: None,
            title: NEW_PARAM_TITLE.to_string(),
            fields: ParamFields::default(),
            options: Vec::new(),
        }
    }

    fn from_param(p: &Param) -> Self {
        let selectors = p.value_selectors();
        Self {
            uuid: Some(p.uuid.clone()),
            title: p.name.clone(),
            fields: ParamFields {
                name: p.name.clone(),
                condition: p.condition.clone(),
                default_param_value: selectors
                    .as_ref()
                    .map(|s| s.default_value.clone())
                    .unwrap_or_default(),
                deprecated_param_value: selectors
                    .map(|s| s.deprecated_value)
                    .unwrap_or_default(),
            },
            options: p
                .values
                .iter()
                .map(|v| (v.uuid.clone(), v.name.clone()))
                .collect(),
        }
    }

    pub fn has_selectors(&self) -> bool {
        !self.options.is_empty()
    }

    fn cycled(&self, current: &str, step: isize) -> Option<String> {
        let n = self.options.len() as isize;
        if n == 0 {
            return None;
        }
        let at = self
            .options
            .iter()
            .position(|(uuid, _)| uuid == current)
            .map(|i| i as isize)
            .unwrap_or(0);
        let next = (at + step).rem_euclid(n) as usize;
        self.options.get(next).map(|(uuid, _)| uuid.clone())
    }

    pub fn cycle_default(&mut self, step: isize) {
        if let Some(next) = self.cycled(&self.fields.default_param_value, step) {
            self.fields.default_param_value = next;
        }
    }

    pub fn cycle_deprecated(&mut self, step: isize) {
        if let Some(next) = self.cycled(&self.fields.deprecated_param_value, step) {
            self.fields.deprecated_param_value = next;
        }
    }

    pub fn option_name(&self, uuid: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(u, _)| u == uuid)
            .map(|(_, name)| name.as_str())
    }

    pub fn request(&self) -> Result<Request> {
        match &self.uuid {
            Some(uuid) => catalog::edit_param_request(uuid, &self.fields),
            None => catalog::create_param_request(&self.fields),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamValueDraft {
    pub param: String,
    pub value: Option<String>,
    pub name: String,
    pub is_template: bool,
    /// One entry per placeholder, comma separated; `\,` is a literal comma.
    pub template_defaults: String,
    pub template_deprecated: String,
    pub config: Value,
    loaded_defaults: Vec<Value>,
    loaded_deprecated: Vec<Value>,
}

fn join_args(items: &[Value]) -> String {
    items
        .iter()
        .map(|v| arg_text(v).replace('\\', "\\\\").replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inverse of `join_args`. Entries whose text is unchanged keep the value
/// they were loaded with, so numbers stay numbers.
fn split_args(text: &str, loaded: &[Value]) -> Vec<Value> {
    let mut items = Vec::new();
    let mut cur = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => cur.push(chars.next().unwrap_or('\\')),
            ',' => items.push(std::mem::take(&mut cur)),
            c => cur.push(c),
        }
    }
    items.push(cur);

    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| match loaded.get(i) {
            Some(v) if arg_text(v) == s => v.clone(),
            _ => Value::String(s.to_string()),
        })
        .collect()
}

impl ParamValueDraft {
    fn blank(param: &Param) -> Self {
        Self {
            param: param.uuid.clone(),
            value: None,
            name: String::new(),
            is_template: false,
            template_defaults: String::new(),
            template_deprecated: String::new(),
            config: json!({}),
            loaded_defaults: Vec::new(),
            loaded_deprecated: Vec::new(),
        }
    }

    fn from_value(param: &Param, value: &ParamValue) -> Self {
        Self {
            param: param.uuid.clone(),
            value: Some(value.uuid.clone()),
            name: value.name.clone(),
            is_template: value.is_template,
            template_defaults: join_args(&value.template_defaults),
            template_deprecated: join_args(&value.template_deprecated),
            config: value.config.clone(),
            loaded_defaults: value.template_defaults.clone(),
            loaded_deprecated: value.template_deprecated.clone(),
        }
    }

    pub fn fields(&self) -> ParamValueFields {
        ParamValueFields {
            name: self.name.clone(),
            config: self.config.clone(),
            is_template: self.is_template,
            template_defaults: split_args(&self.template_defaults, &self.loaded_defaults),
            template_deprecated: split_args(&self.template_deprecated, &self.loaded_deprecated),
        }
    }

    pub fn request(&self) -> Result<Request> {
        let fields = self.fields();
        match &self.value {
            Some(value) => catalog::edit_value_request(&self.param, value, &fields),
            None => catalog::create_value_request(&self.param, &fields),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDraft {
    pub document: String,
}

impl BatchDraft {
    /// Empty text becomes `{}`; text that is not JSON is forwarded as a
    /// string for the backend to reject.
    pub fn config(&self) -> Value {
        let text = self.document.trim();
        if text.is_empty() {
            return json!({});
        }
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(self.document.clone()))
    }

    /// Dotted leaf keys of the document; each becomes one param.
    pub fn preview(&self) -> Vec<String> {
        fn walk(prefix: &str, v: &Value, out: &mut Vec<String>) {
            match v {
                Value::Object(map) => {
                    for (k, child) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, child, out);
                    }
                }
                _ if !prefix.is_empty() => out.push(prefix.to_string()),
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk("", &self.config(), &mut out);
        out
    }

    pub fn request(&self) -> Result<Request> {
        catalog::create_batch_request(self.config())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskMode {
    New,
    Rerun { source: String },
    Edit { uuid: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub mode: TaskMode,
    pub selections: Vec<ParamValueRef>,
    pub config: Value,
    pub iterations: String,
    pub device: String,
    /// Comma separated.
    pub tags: String,
    pub is_test: bool,
}

impl TaskDraft {
    fn blank(defaults: &TasksConfig, params: &[Param]) -> Self {
        let selections = params
            .iter()
            .filter_map(|p| {
                let value = p.find_value(p.effective_default()?)?;
                Some(ParamValueRef::from_wire(
                    &value.uuid,
                    &value.name,
                    value.template_defaults.clone(),
                ))
            })
            .collect();
        Self {
            mode: TaskMode::New,
            selections,
            config: json!({}),
            iterations: defaults.default_iterations.to_string(),
            device: defaults.device().unwrap_or_default().to_string(),
            tags: String::new(),
            is_test: false,
        }
    }

    fn from_task(task: &Task, mode: TaskMode, defaults: &TasksConfig) -> Self {
        Self {
            mode,
            selections: task.params.clone(),
            config: if task.config.is_null() {
                json!({})
            } else {
                task.config.clone()
            },
            iterations: task.total_iterations.to_string(),
            device: task
                .device
                .clone()
                .or_else(|| defaults.device().map(str::to_string))
                .unwrap_or_default(),
            tags: task.tags.join(", "),
            is_test: task.is_test,
        }
    }

    pub fn total_iterations(&self) -> Result<u64> {
        self.iterations
            .trim()
            .parse()
            .map_err(|_| Error::msg(format!("invalid iteration count '{}'", self.iterations)))
    }

    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn body(&self) -> Value {
        let device = self.device.trim();
        json!({
            "params": self.selections.iter().map(ParamValueRef::to_selection).collect::<Vec<_>>(),
            "config": self.config,
            "device": if device.is_empty() { Value::Null } else { Value::String(device.to_string()) },
            "tags": self.tag_list(),
        })
    }

    pub fn request(&self) -> Result<Request> {
        let n = self.total_iterations()?.to_string();
        let body = self.body();
        match &self.mode {
            TaskMode::Edit { uuid } => endpoints::EditTask.request_with_body(&[uuid.as_str(), n.as_str()], body),
            TaskMode::New | TaskMode::Rerun { .. } if self.is_test => {
                endpoints::StartTest.request_with_body(&[&n], body)
            }
            TaskMode::New | TaskMode::Rerun { .. } => endpoints::Start.request_with_body(&[&n], body),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum EditorState {
    #[default]
    Closed,
    Param(ParamDraft),
    ParamValue(ParamValueDraft),
    Batch(BatchDraft),
    Task(TaskDraft),
}

impl EditorState {
    pub fn title(&self) -> String {
        match self {
            EditorState::Closed => String::new(),
            EditorState::Param(d) => d.title.clone(),
            EditorState::ParamValue(d) if d.value.is_some() => "Edit value".to_string(),
            EditorState::ParamValue(_) => "New value".to_string(),
            EditorState::Batch(_) => "Add multiple parameters".to_string(),
            EditorState::Task(d) => match &d.mode {
                TaskMode::New => "New task".to_string(),
                TaskMode::Rerun { .. } => "Rerun task".to_string(),
                TaskMode::Edit { .. } => "Edit task".to_string(),
            },
        }
    }

    fn request(&self) -> Option<Result<Request>> {
        Some(match self {
            EditorState::Closed => return None,
            EditorState::Param(d) => d.request(),
            EditorState::ParamValue(d) => d.request(),
            EditorState::Batch(d) => d.request(),
            EditorState::Task(d) => d.request(),
        })
    }
}

#[derive(Debug, Default)]
pub struct EditorCoordinator {
    state: EditorState,
}

impl EditorCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EditorState {
        &mut self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, EditorState::Closed)
    }

    fn open(&mut self, next: EditorState) {
        if self.is_open() {
            tracing::debug!(replaced = %self.state.title(), "closing open editor");
        }
        self.state = next;
    }

    pub fn new_param(&mut self) {
        self.open(EditorState::Param(ParamDraft::blank()));
    }

    pub fn edit_param(&mut self, param: &Param) {
        self.open(EditorState::Param(ParamDraft::from_param(param)));
    }

    pub fn new_value(&mut self, param: &Param) {
        self.open(EditorState::ParamValue(ParamValueDraft::blank(param)));
    }

    pub fn edit_value(&mut self, param: &Param, value: &ParamValue) {
        self.open(EditorState::ParamValue(ParamValueDraft::from_value(param, value)));
    }

    pub fn open_batch(&mut self) {
        self.open(EditorState::Batch(BatchDraft::default()));
    }

    pub fn new_task(&mut self, defaults: &TasksConfig, params: &[Param]) {
        self.open(EditorState::Task(TaskDraft::blank(defaults, params)));
    }

    pub fn rerun_task(&mut self, task: &Task, defaults: &TasksConfig) {
        let mode = TaskMode::Rerun {
            source: task.uuid.clone(),
        };
        self.open(EditorState::Task(TaskDraft::from_task(task, mode, defaults)));
    }

    pub fn edit_task(&mut self, task: &Task, defaults: &TasksConfig) {
        let mode = TaskMode::Edit {
            uuid: task.uuid.clone(),
        };
        self.open(EditorState::Task(TaskDraft::from_task(task, mode, defaults)));
    }

    pub fn close(&mut self) {
        self.state = EditorState::Closed;
    }

    /// Dispatches the open draft and closes. Returns the label of the sent
    /// request, or `None` when nothing was open.
    pub fn save(&mut self, dispatcher: &dyn Dispatch) -> Result<Option<String>> {
        let draft = std::mem::take(&mut self.state);
        let Some(req) = draft.request() else {
            return Ok(None);
        };
        let req = req?;
        tracing::info!(path = %req.path, "editor save");
        let label = req.label.clone();
        dispatcher.dispatch(req);
        Ok(Some(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;
    use crate::task::TaskState;

    fn param() -> Param {
        let mut p = Param::new("p1", "lr");
        p.condition = "model == 'mlp'".into();
        p.values = vec![ParamValue::new("a", "0.1"), ParamValue::new("b", "0.2")];
        p
    }

    #[test]
    fn opening_one_editor_closes_the_other() {
        let mut ed = EditorCoordinator::new();
        ed.edit_param(&param());
        assert!(matches!(ed.state(), EditorState::Param(_)));
        ed.open_batch();
        assert!(matches!(ed.state(), EditorState::Batch(_)));
        ed.new_value(&param());
        assert!(matches!(ed.state(), EditorState::ParamValue(_)));
        ed.close();
        assert!(!ed.is_open());
    }

    #[test]
    fn edit_seeds_selectors_from_fallback() {
        let mut ed = EditorCoordinator::new();
        ed.edit_param(&param());
        let EditorState::Param(d) = ed.state() else {
            panic!("param editor not open");
        };
        assert_eq!(d.fields.default_param_value, "a");
        assert_eq!(d.fields.deprecated_param_value, "a");
        assert!(d.has_selectors());
    }

    #[test]
    fn new_param_has_no_selectors() {
        let mut ed = EditorCoordinator::new();
        ed.new_param();
        let EditorState::Param(d) = ed.state() else {
            panic!("param editor not open");
        };
        assert_eq!(d.title, "New parameter");
        assert!(!d.has_selectors());
        assert_eq!(d.uuid, None);
    }

    #[test]
    fn template_args_keep_commas_and_types() {
        let mut v = ParamValue::new("t", "opt_$T0$_$T1$");
        v.is_template = true;
        v.template_defaults = vec![json!("adam,0.9"), json!(4)];
        v.template_deprecated = vec![json!("sgd")];
        let mut d = ParamValueDraft::from_value(&param(), &v);
        assert_eq!(d.template_defaults, "adam\\,0.9, 4");

        let f = d.fields();
        assert_eq!(f.template_defaults, vec![json!("adam,0.9"), json!(4)]);
        assert_eq!(f.template_deprecated, vec![json!("sgd")]);

        d.template_deprecated = "sgd, 5".into();
        assert_eq!(d.fields().template_deprecated, vec![json!("sgd"), json!("5")]);
    }

    #[test]
    fn rerun_sends_numeric_args_back_as_numbers() {
        let task: Task = serde_json::from_value(json!({
            "uuid": "t1",
            "state": "FINISHED",
            "total_iterations": 10,
            "params": [[null, {"uuid": "v1", "name": "bs_$T0$"}, 4]]
        }))
        .expect("task");
        let mut ed = EditorCoordinator::new();
        ed.rerun_task(&task, &TasksConfig::default());
        let EditorState::Task(d) = ed.state() else {
            panic!("task editor not open");
        };
        assert_eq!(d.body()["params"], json!([["v1", 4]]));
    }

    #[test]
    fn selector_cycling_wraps() {
        let mut d = ParamDraft::from_param(&param());
        d.cycle_default(1);
        assert_eq!(d.fields.default_param_value, "b");
        d.cycle_default(1);
        assert_eq!(d.fields.default_param_value, "a");
        d.cycle_deprecated(-1);
        assert_eq!(d.fields.deprecated_param_value, "b");
    }

    #[test]
    fn save_picks_create_or_update_and_closes() {
        let rec = RecordingDispatcher::new();
        let mut ed = EditorCoordinator::new();

        ed.new_param();
        if let EditorState::Param(d) = ed.state_mut() {
            d.fields.name = "momentum".into();
        }
        assert_eq!(ed.save(&rec).expect("save"), Some("create param".to_string()));
        assert!(!ed.is_open());

        ed.edit_param(&param());
        ed.save(&rec).expect("save");

        let reqs = rec.take();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].path, "/add_param");
        assert_eq!(reqs[0].body.as_ref().map(|b| &b["name"]), Some(&json!("momentum")));
        assert_eq!(reqs[1].path, "/edit_param/p1");
        assert_eq!(
            reqs[1].body.as_ref().map(|b| &b["condition"]),
            Some(&json!("model == 'mlp'"))
        );
    }

    #[test]
    fn close_and_closed_save_send_nothing() {
        let rec = RecordingDispatcher::new();
        let mut ed = EditorCoordinator::new();
        ed.edit_param(&param());
        ed.close();
        assert_eq!(ed.save(&rec).expect("save"), None);
        assert!(rec.requests().is_empty());
    }

    #[test]
    fn failed_save_still_closes() {
        let rec = RecordingDispatcher::new();
        let mut ed = EditorCoordinator::new();
        ed.new_task(&TasksConfig::default(), &[]);
        if let EditorState::Task(d) = ed.state_mut() {
            d.iterations = "many".into();
        }
        assert!(ed.save(&rec).is_err());
        assert!(!ed.is_open());
        assert!(rec.requests().is_empty());
    }

    #[test]
    fn batch_forwards_document() {
        let mut d = BatchDraft::default();
        assert_eq!(d.config(), json!({}));
        d.document = r#"{"optim": {"lr": 0.1}, "bs": 32}"#.into();
        assert_eq!(d.preview(), vec!["bs".to_string(), "optim.lr".to_string()]);
        d.document = "not json".into();
        assert_eq!(d.config(), json!("not json"));
        assert_eq!(d.request().expect("req").path, "/add_param_batch");
    }

    #[test]
    fn task_drafts_route_by_mode() {
        let mut defaults = TasksConfig::default();
        defaults.device = Some("gpu0".into());

        let mut lr = param();
        lr.values[1].template_defaults = vec![json!("7")];
        lr.values[1].name = "lr_$T0$".into();
        lr.default_param_value = Some("b".into());

        let d = TaskDraft::blank(&defaults, &[lr]);
        let req = d.request().expect("req");
        assert_eq!(req.path, "/start/1000");
        let body = req.body.expect("body");
        assert_eq!(body["params"], json!([["b", "7"]]));
        assert_eq!(body["device"], json!("gpu0"));

        let mut task = Task::new("t9", TaskState::Paused);
        task.total_iterations = 50;
        task.is_test = true;
        task.tags = vec!["x".into()];

        let rerun = TaskDraft::from_task(&task, TaskMode::Rerun { source: "t9".into() }, &defaults);
        assert_eq!(rerun.request().expect("req").path, "/test/50");

        let edit = TaskDraft::from_task(&task, TaskMode::Edit { uuid: "t9".into() }, &defaults);
        let req = edit.request().expect("req");
        assert_eq!(req.path, "/edit_task/t9/50");
        assert_eq!(req.body.expect("body")["tags"], json!(["x"]));
    }

    #[test]
    fn value_draft_round_trips_template_args() {
        let mut v = ParamValue::new("v1", "lr_$T0$");
        v.is_template = true;
        v.template_defaults = vec![json!("0.1")];
        let d = ParamValueDraft::from_value(&param(), &v);
        assert_eq!(d.template_defaults, "0.1");
        let req = d.request().expect("req");
        assert_eq!(req.path, "/edit_param_value/p1/v1");
        assert_eq!(req.body.expect("body")["template_defaults"], json!(["0.1"]));
    }
}
