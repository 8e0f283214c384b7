//! Outbound requests.
//!
//! Every user action becomes exactly one [`Request`]. Dispatch is
//! fire-and-forget: nothing here touches the cached snapshot. Outcomes come
//! back as [`DispatchEvent`]s so the UI can surface failures.

pub mod endpoints;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::task::TaskAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// One declared backend route. Implemented through `#[Endpoint(..)]`.
pub trait Endpoint {
    fn id(&self) -> &'static str;
    fn template(&self) -> &'static str;
    fn label(&self) -> &'static str;
    fn method(&self) -> Method;
    fn segments(&self) -> usize;
    fn takes_body(&self) -> bool;

    /// Fills the `{..}` placeholders of the route in order.
    fn path(&self, segs: &[&str]) -> Result<String> {
        if segs.len() != self.segments() {
            return Err(Error::msg(format!(
                "{} expects {} path segment(s), got {}",
                self.id(),
                self.segments(),
                segs.len()
            )));
        }
        for seg in segs {
            if seg.is_empty() {
                return Err(Error::msg(format!("{}: empty path segment", self.id())));
            }
            if seg.contains(['/', '?', '#']) {
                return Err(Error::msg(format!(
                    "{}: invalid path segment '{seg}'",
                    self.id()
                )));
            }
        }

        let mut out = String::with_capacity(self.template().len() + 16);
        let mut next = segs.iter();
        let mut in_placeholder = false;
        for c in self.template().chars() {
            match c {
                '{' => {
                    in_placeholder = true;
                    if let Some(seg) = next.next() {
                        out.push_str(seg);
                    }
                }
                '}' => in_placeholder = false,
                c if !in_placeholder => out.push(c),
                _ => {}
            }
        }
        Ok(out)
    }

    fn request(&self, segs: &[&str]) -> Result<Request> {
        if self.takes_body() {
            return Err(Error::msg(format!("{} requires a body", self.id())));
        }
        Ok(Request {
            endpoint: self.id(),
            method: self.method(),
            path: self.path(segs)?,
            body: None,
            label: self.label().to_string(),
        })
    }

    fn request_with_body(&self, segs: &[&str], body: Value) -> Result<Request> {
        if !self.takes_body() {
            return Err(Error::msg(format!("{} takes no body", self.id())));
        }
        Ok(Request {
            endpoint: self.id(),
            method: self.method(),
            path: self.path(segs)?,
            body: Some(body),
            label: self.label().to_string(),
        })
    }
}

/// A complete, self-contained instruction for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub endpoint: &'static str,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub label: String,
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Sent {
        ticket: u64,
        label: String,
        path: String,
    },
    Completed {
        ticket: u64,
        label: String,
        path: String,
        error: Option<Error>,
    },
}

impl DispatchEvent {
    pub fn failure(&self) -> Option<&Error> {
        match self {
            DispatchEvent::Completed { error, .. } => error.as_ref(),
            DispatchEvent::Sent { .. } => None,
        }
    }
}

pub trait DispatchSink: Send + Sync {
    fn emit(&self, ev: DispatchEvent);
}

pub struct ChannelSink {
    tx: mpsc::Sender<DispatchEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DispatchEvent>) -> Self {
        Self { tx }
    }
}

impl DispatchSink for ChannelSink {
    fn emit(&self, ev: DispatchEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Reports outcomes through `tracing` only.
#[derive(Debug, Default)]
pub struct LogSink;

impl DispatchSink for LogSink {
    fn emit(&self, ev: DispatchEvent) {
        match ev {
            DispatchEvent::Sent { ticket, path, .. } => {
                tracing::debug!(ticket, path = %path, "request sent");
            }
            DispatchEvent::Completed {
                ticket,
                path,
                error: None,
                ..
            } => tracing::info!(ticket, path = %path, "request completed"),
            DispatchEvent::Completed {
                ticket,
                path,
                error: Some(e),
                ..
            } => tracing::warn!(ticket, path = %path, error = %e, "request failed"),
        }
    }
}

pub trait Dispatch {
    /// Sends without waiting. The outcome is reported out of band.
    fn dispatch(&self, req: Request);

    /// Absolute URL for a backend path, for things opened elsewhere (logs).
    fn url(&self, path: &str) -> String {
        path.to_string()
    }
}

pub struct HttpDispatcher {
    client: reqwest::blocking::Client,
    base_url: String,
    sink: Arc<dyn DispatchSink>,
    next_ticket: AtomicU64,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration, sink: Arc<dyn DispatchSink>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sink,
            next_ticket: AtomicU64::new(1),
        })
    }

    pub fn from_config(cfg: &ServerConfig, sink: Arc<dyn DispatchSink>) -> Result<Self> {
        Self::new(&cfg.resolved_base_url(), cfg.timeout(), sink)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Synchronous send for the CLI.
    pub fn send_blocking(&self, req: &Request) -> Result<Value> {
        send(&self.client, &self.base_url, req)
    }
}

impl Dispatch for HttpDispatcher {
    fn dispatch(&self, req: Request) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let label = req.label.clone();
        let path = req.path.clone();
        self.sink.emit(DispatchEvent::Sent {
            ticket,
            label: label.clone(),
            path: path.clone(),
        });

        let client = self.client.clone();
        let base = self.base_url.clone();
        let sink = self.sink.clone();
        let spawned = thread::Builder::new()
            .name(format!("dispatch-{ticket}"))
            .spawn(move || {
                let error = send(&client, &base, &req).err();
                sink.emit(DispatchEvent::Completed {
                    ticket,
                    label: req.label,
                    path: req.path,
                    error,
                });
            });
        if let Err(e) = spawned {
            self.sink.emit(DispatchEvent::Completed {
                ticket,
                label,
                path,
                error: Some(Error::transport(format!("failed to spawn request thread: {e}"))),
            });
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn send(client: &reqwest::blocking::Client, base_url: &str, req: &Request) -> Result<Value> {
    let url = format!("{base_url}{}", req.path);
    tracing::debug!(method = %req.method, path = %req.path, "dispatch");

    let mut builder = match req.method {
        Method::Get => client.get(&url),
        Method::Post => client.post(&url),
    };
    if let Some(body) = &req.body {
        // The backend reads one form field holding the JSON document.
        builder = builder.form(&[("data", body.to_string())]);
    }

    let res = builder.send().map_err(|e| {
        tracing::warn!(method = %req.method, path = %req.path, error = %e, "request failed");
        Error::transport(format!("{} {}: {e}", req.method, req.path))
    })?;
    let status = res.status();
    let text = res
        .text()
        .map_err(|e| Error::transport(format!("{}: failed to read response: {e}", req.path)))?;

    if !status.is_success() {
        tracing::warn!(path = %req.path, status = %status, "backend rejected request");
        let detail = text.trim();
        let detail = if detail.is_empty() {
            String::new()
        } else {
            format!(": {}", detail.chars().take(200).collect::<String>())
        };
        return Err(Error::backend(format!(
            "{} returned {status}{detail}",
            req.path
        )));
    }
    parse_response(&text).inspect_err(|e| {
        tracing::warn!(path = %req.path, error = %e, "backend reported failure");
    })
}

/// Responses are structured documents; an `error` string marks a failure
/// the backend reported with a success status.
pub fn parse_response(text: &str) -> Result<Value> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    let v: Value = serde_json::from_str(text)
        .map_err(|e| Error::new(crate::error::ErrorKind::Decode, format!("invalid response: {e}")))?;
    if let Some(msg) = v
        .get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        return Err(Error::backend(msg.to_string()));
    }
    Ok(v)
}

/// Records requests instead of sending them.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Request>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub fn take(&self) -> Vec<Request> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, req: Request) {
        if let Ok(mut s) = self.sent.lock() {
            s.push(req);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionArgs {
    pub iterations: Option<u64>,
    pub device: Option<String>,
}

/// Where a task action goes once chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRoute {
    Send(Request),
    /// A backend page viewed outside the console (task log).
    Open { path: String },
    /// Handled by the console itself (editor or view filter).
    Local(TaskAction),
}

fn required_iterations(action: TaskAction, args: &ActionArgs) -> Result<String> {
    args.iterations
        .map(|n| n.to_string())
        .ok_or_else(|| Error::msg(format!("{} needs an iteration count", action.as_str())))
}

/// Maps a task action to its single outbound request, or to the local
/// handling it needs.
pub fn route_task_action(action: TaskAction, task: &str, args: &ActionArgs) -> Result<ActionRoute> {
    use endpoints::*;

    let req = match action {
        TaskAction::Pause => Pause.request(&[task])?,
        TaskAction::SaveNow => SaveNow.request(&[task])?,
        TaskAction::Terminate => Terminate.request(&[task])?,
        TaskAction::Checkpoint => CreateCheckpoint.request(&[task])?,
        TaskAction::RunNow => RunNow.request(&[task])?,
        TaskAction::Cancel => Cancel.request(&[task])?,
        TaskAction::Clone => CloneTask.request(&[task])?,
        TaskAction::Remove => RemoveTask.request(&[task])?,
        TaskAction::MakePersistent => MakeTestPersistent.request(&[task])?,
        TaskAction::Finish => Finish.request(&[task])?,
        TaskAction::ChangeIterations => {
            let n = required_iterations(action, args)?;
            ChangeIterations.request(&[task, &n])?
        }
        TaskAction::Continue => {
            let n = required_iterations(action, args)?;
            let device = args
                .device
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    Error::config("continue needs a device (pass --device or set [tasks].device)")
                })?;
            Continue.request(&[task, device, &n])?
        }
        TaskAction::ViewLog => {
            return Ok(ActionRoute::Open {
                path: Log.path(&[task])?,
            });
        }
        TaskAction::EditConfig | TaskAction::Rerun | TaskAction::FilterSimilar => {
            return Ok(ActionRoute::Local(action));
        }
    };
    Ok(ActionRoute::Send(req))
}

pub fn pause_all_request() -> Result<Request> {
    endpoints::PauseAll.request(&[])
}

pub fn set_tags_request(task: &str, tags: &[String]) -> Result<Request> {
    endpoints::SetTags.request_with_body(&[task], serde_json::json!({ "tags": tags }))
}

pub fn task_details_request(task: &str) -> Result<Request> {
    endpoints::TaskDetails.request(&[task])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_path(action: TaskAction, args: &ActionArgs) -> String {
        match route_task_action(action, "t1", args).expect("route") {
            ActionRoute::Send(req) => req.path,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn simple_actions_map_to_one_path_each() {
        let args = ActionArgs::default();
        assert_eq!(send_path(TaskAction::Pause, &args), "/pause/t1");
        assert_eq!(send_path(TaskAction::SaveNow, &args), "/save_now/t1");
        assert_eq!(send_path(TaskAction::Terminate, &args), "/terminate/t1");
        assert_eq!(send_path(TaskAction::Checkpoint, &args), "/create_checkpoint/t1");
        assert_eq!(send_path(TaskAction::RunNow, &args), "/run_now/t1");
        assert_eq!(send_path(TaskAction::Cancel, &args), "/cancel/t1");
        assert_eq!(send_path(TaskAction::Clone, &args), "/clone_task/t1");
        assert_eq!(send_path(TaskAction::Remove, &args), "/remove_task/t1");
        assert_eq!(
            send_path(TaskAction::MakePersistent, &args),
            "/make_test_persistent/t1"
        );
        assert_eq!(send_path(TaskAction::Finish, &args), "/finish/t1");
    }

    #[test]
    fn iteration_actions_need_a_count() {
        let none = ActionArgs::default();
        assert!(route_task_action(TaskAction::ChangeIterations, "t1", &none).is_err());

        let args = ActionArgs {
            iterations: Some(2000),
            device: Some("gpu0".into()),
        };
        assert_eq!(send_path(TaskAction::ChangeIterations, &args), "/change/t1/2000");
        assert_eq!(send_path(TaskAction::Continue, &args), "/continue/t1/gpu0/2000");
    }

    #[test]
    fn continue_without_device_fails_before_sending() {
        let args = ActionArgs {
            iterations: Some(10),
            device: Some("  ".into()),
        };
        let err = route_task_action(TaskAction::Continue, "t1", &args).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn log_and_local_actions_issue_no_request() {
        let args = ActionArgs::default();
        assert_eq!(
            route_task_action(TaskAction::ViewLog, "t1", &args).expect("route"),
            ActionRoute::Open {
                path: "/log/t1".into()
            }
        );
        for action in [
            TaskAction::EditConfig,
            TaskAction::Rerun,
            TaskAction::FilterSimilar,
        ] {
            assert_eq!(
                route_task_action(action, "t1", &args).expect("route"),
                ActionRoute::Local(action)
            );
        }
    }

    #[test]
    fn response_error_field_is_a_backend_failure() {
        assert_eq!(parse_response("").expect("empty"), Value::Null);
        assert_eq!(
            parse_response("{}").expect("ok"),
            serde_json::json!({})
        );
        let err = parse_response(r#"{"error":"task is running"}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backend);
        assert_eq!(err.message(), "task is running");

        let err = parse_response("<html>").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn set_tags_carries_body() {
        let req = set_tags_request("t1", &["a".into(), "b".into()]).expect("req");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/set_tags/t1");
        assert_eq!(req.body, Some(serde_json::json!({"tags": ["a", "b"]})));
    }

    #[test]
    fn body_mismatch_is_rejected() {
        use endpoints::{AddParam, Pause};
        assert!(AddParam.request(&[]).is_err());
        assert!(Pause.request_with_body(&["t1"], serde_json::json!({})).is_err());
    }
}
