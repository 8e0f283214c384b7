//! The console's cached view of backend state.
//!
//! A snapshot is replaced wholesale by the refresh path and never patched by
//! action handlers.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::Param;
use crate::config::ClientConfig;
use crate::dispatch::{self, Dispatch};
use crate::error::{Error, Result};
use crate::task::{Task, TaskEntry, TaskState};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub params: Vec<Param>,
}

impl Snapshot {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn loaded_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter_map(TaskEntry::task)
    }

    pub fn find_task(&self, uuid: &str) -> Option<&Task> {
        self.loaded_tasks().find(|t| t.uuid == uuid)
    }

    pub fn find_param(&self, uuid: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.uuid == uuid)
    }

    /// Queued tasks in queue order; the index is what reorder requests name.
    pub fn queue(&self) -> Vec<&Task> {
        self.loaded_tasks()
            .filter(|t| t.state == TaskState::Queued)
            .collect()
    }

    pub fn queue_index(&self, uuid: &str) -> Option<usize> {
        self.queue().iter().position(|t| t.uuid == uuid)
    }

    pub fn stubs(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().filter_map(|e| match e {
            TaskEntry::Stub { uuid } => Some(uuid.as_str()),
            TaskEntry::Loaded(_) => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: Snapshot,
    generation: u64,
    requested_details: HashSet<String>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn replace(&mut self, next: Snapshot) {
        self.current = next;
        self.generation = self.generation.wrapping_add(1);
        tracing::debug!(
            generation = self.generation,
            tasks = self.current.tasks.len(),
            params = self.current.params.len(),
            "snapshot replaced"
        );
    }

    /// Requests details for stub entries not asked about before in this
    /// session. Returns how many requests went out.
    pub fn request_missing_details(&mut self, dispatcher: &dyn Dispatch) -> Result<usize> {
        let pending: Vec<String> = self
            .current
            .stubs()
            .filter(|uuid| !self.requested_details.contains(*uuid))
            .map(str::to_string)
            .collect();
        for uuid in &pending {
            dispatcher.dispatch(dispatch::task_details_request(uuid)?);
            self.requested_details.insert(uuid.clone());
        }
        Ok(pending.len())
    }
}

pub trait SnapshotSource: Send {
    fn fetch(&self) -> Result<Snapshot>;
    fn describe(&self) -> String;
}

pub struct HttpSnapshotSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(cfg: &ClientConfig) -> Result<Self> {
        let path = &cfg.refresh.snapshot_path;
        let sep = if path.starts_with('/') { "" } else { "/" };
        Self::new(
            format!("{}{sep}{path}", cfg.server.resolved_base_url()),
            cfg.server.timeout(),
        )
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch(&self) -> Result<Snapshot> {
        let res = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| Error::transport(format!("GET {}: {e}", self.url)))?;
        if !res.status().is_success() {
            return Err(Error::backend(format!(
                "snapshot fetch from {} returned {}",
                self.url,
                res.status()
            )));
        }
        let text = res
            .text()
            .map_err(|e| Error::transport(format!("GET {}: {e}", self.url)))?;
        Snapshot::from_json(&text)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn fetch(&self) -> Result<Snapshot> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", self.path.display())))?;
        Snapshot::from_json(&raw)
            .map_err(|e| Error::new(e.kind(), format!("{}: {e}", self.path.display())))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Runs a source on a background thread and sends each result over a
/// channel. Dropping the poller stops the thread after its current sleep.
pub struct Poller {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(
        source: Box<dyn SnapshotSource>,
        interval: Duration,
        tx: mpsc::Sender<Result<Snapshot>>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("snapshot-poller".into())
            .spawn(move || {
                tracing::info!(source = %source.describe(), "snapshot polling started");
                while !stop_flag.load(Ordering::Relaxed) {
                    let res = source.fetch();
                    if let Err(e) = &res {
                        tracing::warn!(error = %e, "snapshot refresh failed");
                    }
                    if tx.send(res).is_err() {
                        break;
                    }
                    thread::sleep(interval);
                }
            })
            .map_err(|e| Error::msg(format!("failed to spawn poller: {e}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Do not block UI teardown on a sleeping poller.
        self.stop.store(true, Ordering::Relaxed);
    }
}
