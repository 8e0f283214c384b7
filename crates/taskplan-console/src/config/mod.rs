use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "taskplan.toml";

/// A loaded TOML document with `extends`/`imports` already inlined.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        v.clone()
            .try_into()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid config section '{path}': {e}")))
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_snapshot_path() -> String {
    "/snapshot".into()
}

fn default_detail_col() -> String {
    "saved".into()
}

fn default_max_notifications() -> usize {
    6
}

fn default_log_file() -> String {
    "taskplan.log".into()
}

fn default_iterations() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    // Env var that, when set and non-empty, wins over `base_url`.
    pub base_url_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            base_url_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn resolved_base_url(&self) -> String {
        let from_env = self
            .base_url_env
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .and_then(|k| std::env::var(k).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        from_env
            .unwrap_or_else(|| self.base_url.clone())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(50))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    #[serde(default = "default_detail_col")]
    pub detail_col: String,
    #[serde(default = "default_max_notifications")]
    pub max_notifications: usize,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            detail_col: default_detail_col(),
            max_notifications: default_max_notifications(),
            log_file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub device: Option<String>,
    #[serde(default = "default_iterations")]
    pub default_iterations: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            device: None,
            default_iterations: default_iterations(),
        }
    }
}

impl TasksConfig {
    pub fn device(&self) -> Option<&str> {
        self.device
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub path: Option<PathBuf>,
    pub server: ServerConfig,
    pub refresh: RefreshConfig,
    pub ui: UiConfig,
    pub tasks: TasksConfig,
}

impl ClientConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            path: Some(doc.path.clone()),
            server: doc.deserialize_path("server")?.unwrap_or_default(),
            refresh: doc.deserialize_path("refresh")?.unwrap_or_default(),
            ui: doc.deserialize_path("ui")?.unwrap_or_default(),
            tasks: doc.deserialize_path("tasks")?.unwrap_or_default(),
        })
    }

    /// Log file path; relative paths sit next to the config file.
    pub fn log_file_path(&self) -> PathBuf {
        let p = PathBuf::from(&self.ui.log_file);
        if p.is_absolute() {
            return p;
        }
        self.path
            .as_deref()
            .and_then(Path::parent)
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(p)
    }
}

/// Loads the client config. An explicit path must exist; the default
/// `taskplan.toml` falls back to built-in defaults when absent.
pub fn load_client_config(explicit: Option<&Path>) -> Result<ClientConfig> {
    match explicit {
        Some(path) => ClientConfig::from_doc(&load(path)?),
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.is_file() {
                ClientConfig::from_doc(&load(path)?)
            } else {
                Ok(ClientConfig::default())
            }
        }
    }
}

/// Deep merge; tables merge key by key, anything else in `overlay` replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn sibling_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        return p;
    }
    from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
}

fn take_imports(path: &Path, tbl: &mut toml::Table) -> Result<Vec<String>> {
    let Some(raw) = tbl.remove("imports") else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = raw else {
        return Err(Error::config(format!(
            "'imports' in {} must be an array of strings",
            path.display()
        )));
    };
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Ok(s.trim().to_string())),
            _ => Some(Err(Error::config(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )))),
        })
        .collect()
}

fn inline_imports(file: &Path, value: &mut Value, seen: &mut HashSet<PathBuf>) -> Result<()> {
    let Value::Table(tbl) = value else {
        return Ok(());
    };

    let imports = take_imports(file, tbl)?;
    if !imports.is_empty() {
        let mut acc = Value::Table(Default::default());
        for imp in imports {
            merge(&mut acc, load_inner(&sibling_path(file, &imp), seen)?);
        }
        merge(&mut acc, Value::Table(std::mem::take(tbl)));
        if let Value::Table(merged) = acc {
            *tbl = merged;
        }
    }

    for (_, child) in tbl.iter_mut() {
        inline_imports(file, child, seen)?;
    }
    Ok(())
}

fn load_inner(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(key.clone()) {
        return Err(Error::config(format!(
            "config import cycle detected at {}",
            key.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&raw)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    let parent = value
        .as_table_mut()
        .and_then(|t| t.remove("extends"))
        .and_then(|v| v.as_str().map(str::to_string));
    if let Some(parent) = parent {
        out = load_inner(&sibling_path(path, &parent), seen)?;
    }

    inline_imports(path, &mut value, seen)?;
    merge(&mut out, value);

    seen.remove(&key);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value: load_inner(path, &mut seen)?,
    })
}

pub fn toml_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Datetime(d) => serde_json::Value::String(d.to_string()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(toml_to_json).collect()),
        Value::Table(t) => serde_json::Value::Object(
            t.iter().map(|(k, v)| (k.clone(), toml_to_json(v))).collect(),
        ),
    }
}

/// Reads a structured document for bulk param import. `.toml` files are
/// converted; anything else is parsed as JSON. No schema validation happens
/// here, the backend owns that.
pub fn load_document(path: &Path) -> Result<serde_json::Value> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
    if path.extension().and_then(|s| s.to_str()) == Some("toml") {
        let v: Value = toml::from_str(&raw)
            .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;
        return Ok(toml_to_json(&v));
    }
    serde_json::from_str(&raw)
        .map_err(|e| Error::config(format!("JSON parse error in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).expect("write config");
        p
    }

    #[test]
    fn defaults_apply_for_missing_sections() {
        let doc = ConfigDoc::empty("<mem>");
        let cfg = ClientConfig::from_doc(&doc).expect("config");
        assert_eq!(cfg.server.base_url, "http://127.0.0.1:5000");
        assert_eq!(cfg.refresh.snapshot_path, "/snapshot");
        assert_eq!(cfg.ui.detail_col, "saved");
        assert_eq!(cfg.tasks.default_iterations, 1000);
        assert!(cfg.tasks.device().is_none());
    }

    #[test]
    fn extends_and_imports_merge_in_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(
            tmp.path(),
            "base.toml",
            "[server]\nbase_url = \"http://base:1\"\ntimeout_secs = 5\n",
        );
        write(tmp.path(), "ui.toml", "detail_col = \"loss\"\n");
        let main = write(
            tmp.path(),
            "taskplan.toml",
            "extends = \"base.toml\"\n[server]\nbase_url = \"http://main:2/\"\n[ui]\nimports = [\"ui.toml\"]\nmax_notifications = 3\n",
        );

        let cfg = ClientConfig::from_doc(&load(&main).expect("load")).expect("config");
        assert_eq!(cfg.server.resolved_base_url(), "http://main:2");
        assert_eq!(cfg.server.timeout_secs, 5);
        assert_eq!(cfg.ui.detail_col, "loss");
        assert_eq!(cfg.ui.max_notifications, 3);
    }

    #[test]
    fn import_cycle_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "a.toml", "extends = \"b.toml\"\n");
        let b = write(tmp.path(), "b.toml", "extends = \"a.toml\"\n");
        let err = load(&b).unwrap_err();
        assert!(err.to_string().contains("cycle"), "unexpected err: {err}");
    }

    #[test]
    fn log_file_is_relative_to_config() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let main = write(tmp.path(), "taskplan.toml", "[ui]\nlog_file = \"logs/ui.log\"\n");
        let cfg = load_client_config(Some(&main)).expect("config");
        assert_eq!(cfg.log_file_path(), tmp.path().join("logs/ui.log"));
    }

    #[test]
    fn toml_batch_document_converts_to_json() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = write(
            tmp.path(),
            "batch.toml",
            "lr = 0.5\n[model]\nlayers = 3\nname = \"mlp\"\n",
        );
        let doc = load_document(&p).expect("doc");
        assert_eq!(doc["lr"], serde_json::json!(0.5));
        assert_eq!(doc["model"]["layers"], serde_json::json!(3));
        assert_eq!(doc["model"]["name"], serde_json::json!("mlp"));
    }
}
