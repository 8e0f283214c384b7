use std::fs;
use std::sync::Arc;

use serde_json::json;
use taskplan_console::catalog;
use taskplan_console::config::{self, load_client_config};
use taskplan_console::dispatch::{Dispatch, HttpDispatcher, LogSink};

#[test]
fn client_config_layers_extends_and_imports() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("base.toml"),
        r#"
[server]
base_url = "http://base:5000/"
timeout_secs = 5

[ui]
detail_col = "loss"
"#,
    )
    .expect("write base");
    fs::write(
        tmp.path().join("devices.toml"),
        r#"
device = "gpu2"
default_iterations = 200
"#,
    )
    .expect("write devices");
    fs::write(
        tmp.path().join("taskplan.toml"),
        r#"
extends = "base.toml"

[server]
base_url = "http://lab:5000/"

[tasks]
imports = ["devices.toml"]
"#,
    )
    .expect("write root");

    let cfg = load_client_config(Some(&tmp.path().join("taskplan.toml"))).expect("config");
    assert_eq!(cfg.server.resolved_base_url(), "http://lab:5000");
    assert_eq!(cfg.server.timeout_secs, 5);
    assert_eq!(cfg.ui.detail_col, "loss");
    assert_eq!(cfg.tasks.device(), Some("gpu2"));
    assert_eq!(cfg.tasks.default_iterations, 200);
    assert_eq!(cfg.log_file_path(), tmp.path().join("taskplan.log"));

    let d = HttpDispatcher::from_config(&cfg.server, Arc::new(LogSink)).expect("dispatcher");
    assert_eq!(d.url("/log/t1"), "http://lab:5000/log/t1");
}

#[test]
fn explicit_config_must_exist() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert!(load_client_config(Some(&tmp.path().join("missing.toml"))).is_err());
}

#[test]
fn batch_documents_load_from_toml_or_json() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let toml_path = tmp.path().join("grid.toml");
    fs::write(&toml_path, "[optim]\nlr = 0.1\nmomentum = [0.9, 0.99]\n").expect("write");
    let json_path = tmp.path().join("grid.json");
    fs::write(&json_path, r#"{"optim": {"lr": 0.1, "momentum": [0.9, 0.99]}}"#).expect("write");

    let from_toml = config::load_document(&toml_path).expect("toml");
    let from_json = config::load_document(&json_path).expect("json");
    assert_eq!(from_toml, from_json);

    let req = catalog::create_batch_request(from_toml).expect("req");
    assert_eq!(req.path, "/add_param_batch");
    assert_eq!(
        req.body.expect("body"),
        json!({"config": {"optim": {"lr": 0.1, "momentum": [0.9, 0.99]}}})
    );
}
