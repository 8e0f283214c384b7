mod support;

use std::sync::mpsc;
use std::time::Duration;

use taskplan_console::error::ErrorKind;
use taskplan_console::snapshot::{
    HttpSnapshotSource, Poller, SnapshotSource, SnapshotStore,
};
use taskplan_console::task::TaskEntry;

use support::{Reply, Server};

const DOC: &str = r#"{
    "tasks": [
        {"uuid": "a", "state": "RUNNING", "run_time": 61.5, "time_left": 30,
         "finished_iterations": 5, "total_iterations": 10,
         "params": [[null, {"uuid": "v1", "name": "lr_$T0$"}, "0.01"]]},
        {"uuid": "b"}
    ],
    "params": [{"uuid": "p1", "name": "lr", "values": [{"uuid": "v1", "name": "lr_$T0$", "isTemplate": true}]}]
}"#;

#[test]
fn http_source_fetches_the_state_feed() {
    let server = Server::start(vec![Reply::ok(DOC)]);
    let source =
        HttpSnapshotSource::new(format!("{}/snapshot", server.base_url), Duration::from_secs(5))
            .expect("source");
    let snap = source.fetch().expect("fetch");
    assert_eq!(server.next().path, "/snapshot");

    let task = snap.find_task("a").expect("task a");
    assert_eq!(task.display_name().expect("name"), "lr_0.01");
    assert_eq!(task.status_text(None), "01:01 / 00:30");
    assert!(matches!(snap.tasks[1], TaskEntry::Stub { .. }));
    assert!(snap.params[0].values[0].is_template);
}

#[test]
fn failing_feed_is_a_backend_error() {
    let server = Server::start(vec![Reply::status(503, "")]);
    let source =
        HttpSnapshotSource::new(format!("{}/snapshot", server.base_url), Duration::from_secs(5))
            .expect("source");
    let err = source.fetch().expect_err("503 must fail");
    assert_eq!(err.kind(), ErrorKind::Backend);
}

#[test]
fn poller_replaces_the_store_wholesale() {
    let server = Server::start(vec![Reply::ok(DOC), Reply::ok(r#"{"tasks": [], "params": []}"#)]);
    let source =
        HttpSnapshotSource::new(format!("{}/snapshot", server.base_url), Duration::from_secs(5))
            .expect("source");
    let (tx, rx) = mpsc::channel();
    let mut poller =
        Poller::spawn(Box::new(source), Duration::from_millis(20), tx).expect("poller");

    let mut store = SnapshotStore::new();
    let first = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("first")
        .expect("snapshot");
    store.replace(first);
    assert_eq!(store.current().tasks.len(), 2);

    let second = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("second")
        .expect("snapshot");
    store.replace(second);
    assert!(store.current().tasks.is_empty());
    assert_eq!(store.generation(), 2);
    poller.stop();
}
