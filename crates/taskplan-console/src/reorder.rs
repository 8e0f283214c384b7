//! Queue and param reordering.
//!
//! A drag carries only the moved item's key. Dropping it on a different
//! reorderable item issues one request naming the moved key and the target
//! position; nothing is reordered locally. The next snapshot carries the
//! order the backend settled on.

use crate::catalog::{self, Param};
use crate::dispatch::{Dispatch, Endpoint, Request, endpoints};
use crate::error::Result;
use crate::task::{Task, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderKind {
    Task,
    Param,
}

pub trait Reorderable {
    fn kind(&self) -> ReorderKind;
    fn key(&self) -> &str;
    fn draggable(&self) -> bool;
    /// Position a dropped item is inserted before.
    fn position(&self) -> i64;
}

/// A task at its index in the queue listing.
#[derive(Debug, Clone, Copy)]
pub struct QueueSlot<'a> {
    pub task: &'a Task,
    pub index: usize,
}

impl Reorderable for QueueSlot<'_> {
    fn kind(&self) -> ReorderKind {
        ReorderKind::Task
    }

    fn key(&self) -> &str {
        &self.task.uuid
    }

    fn draggable(&self) -> bool {
        self.task.state == TaskState::Queued
    }

    fn position(&self) -> i64 {
        self.index as i64
    }
}

impl Reorderable for Param {
    fn kind(&self) -> ReorderKind {
        ReorderKind::Param
    }

    fn key(&self) -> &str {
        &self.uuid
    }

    fn draggable(&self) -> bool {
        true
    }

    fn position(&self) -> i64 {
        self.sorting
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPayload {
    pub kind: ReorderKind,
    pub key: String,
}

pub fn drag_start<T: Reorderable + ?Sized>(item: &T) -> Option<DragPayload> {
    item.draggable().then(|| DragPayload {
        kind: item.kind(),
        key: item.key().to_string(),
    })
}

pub fn reorder_request(kind: ReorderKind, moved: &str, position: i64) -> Result<Request> {
    match kind {
        ReorderKind::Task => endpoints::ReorderTask.request(&[moved, &position.to_string()]),
        ReorderKind::Param => catalog::reorder_param_request(moved, position),
    }
}

/// Hover state of one drop target. Enter/leave nest, so the highlight
/// stays on while any enter is unmatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropTarget {
    enter_count: u32,
}

impl DropTarget {
    pub fn accepts<T: Reorderable + ?Sized>(payload: &DragPayload, target: &T) -> bool {
        payload.kind == target.kind() && target.draggable() && payload.key != target.key()
    }

    pub fn drag_enter<T: Reorderable + ?Sized>(&mut self, payload: &DragPayload, target: &T) {
        if Self::accepts(payload, target) {
            self.enter_count = self.enter_count.saturating_add(1);
        }
    }

    pub fn drag_leave<T: Reorderable + ?Sized>(&mut self, payload: &DragPayload, target: &T) {
        if Self::accepts(payload, target) {
            self.enter_count = self.enter_count.saturating_sub(1);
        }
    }

    pub fn highlighted(&self) -> bool {
        self.enter_count > 0
    }

    pub fn enter_count(&self) -> u32 {
        self.enter_count
    }

    /// Resets hover state and, if the target accepts the payload, dispatches
    /// exactly one reorder request. Returns whether a request went out.
    pub fn drop<T: Reorderable + ?Sized>(
        &mut self,
        payload: &DragPayload,
        target: &T,
        dispatcher: &dyn Dispatch,
    ) -> Result<bool> {
        self.enter_count = 0;
        if !Self::accepts(payload, target) {
            return Ok(false);
        }
        let req = reorder_request(payload.kind, &payload.key, target.position())?;
        tracing::info!(moved = %payload.key, position = target.position(), "reorder");
        dispatcher.dispatch(req);
        Ok(true)
    }
}

/// Keyboard rendition of a drag: grab, move over targets, drop or abandon.
#[derive(Debug, Clone)]
pub struct DragSession {
    payload: DragPayload,
    over: Option<String>,
    target: DropTarget,
}

impl DragSession {
    pub fn grab<T: Reorderable + ?Sized>(item: &T) -> Option<Self> {
        Some(Self {
            payload: drag_start(item)?,
            over: None,
            target: DropTarget::default(),
        })
    }

    pub fn payload(&self) -> &DragPayload {
        &self.payload
    }

    pub fn hovered(&self) -> Option<&str> {
        self.over.as_deref()
    }

    pub fn highlighted(&self) -> bool {
        self.target.highlighted()
    }

    /// Moves off the current target and onto `item`, if any. Leaving a
    /// target clears its hover state.
    pub fn hover<T: Reorderable + ?Sized>(&mut self, item: Option<&T>) {
        self.target = DropTarget::default();
        self.over = None;
        if let Some(item) = item {
            self.target.drag_enter(&self.payload, item);
            self.over = Some(item.key().to_string());
        }
    }

    pub fn drop_on<T: Reorderable + ?Sized>(
        mut self,
        item: &T,
        dispatcher: &dyn Dispatch,
    ) -> Result<bool> {
        self.target.drop(&self.payload, item, dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingDispatcher;

    fn queued(uuid: &str) -> Task {
        Task::new(uuid, TaskState::Queued)
    }

    #[test]
    fn only_queued_tasks_are_draggable() {
        let running = Task::new("r", TaskState::Running);
        assert!(drag_start(&QueueSlot { task: &running, index: 0 }).is_none());
        let q = queued("a");
        let payload = drag_start(&QueueSlot { task: &q, index: 1 }).expect("payload");
        assert_eq!(payload.key, "a");
        assert_eq!(payload.kind, ReorderKind::Task);
    }

    #[test]
    fn drop_on_other_queued_task_sends_one_request() {
        let a = queued("a");
        let b = queued("b");
        let payload = drag_start(&QueueSlot { task: &a, index: 0 }).expect("payload");
        let rec = RecordingDispatcher::new();
        let mut target = DropTarget::default();
        let sent = target
            .drop(&payload, &QueueSlot { task: &b, index: 3 }, &rec)
            .expect("drop");
        assert!(sent);
        assert_eq!(rec.paths(), vec!["/reorder_task/a/3".to_string()]);
    }

    #[test]
    fn drop_on_self_or_running_sends_nothing_and_resets() {
        let a = queued("a");
        let r = Task::new("r", TaskState::Running);
        let payload = drag_start(&QueueSlot { task: &a, index: 0 }).expect("payload");
        let rec = RecordingDispatcher::new();

        let self_slot = QueueSlot { task: &a, index: 0 };
        let mut target = DropTarget::default();
        target.drag_enter(&payload, &self_slot);
        assert!(!target.highlighted());
        assert!(!target.drop(&payload, &self_slot, &rec).expect("drop"));

        let b = queued("b");
        let b_slot = QueueSlot { task: &b, index: 1 };
        let mut target = DropTarget::default();
        target.drag_enter(&payload, &b_slot);
        assert!(target.highlighted());
        assert!(!target
            .drop(&payload, &QueueSlot { task: &r, index: 0 }, &rec)
            .expect("drop"));
        assert!(!target.highlighted());
        assert!(rec.requests().is_empty());
    }

    #[test]
    fn nested_enters_keep_highlight_until_balanced() {
        let a = queued("a");
        let b = queued("b");
        let payload = drag_start(&QueueSlot { task: &a, index: 0 }).expect("payload");
        let slot = QueueSlot { task: &b, index: 1 };
        let mut target = DropTarget::default();

        target.drag_enter(&payload, &slot);
        target.drag_enter(&payload, &slot);
        target.drag_leave(&payload, &slot);
        assert!(target.highlighted());
        target.drag_leave(&payload, &slot);
        assert!(!target.highlighted());
        target.drag_leave(&payload, &slot);
        assert_eq!(target.enter_count(), 0);
    }

    #[test]
    fn params_reorder_by_target_rank() {
        let a = Param::new("pa", "a");
        let mut b = Param::new("pb", "b");
        b.sorting = 42;
        let rec = RecordingDispatcher::new();
        let mut session = DragSession::grab(&a).expect("grab");
        session.hover(Some(&a));
        assert!(!session.highlighted());
        session.hover(Some(&b));
        assert!(session.highlighted());
        assert_eq!(session.hovered(), Some("pb"));
        assert!(session.drop_on(&b, &rec).expect("drop"));
        assert_eq!(rec.paths(), vec!["/reorder_param/pa/42".to_string()]);
    }

    #[test]
    fn task_payload_is_rejected_by_params() {
        let a = queued("a");
        let p = Param::new("p", "p");
        let payload = drag_start(&QueueSlot { task: &a, index: 0 }).expect("payload");
        assert!(!DropTarget::accepts(&payload, &p));
    }
}
