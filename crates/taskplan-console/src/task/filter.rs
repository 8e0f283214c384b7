use std::collections::BTreeMap;

use super::Task;

/// Narrows the task list to tasks that select the same values (with the
/// same template arguments) as a reference task. Purely local.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    selections: BTreeMap<String, Vec<String>>,
    source: Option<String>,
}

impl TaskFilter {
    pub fn like(task: &Task) -> Self {
        Self {
            selections: task
                .params
                .iter()
                .map(|p| (p.value.uuid.clone(), p.args.clone()))
                .collect(),
            source: Some(task.uuid.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.selections.iter().all(|(uuid, args)| {
            task.params
                .iter()
                .any(|p| &p.value.uuid == uuid && &p.args == args)
        })
    }

    pub fn apply<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> Vec<&'a Task> {
        tasks.into_iter().filter(|t| self.matches(t)).collect()
    }
}
