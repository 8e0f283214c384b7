use super::{Task, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskAction {
    Pause,
    SaveNow,
    /// Change total iterations of a running or queued task.
    ChangeIterations,
    ViewLog,
    Terminate,
    Checkpoint,
    RunNow,
    Cancel,
    EditConfig,
    Rerun,
    Clone,
    Remove,
    MakePersistent,
    FilterSimilar,
    /// Resume a settled task with a new total iteration count.
    Continue,
    Finish,
}

impl TaskAction {
    pub const ALL: [TaskAction; 16] = [
        TaskAction::Pause,
        TaskAction::SaveNow,
        TaskAction::ChangeIterations,
        TaskAction::ViewLog,
        TaskAction::Terminate,
        TaskAction::Checkpoint,
        TaskAction::RunNow,
        TaskAction::Cancel,
        TaskAction::EditConfig,
        TaskAction::Rerun,
        TaskAction::Clone,
        TaskAction::Remove,
        TaskAction::MakePersistent,
        TaskAction::FilterSimilar,
        TaskAction::Continue,
        TaskAction::Finish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskAction::Pause => "pause",
            TaskAction::SaveNow => "save-now",
            TaskAction::ChangeIterations => "change",
            TaskAction::ViewLog => "log",
            TaskAction::Terminate => "terminate",
            TaskAction::Checkpoint => "checkpoint",
            TaskAction::RunNow => "run-now",
            TaskAction::Cancel => "cancel",
            TaskAction::EditConfig => "edit",
            TaskAction::Rerun => "rerun",
            TaskAction::Clone => "clone",
            TaskAction::Remove => "remove",
            TaskAction::MakePersistent => "make-persistent",
            TaskAction::FilterSimilar => "filter-similar",
            TaskAction::Continue => "continue",
            TaskAction::Finish => "finish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// Single key used by the terminal UI.
    pub fn key(self) -> char {
        match self {
            TaskAction::Pause => 'p',
            TaskAction::SaveNow => 's',
            TaskAction::ChangeIterations => 'i',
            TaskAction::ViewLog => 'l',
            TaskAction::Terminate => 'T',
            TaskAction::Checkpoint => 'K',
            TaskAction::RunNow => 'r',
            TaskAction::Cancel => 'x',
            TaskAction::EditConfig => 'e',
            TaskAction::Rerun => 'R',
            TaskAction::Clone => 'c',
            TaskAction::Remove => 'D',
            TaskAction::MakePersistent => 'P',
            TaskAction::FilterSimilar => 'f',
            TaskAction::Continue => 'C',
            TaskAction::Finish => 'F',
        }
    }

    /// Actions that ask for a new iteration count first.
    pub fn needs_iterations(self) -> bool {
        matches!(self, TaskAction::ChangeIterations | TaskAction::Continue)
    }
}

/// Actions the console offers for a task, derived only from its state.
///
/// `Finish` is never offered here; it stays reachable from the CLI.
pub fn legal_actions(task: &Task) -> Vec<TaskAction> {
    use TaskAction::*;
    match task.state {
        TaskState::Running => vec![Pause, SaveNow, ChangeIterations, ViewLog, Terminate, Checkpoint],
        TaskState::Queued => vec![RunNow, ChangeIterations, Cancel],
        TaskState::Paused | TaskState::Finished | TaskState::Terminated => {
            let mut out = vec![EditConfig, Rerun, Clone, ViewLog, Checkpoint, Remove, Continue];
            out.push(if task.is_test { MakePersistent } else { FilterSimilar });
            out
        }
    }
}

pub fn is_legal(task: &Task, action: TaskAction) -> bool {
    legal_actions(task).contains(&action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_never_offers_queue_or_removal_actions() {
        let t = Task::new("t", TaskState::Running);
        let actions = legal_actions(&t);
        for a in [TaskAction::RunNow, TaskAction::Cancel, TaskAction::Remove] {
            assert!(!actions.contains(&a), "{a:?}");
        }
        assert!(actions.contains(&TaskAction::Pause));
    }

    #[test]
    fn queued_never_offers_running_actions() {
        let t = Task::new("t", TaskState::Queued);
        let actions = legal_actions(&t);
        for a in [TaskAction::Pause, TaskAction::Terminate, TaskAction::Checkpoint] {
            assert!(!actions.contains(&a), "{a:?}");
        }
        assert_eq!(
            actions,
            vec![TaskAction::RunNow, TaskAction::ChangeIterations, TaskAction::Cancel]
        );
    }

    #[test]
    fn test_runs_swap_filter_for_persist() {
        let mut t = Task::new("t", TaskState::Paused);
        assert!(is_legal(&t, TaskAction::FilterSimilar));
        assert!(!is_legal(&t, TaskAction::MakePersistent));
        assert!(is_legal(&t, TaskAction::Continue));

        t.is_test = true;
        assert!(is_legal(&t, TaskAction::MakePersistent));
        assert!(!is_legal(&t, TaskAction::FilterSimilar));
    }

    #[test]
    fn finish_is_never_derived() {
        for state in [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Paused,
            TaskState::Finished,
            TaskState::Terminated,
        ] {
            assert!(!is_legal(&Task::new("t", state), TaskAction::Finish));
        }
    }

    #[test]
    fn names_round_trip_through_parse() {
        for a in TaskAction::ALL {
            assert_eq!(TaskAction::parse(a.as_str()), Some(a));
        }
        assert_eq!(TaskAction::parse("run_now"), Some(TaskAction::RunNow));
        assert_eq!(TaskAction::parse("explode"), None);
    }
}
