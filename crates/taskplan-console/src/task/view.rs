use chrono::{DateTime, Local, Utc};

use super::{Task, TaskState};
use crate::error::Result;

pub const BUILTIN_DETAIL_COLUMNS: [&str; 5] = ["name", "saved", "created", "iterations", "started"];

/// `HH:MM:SS` from one hour up, `MM:SS` below, `--:--` when unknown.
pub fn render_time(secs: Option<u64>) -> String {
    let Some(t) = secs else {
        return "--:--".to_string();
    };
    if t >= 3600 {
        format!("{:02}:{:02}:{:02}", t / 3600, (t % 3600) / 60, t % 60)
    } else {
        format!("{:02}:{:02}", t / 60, t % 60)
    }
}

pub fn render_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

impl Task {
    /// Completed fraction, clamped to 1 when the backend overruns.
    pub fn progress(&self) -> f64 {
        if self.total_iterations == 0 {
            return 0.0;
        }
        (self.finished_iterations as f64 / self.total_iterations as f64).min(1.0)
    }

    /// `run / left` while running, the 1-based queue position while queued,
    /// the last save time once settled.
    pub fn status_text(&self, queue_index: Option<usize>) -> String {
        match self.state {
            TaskState::Running => format!(
                "{} / {}",
                render_time(self.run_time),
                render_time(self.time_left)
            ),
            TaskState::Queued => queue_index.map_or_else(|| "-".to_string(), |i| (i + 1).to_string()),
            TaskState::Paused | TaskState::Finished | TaskState::Terminated => {
                render_timestamp(self.saved_time)
            }
        }
    }

    pub fn current_action_label(&self) -> Option<&'static str> {
        if self.is_pausing {
            Some("pausing...")
        } else if self.is_saving {
            Some("saving...")
        } else if self.creating_checkpoint {
            Some("checkpoint...")
        } else {
            None
        }
    }

    pub fn display_name(&self) -> Result<String> {
        if self.is_test {
            return Ok("Test".to_string());
        }
        let parts = self.name_parts()?;
        if parts.is_empty() {
            return Ok("Task".to_string());
        }
        Ok(parts.join(" / "))
    }

    pub fn iterations_text(&self) -> String {
        format!("{} / {}", self.finished_iterations, self.total_iterations)
    }

    /// Value for the configurable detail column.
    pub fn detail_value(&self, column: &str) -> Result<String> {
        Ok(match column {
            "name" => self.display_name()?,
            "saved" => render_timestamp(self.saved_time),
            "created" => render_timestamp(self.creation_time),
            "iterations" => self.iterations_text(),
            "started" => render_timestamp(self.start_time),
            metric => match self.metric(metric) {
                Some(v) => format!("{v:.3}"),
                None => "N/A".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::template::ParamValueRef;

    #[test]
    fn time_rendering_pads_fields() {
        assert_eq!(render_time(Some(45)), "00:45");
        assert_eq!(render_time(Some(125)), "02:05");
        assert_eq!(render_time(Some(3725)), "01:02:05");
        assert_eq!(render_time(Some(3600)), "01:00:00");
        assert_eq!(render_time(None), "--:--");
    }

    #[test]
    fn progress_clamps_overrun() {
        let mut t = Task::new("t", TaskState::Running);
        t.finished_iterations = 7;
        t.total_iterations = 5;
        assert_eq!(t.progress(), 1.0);
        t.finished_iterations = 1;
        t.total_iterations = 4;
        assert_eq!(t.progress(), 0.25);
        t.total_iterations = 0;
        assert_eq!(t.progress(), 0.0);
    }

    #[test]
    fn status_shows_times_only_while_running() {
        let mut t = Task::new("t", TaskState::Running);
        t.run_time = Some(125);
        assert_eq!(t.status_text(None), "02:05 / --:--");
        t.state = TaskState::Queued;
        assert_eq!(t.status_text(Some(3)), "4");
        assert_eq!(t.status_text(None), "-");
    }

    #[test]
    fn settled_tasks_show_save_time_not_a_position() {
        let mut t = Task::new("f1", TaskState::Finished);
        assert_eq!(t.status_text(None), "-");
        let saved = Utc::now();
        t.saved_time = Some(saved);
        assert_eq!(t.status_text(None), render_timestamp(Some(saved)));
        t.state = TaskState::Paused;
        assert_eq!(t.status_text(None), render_timestamp(Some(saved)));
    }

    #[test]
    fn action_label_prefers_pausing() {
        let mut t = Task::new("t", TaskState::Running);
        assert_eq!(t.current_action_label(), None);
        t.creating_checkpoint = true;
        assert_eq!(t.current_action_label(), Some("checkpoint..."));
        t.is_saving = true;
        assert_eq!(t.current_action_label(), Some("saving..."));
        t.is_pausing = true;
        assert_eq!(t.current_action_label(), Some("pausing..."));
    }

    #[test]
    fn display_name_variants() {
        let mut t = Task::new("t", TaskState::Paused);
        assert_eq!(t.display_name().expect("name"), "Task");
        t.params = vec![
            ParamValueRef::new("v1", "lr_$T0$", vec!["0.1".into()]),
            ParamValueRef::new("v2", "adam", vec![]),
        ];
        assert_eq!(t.display_name().expect("name"), "lr_0.1 / adam");
        t.is_test = true;
        assert_eq!(t.display_name().expect("name"), "Test");
    }

    #[test]
    fn broken_template_surfaces_as_error() {
        let mut t = Task::new("t", TaskState::Paused);
        t.params = vec![ParamValueRef::new("v1", "lr_$T0$", vec![])];
        assert!(t.display_name().is_err());
    }

    #[test]
    fn detail_column_formats_metrics() {
        let mut t = Task::new("t", TaskState::Paused);
        t.metrics
            .insert("loss".into(), serde_json::json!([0.5, 0.4, 0.12345]));
        assert_eq!(t.detail_value("loss").expect("detail"), "0.123");
        assert_eq!(t.detail_value("acc").expect("detail"), "N/A");
        assert_eq!(t.detail_value("saved").expect("detail"), "-");
        t.finished_iterations = 3;
        t.total_iterations = 10;
        assert_eq!(t.detail_value("iterations").expect("detail"), "3 / 10");
    }
}
