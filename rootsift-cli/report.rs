use std::time::Duration;

use rootsift_core::TaskError;
use serde::Serialize;

#[derive(Debug)]
pub enum TaskOutcome {
    /// Both artifacts already existed
    Skipped,
    Completed { descriptors: usize },
    Failed(TaskError),
    Cancelled,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Skipped => "skipped",
            TaskOutcome::Completed { .. } => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

impl From<Result<usize, TaskError>> for TaskOutcome {
    fn from(result: Result<usize, TaskError>) -> Self {
        match result {
            Ok(descriptors) => TaskOutcome::Completed { descriptors },
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            Err(err) => TaskOutcome::Failed(err),
        }
    }
}

#[derive(Debug)]
pub struct TaskReport {
    /// Position of the task in the batch input
    pub index: usize,
    pub image: String,
    pub outcome: TaskOutcome,
    pub elapsed: Duration,
}

/// Result of one batch run, ordered by task index
#[derive(Debug, Default)]
pub struct BatchReport {
    pub tasks: Vec<TaskReport>,
    pub elapsed: Duration,
}

impl BatchReport {
    fn count(&self, f: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks.iter().filter(|t| f(&t.outcome)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Completed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Cancelled))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskReport, &TaskError)> {
        self.tasks.iter().filter_map(|t| match &t.outcome {
            TaskOutcome::Failed(err) => Some((t, err)),
            _ => None,
        })
    }

    /// Every task either completed or was skipped
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} images: {} completed, {} skipped, {} failed, {} cancelled in {:.2?}",
            self.tasks.len(),
            self.completed(),
            self.skipped(),
            self.failed(),
            self.cancelled(),
            self.elapsed
        )
    }

    pub fn records(&self) -> Vec<ReportRecord> {
        self.tasks.iter().map(ReportRecord::from).collect()
    }
}

/// Flat, serializable view of a [`TaskReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub image: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: f64,
}

impl From<&TaskReport> for ReportRecord {
    fn from(task: &TaskReport) -> Self {
        let (descriptors, error_kind, error) = match &task.outcome {
            TaskOutcome::Completed { descriptors } => (Some(*descriptors), None, None),
            TaskOutcome::Failed(err) => (None, Some(err.kind()), Some(err.chain())),
            TaskOutcome::Skipped | TaskOutcome::Cancelled => (None, None, None),
        };
        Self {
            image: task.image.clone(),
            outcome: task.outcome.label(),
            descriptors,
            error_kind,
            error,
            elapsed_ms: task.elapsed.as_secs_f64() * 1000.0,
        }
    }
}
