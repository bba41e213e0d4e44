use chrono::{Local, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Terminal tasks are retained this long before garbage collection.
const TASK_TTL: Duration = Duration::from_secs(3600);

/// Lifecycle of a long-running analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Batch outcome counters attached to a finished task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TaskSummary {
    pub successful: u64,
    pub failed: u64,
    pub skipped_cached: u64,
}

/// Snapshot of one task's state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    /// Fraction of files processed, in [0, 1].
    pub progress: f64,
    pub current_file: Option<String>,
    pub processed: u64,
    pub total: u64,
    pub errors: Vec<String>,
    /// Epoch seconds when the task was created.
    pub started_at: i64,
    /// Estimated completion, epoch seconds, once enough progress exists.
    pub estimated_completion: Option<i64>,
    pub summary: Option<TaskSummary>,
    #[serde(skip)]
    touched: Instant,
}

/// Incremental change applied to a running task.
#[derive(Debug, Default)]
pub struct TaskDelta {
    pub status: Option<TaskStatus>,
    pub processed: Option<u64>,
    pub current_file: Option<Option<String>>,
    pub error: Option<String>,
    pub summary: Option<TaskSummary>,
}

/// In-memory map of analysis jobs, shared behind one coarse lock.
/// Terminal tasks older than the TTL are evicted on the next access.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskState>>,
    counter: AtomicU64,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Register a new pending task and return its ID. The ID embeds a
    /// wall-clock stamp plus a monotonic counter so rapid creation cannot
    /// collide.
    pub fn create(&self, total: u64) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let task_id = format!("analysis_{}_{}", Local::now().format("%Y%m%d_%H%M%S"), seq);

        let state = TaskState {
            task_id: task_id.clone(),
            status: TaskStatus::Pending,
            progress: 0.0,
            current_file: None,
            processed: 0,
            total,
            errors: Vec::new(),
            started_at: Utc::now().timestamp(),
            estimated_completion: None,
            summary: None,
            touched: Instant::now(),
        };

        let mut tasks = self.tasks.lock().unwrap();
        Self::evict_expired(&mut tasks);
        tasks.insert(task_id.clone(), state);
        task_id
    }

    /// Apply a delta to a task. Unknown IDs are ignored (the task may have
    /// been evicted). Returns the updated snapshot if the task exists.
    pub fn update(&self, task_id: &str, delta: TaskDelta) -> Option<TaskState> {
        let mut tasks = self.tasks.lock().unwrap();
        let state = tasks.get_mut(task_id)?;

        if let Some(status) = delta.status {
            state.status = status;
        }
        if let Some(processed) = delta.processed {
            state.processed = processed;
            if state.total > 0 {
                state.progress = (processed as f64 / state.total as f64).clamp(0.0, 1.0);
                state.estimated_completion = estimate_completion(state);
            }
        }
        if let Some(current) = delta.current_file {
            state.current_file = current;
        }
        if let Some(err) = delta.error {
            state.errors.push(err);
        }
        if let Some(summary) = delta.summary {
            state.summary = Some(summary);
        }
        if state.status.is_terminal() && state.status == TaskStatus::Completed {
            state.progress = 1.0;
            state.current_file = None;
        }
        state.touched = Instant::now();
        Some(state.clone())
    }

    /// Request cooperative cancellation. Valid only from `running`;
    /// returns whether the transition happened.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(task_id) {
            Some(state) if state.status == TaskStatus::Running => {
                state.status = TaskStatus::Cancelled;
                state.touched = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Snapshot a task's state.
    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        let mut tasks = self.tasks.lock().unwrap();
        Self::evict_expired(&mut tasks);
        tasks.get(task_id).cloned()
    }

    /// Whether a task has been moved to `cancelled` (polled by the engine
    /// between files).
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .get(task_id)
            .is_some_and(|t| t.status == TaskStatus::Cancelled)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(tasks: &mut HashMap<String, TaskState>) {
        tasks.retain(|_, t| !(t.status.is_terminal() && t.touched.elapsed() > TASK_TTL));
    }
}

fn estimate_completion(state: &TaskState) -> Option<i64> {
    if state.processed == 0 || state.total == 0 {
        return None;
    }
    let elapsed = (Utc::now().timestamp() - state.started_at).max(0) as f64;
    let per_file = elapsed / state.processed as f64;
    let remaining = (state.total - state.processed.min(state.total)) as f64;
    Some(Utc::now().timestamp() + (per_file * remaining) as i64)
}
