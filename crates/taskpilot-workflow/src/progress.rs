//! Synchronous progress reporting for pipeline runs.

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Snapshot handed to the progress callback on every step status transition.
#[derive(Debug, Clone)]
pub struct Progress {
    pub current_step_name: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub percent: u32,
    pub message: String,
}

impl Progress {
    pub fn new(
        current_step_name: impl Into<String>,
        total_steps: usize,
        completed_steps: usize,
        message: impl Into<String>,
    ) -> Self {
        let percent = if total_steps == 0 {
            0
        } else {
            ((completed_steps as f64 / total_steps as f64) * 100.0).round() as u32
        };
        Self {
            current_step_name: current_step_name.into(),
            total_steps,
            completed_steps,
            percent,
            message: message.into(),
        }
    }
}

/// Invoked synchronously on every transition; no batching.
pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
