use super::Action;
use std::rc::Rc;

/// One async step. It must end by calling `advance()` (or `rollback_next()`
/// for rollback steps) from its completion callback, or by routing the
/// Action to a failure path.
pub type Step = Rc<dyn Fn(&Action)>;

/// Ordered forward and rollback steps with their cursors.
///
/// Cursors only move forward; they go back to zero at (re)start and when the
/// respective list has finished.
#[derive(Default)]
pub struct TaskPipeline {
    tasks: Vec<Step>,
    rollback: Vec<Step>,
    task_index: usize,
    rollback_index: usize,
}

impl TaskPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_step(&mut self, step: Step) {
        self.tasks.push(step);
    }

    pub fn push_rollback_step(&mut self, step: Step) {
        self.rollback.push(step);
    }

    pub fn restart(&mut self) {
        self.task_index = 0;
    }

    /// Next forward step, moving the cursor past it.
    pub fn next_step(&mut self) -> Option<Step> {
        let step = self.tasks.get(self.task_index).cloned()?;
        self.task_index += 1;
        Some(step)
    }

    pub fn restart_rollback(&mut self) {
        self.rollback_index = 0;
    }

    pub fn next_rollback_step(&mut self) -> Option<Step> {
        let step = self.rollback.get(self.rollback_index).cloned()?;
        self.rollback_index += 1;
        Some(step)
    }

    pub fn reset_task_cursor(&mut self) {
        self.task_index = 0;
    }

    pub fn reset_rollback_cursor(&mut self) {
        self.rollback_index = 0;
    }

    pub fn is_done(&self) -> bool {
        self.task_index >= self.tasks.len()
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn rollback_index(&self) -> usize {
        self.rollback_index
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn rollback_len(&self) -> usize {
        self.rollback.len()
    }

    pub fn clear_tasks(&mut self) {
        self.tasks.clear();
        self.task_index = 0;
    }
}
