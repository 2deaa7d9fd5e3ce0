use std::collections::VecDeque;
use std::sync::Mutex;

use super::task::Task;

/// The FIFO source of an executor.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a task and returns the new queue length.
    pub(crate) fn push(&self, task: Task) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push_back(task);

        tasks.len()
    }

    pub(crate) fn pop(&self) -> Option<Task> {
        self.tasks.lock().unwrap().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all queued tasks.
    pub(crate) fn drain(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().drain(..).collect()
    }
}
