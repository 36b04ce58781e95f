use std::collections::VecDeque;

use super::kind::Task;

/// Ordered batch of tasks accumulated for one flush cycle
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task
    pub fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Insert a task ahead of everything queued so far
    pub fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    /// Insert a task at `index`, shifting later tasks back
    pub fn insert(&mut self, index: usize, task: Task) {
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, task);
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate in submission order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Remove and yield all tasks in submission order
    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }
}

impl IntoIterator for TaskQueue {
    type Item = Task;
    type IntoIter = std::collections::vec_deque::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::NodeId;
    use crate::task::{Location, TaskKind};

    fn task(path: &str) -> Task {
        Task::new(
            NodeId(0),
            Location::root("f.json").join(path),
            TaskKind::CreatePath,
        )
    }

    #[test]
    fn test_queue_keeps_submission_order() {
        let mut queue = TaskQueue::new();
        assert!(queue.is_empty());
        queue.push(task("a"));
        queue.push(task("b"));
        queue.push_front(task("root"));
        queue.insert(1, task("after_root"));
        assert_eq!(queue.len(), 4);

        let paths: Vec<String> = queue.drain().map(|t| t.location.path).collect();
        assert_eq!(paths, vec!["/root", "/after_root", "/a", "/b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_location_join_and_display() {
        let location = Location::root("data.json").join("data").join("/10/");
        assert_eq!(location.path, "/data/10");
        assert_eq!(location.components(), vec!["data", "10"]);
        assert_eq!(location.to_string(), "data.json:/data/10");
        assert_eq!(task("meshes").to_string(), "create-path f.json:/meshes");
    }
}
