//! Identity of one unit of parallel work

use std::sync::Arc;

crate::proxy_struct! {
    /// Per-task identity handed to a task function
    ///
    /// `begin..end` is the range of tile-group offsets the task scans.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TaskInfo as "TaskInfo" {
        /// Index of this task
        pub task_id: u32,
        /// Number of tasks in the fan-out
        pub num_tasks: u32,
        /// First tile-group offset
        pub begin: u32,
        /// One past the last tile-group offset
        pub end: u32,
    }
}

impl TaskInfo {
    /// Task `task_id` of `num_tasks`, covering `begin..end`
    pub fn new(task_id: u32, num_tasks: u32, begin: u32, end: u32) -> Self {
        Self {
            task_id,
            num_tasks,
            begin,
            end,
        }
    }

    /// Shared handle, as generated code passes it around
    pub fn shared(task_id: u32, num_tasks: u32, begin: u32, end: u32) -> Arc<Self> {
        Arc::new(Self::new(task_id, num_tasks, begin, end))
    }

    /// Split `0..total` into at most `max_tasks` contiguous ranges of at least
    /// `min_per_task` items
    pub fn partition(total: u32, max_tasks: u32, min_per_task: u32) -> Vec<TaskInfo> {
        if total == 0 {
            return Vec::new();
        }
        let per_task = total.div_ceil(max_tasks.max(1)).max(min_per_task.max(1));
        let num_tasks = total.div_ceil(per_task);
        (0..num_tasks)
            .map(|i| {
                let begin = i * per_task;
                TaskInfo::new(i, num_tasks, begin, (begin + per_task).min(total))
            })
            .collect()
    }
}
