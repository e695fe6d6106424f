//! In-memory FIFO run queue.

use std::collections::VecDeque;

use crate::core::{OrchestratorError, QueueBackend, QueuedRun};

/// Unbounded FIFO held in memory. Queued runs are lost on restart.
#[derive(Default)]
pub struct InMemoryQueue {
    runs: VecDeque<QueuedRun>,
}

impl InMemoryQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueBackend for InMemoryQueue {
    fn push(&mut self, run: QueuedRun) -> Result<(), OrchestratorError> {
        self.runs.push_back(run);
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<QueuedRun>, OrchestratorError> {
        Ok(self.runs.pop_front())
    }

    fn pending(&self) -> Vec<QueuedRun> {
        self.runs.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.runs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{QueryParams, RunRequest};
    use chrono::Utc;
    use uuid::Uuid;

    fn queued(n: usize) -> QueuedRun {
        QueuedRun {
            run_id: Uuid::new_v4(),
            request: RunRequest::Manual {
                query: QueryParams::new(None, None, n),
                trigger: None,
            },
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn fifo_order() {
        let mut q = InMemoryQueue::new();
        let runs: Vec<_> = (1..=3).map(queued).collect();
        for run in &runs {
            q.push(run.clone()).unwrap();
        }
        assert_eq!(q.len(), 3);
        for run in &runs {
            assert_eq!(q.pop().unwrap().unwrap().run_id, run.run_id);
        }
        assert!(q.pop().unwrap().is_none());
        assert!(q.is_empty());
    }
}
