//! Result aggregation
//!
//! Collects per-task values by submission index and settles the
//! submission's completion exactly once.

use crate::completion::Settler;
use crate::error::ExecutionError;
use paratask_ipc::TaskValue;
use tracing::debug;

/// Per-submission result table
#[derive(Debug)]
pub struct ResultAggregator {
    results: Vec<Option<TaskValue>>,
    settler: Option<Settler>,
}

impl ResultAggregator {
    pub fn new(task_count: usize, settler: Settler) -> Self {
        Self {
            results: vec![None; task_count],
            settler: Some(settler),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.settler.is_none()
    }

    /// Store the value reported by task `index`. The first value per index
    /// wins; anything after finalization is ignored.
    pub fn record(&mut self, index: usize, value: TaskValue) -> bool {
        if self.is_finalized() {
            return false;
        }
        match self.results.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    pub fn all_recorded(&self) -> bool {
        self.results.iter().all(Option::is_some)
    }

    /// Resolve with results in submission order. Tasks that never reported
    /// contribute `undefined`.
    pub fn finalize_success(&mut self) -> bool {
        let Some(settler) = self.settler.take() else {
            return false;
        };

        let values: Vec<TaskValue> = self
            .results
            .drain(..)
            .map(|r| r.unwrap_or_else(TaskValue::undefined))
            .collect();
        debug!(tasks = values.len(), "Submission resolved");
        settler.resolve(values);
        true
    }

    /// Reject with `error`; a no-op once finalized
    pub fn finalize_failure(&mut self, error: ExecutionError) -> bool {
        let Some(settler) = self.settler.take() else {
            return false;
        };

        debug!("Submission rejected: {}", error);
        self.results.clear();
        settler.reject(error);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{Completion, TokioCompletion};
    use paratask_ipc::ValueKind;
    use serde_json::json;
    use std::sync::Arc;

    fn pending() -> (Completion<Vec<TaskValue>>, ResultAggregator) {
        let (tx, rx) = std::sync::mpsc::channel();
        let completion = Completion::with_primitive(Arc::new(TokioCompletion), move |s| {
            tx.send(s).unwrap();
        });
        (completion, ResultAggregator::new(3, rx.recv().unwrap()))
    }

    fn number(n: i64) -> TaskValue {
        TaskValue::new(json!(n), ValueKind::Number)
    }

    #[tokio::test]
    async fn test_results_follow_submission_order() {
        let (completion, mut aggregator) = pending();

        assert!(aggregator.record(2, number(2)));
        assert!(aggregator.record(0, number(0)));
        assert!(!aggregator.all_recorded());
        assert!(aggregator.record(1, number(1)));
        assert!(aggregator.all_recorded());

        assert!(aggregator.finalize_success());
        assert_eq!(completion.await.unwrap(), vec![number(0), number(1), number(2)]);
    }

    #[tokio::test]
    async fn test_first_value_per_index_wins() {
        let (completion, mut aggregator) = pending();

        assert!(aggregator.record(0, number(1)));
        assert!(!aggregator.record(0, number(2)));
        assert!(!aggregator.record(9, number(9)));
        assert!(!aggregator.all_recorded());

        aggregator.finalize_success();
        let values = completion.await.unwrap();
        assert_eq!(values[0], number(1));
        assert_eq!(values[1], TaskValue::undefined());
        assert_eq!(values[2], TaskValue::undefined());
    }

    #[tokio::test]
    async fn test_finalizes_exactly_once() {
        let (completion, mut aggregator) = pending();

        assert!(aggregator.finalize_failure(ExecutionError::TaskFailed {
            index: 1,
            failure: TaskValue::new(json!("Test error"), ValueKind::String),
        }));
        assert!(aggregator.is_finalized());
        assert!(!aggregator.finalize_success());
        assert!(!aggregator.finalize_failure(ExecutionError::Abandoned));
        assert!(!aggregator.record(0, number(0)));

        match completion.await {
            Err(ExecutionError::TaskFailed { index, failure }) => {
                assert_eq!(index, 1);
                assert_eq!(failure.value, json!("Test error"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
