//! The Evaluation Worker (§4.14): async, sampled quality scoring against
//! recorded query responses, draining a bounded FIFO queue on a fixed
//! interval.

pub mod evaluation;

pub use evaluation::{
    default_metrics, should_sample, EvaluationMetric, EvaluationQueue, EvaluationStats,
    EvaluationWorker, HeuristicOverlapMetric, NoopTraceSink, TraceSink,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("evaluation queue error: {0}")]
    Queue(String),

    #[error("core error: {0}")]
    Core(#[from] copilot_core::StageError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
