pub mod endpoint;
pub mod evaluator;

pub use endpoint::Producer;
pub use evaluator::{
    ErrorEvaluator, Evaluation, EvaluationReport, EvaluationStats, UnmatchedReason,
};
