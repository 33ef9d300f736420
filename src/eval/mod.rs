//! Template evaluation: bindings, expressions and node application.

pub mod apply;
pub mod context;
pub mod evaluator;

pub use context::{Bindings, EvaluationContext, DATABASE_ID_KEY, PARAMETER_OBJECT_KEY};
pub use evaluator::{eval_str, evaluate, evaluate_bool, values_equal, Evaluator};
