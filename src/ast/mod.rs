//! Template AST: values, expressions, property paths and SQL nodes.

pub mod expr;
pub mod node;
pub mod path;
pub mod values;

pub use expr::{BinaryOp, Expr, UnaryOp};
pub use node::{
    BindNode, ChooseNode, ForeachNode, IfNode, SqlNode, TextSegment, TextTemplate, TrimNode,
};
pub use path::{PathSegment, PropertyPath};
pub use values::Value;
