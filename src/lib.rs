//! # sqlscript
//!
//! > **Write the SQL. Tag what changes.**
//!
//! sqlscript compiles tag-annotated SQL templates once and renders them per
//! call into final SQL with positional markers plus an ordered list of bind
//! parameter descriptors. Nothing is concatenated from user input except
//! explicit `${}` substitutions.
//!
//! ## Quick Example
//!
//! ```
//! use sqlscript::prelude::*;
//! use serde_json::json;
//!
//! let engine = Engine::default();
//! let parameter = Value::from(json!({"name": "ann", "ids": [1, 2]}));
//! let bound = engine.render(
//!     r#"<script>select * from users
//!        <where>
//!          <if test="name != null">AND name = #{name}</if>
//!          <if test="ids != null">AND id in
//!            <foreach collection="ids" item="id" open="(" separator="," close=")">#{id}</foreach>
//!          </if>
//!        </where></script>"#,
//!     &parameter,
//! ).unwrap();
//!
//! assert_eq!(
//!     sqlscript::shrink_whitespace(&bound.sql),
//!     "select * from users WHERE name = ? AND id in (?,?)"
//! );
//! assert_eq!(
//!     bound.resolve_values(&parameter).unwrap(),
//!     vec![Value::from("ann"), Value::Int(1), Value::Int(2)]
//! );
//! ```
//!
//! ## Tags
//!
//! | Tag | Effect |
//! |-----|--------|
//! | `<if test>` | Body only when `test` is truthy |
//! | `<choose>/<when test>/<otherwise>` | First matching branch |
//! | `<trim prefix suffix prefixOverrides suffixOverrides>` | Strips and wraps the body |
//! | `<where>` | `WHERE` plus a stripped leading `AND`/`OR` |
//! | `<set>` | `SET` plus a stripped trailing `,` |
//! | `<foreach collection item index open close separator>` | Repeats the body per element |
//! | `<bind name value>` | Binds an expression result for later nodes |
//!
//! `${expr}` is substituted into the text; `#{property, key=value}` becomes
//! a bind marker.

pub mod ast;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod mapping;
pub mod parser;
pub mod scanner;
pub mod types;

pub use engine::shrink_whitespace;

pub mod prelude {
    pub use crate::ast::{SqlNode, Value};
    pub use crate::catalog::{Catalog, MappedStatement, StatementKind};
    pub use crate::config::{PlaceholderStyle, ScriptConfig};
    pub use crate::engine::{Engine, SqlSource};
    pub use crate::error::*;
    pub use crate::mapping::{BoundSql, ParameterMapping};
    pub use crate::parser::{parse_document, Element};
    pub use crate::types::{JdbcType, ParameterMode, ValueType};
}

/// Render a `<script>` document or plain SQL with the default engine.
///
/// # Example
///
/// ```
/// use serde_json::json;
///
/// let bound = sqlscript::render(
///     "select * from t where id = #{id}",
///     &sqlscript::ast::Value::from(json!({"id": 7})),
/// ).unwrap();
/// assert_eq!(bound.sql, "select * from t where id = ?");
/// ```
pub fn render(script: &str, parameter: &ast::Value) -> error::ScriptResult<mapping::BoundSql> {
    engine::Engine::default().render(script, parameter)
}
