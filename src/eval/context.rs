//! Per-execution evaluation state.

use std::collections::HashMap;

use crate::ast::values::NULL;
use crate::ast::Value;
use crate::error::{BindingError, ScriptResult};

/// Binding holding the raw parameter value.
pub const PARAMETER_OBJECT_KEY: &str = "_parameter";

/// Binding holding the configured database id (or null).
pub const DATABASE_ID_KEY: &str = "_databaseId";

/// Names under which a list parameter is reachable.
pub(crate) const COLLECTION_KEYS: [&str; 3] = ["list", "collection", "array"];

pub type Bindings = HashMap<String, Value>;

/// Bindings, emitted SQL fragments and the loop alias counter for one
/// execution of one statement. Never shared across executions.
#[derive(Debug)]
pub struct EvaluationContext {
    bindings: Bindings,
    fragments: Vec<String>,
    unique_number: usize,
}

impl EvaluationContext {
    pub fn new(parameter: Value, database_id: Option<&str>) -> Self {
        let mut bindings = Bindings::new();
        bindings.insert(PARAMETER_OBJECT_KEY.to_string(), parameter);
        bindings.insert(
            DATABASE_ID_KEY.to_string(),
            database_id.map(Value::from).unwrap_or_default(),
        );
        Self {
            bindings,
            fragments: Vec::new(),
            unique_number: 0,
        }
    }

    pub fn parameter(&self) -> &Value {
        self.bindings.get(PARAMETER_OBJECT_KEY).unwrap_or(&NULL)
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    /// Explicit binding only.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Resolve a root name: explicit bindings first, then the parameter.
    /// A map parameter without the key reads as `Null`, as does any name
    /// when the parameter itself is null.
    pub fn lookup(&self, name: &str) -> Result<&Value, BindingError> {
        if let Some(value) = self.bindings.get(name) {
            return Ok(value);
        }
        match self.parameter() {
            Value::Null => Ok(&NULL),
            Value::Map(entries) => Ok(entries.get(name).unwrap_or(&NULL)),
            list @ Value::List(_) if COLLECTION_KEYS.contains(&name) => Ok(list),
            _ => Err(self.unresolved(name)),
        }
    }

    /// Binding error for `path`, listing what is visible right now.
    pub fn unresolved(&self, path: impl Into<String>) -> BindingError {
        BindingError {
            path: path.into(),
            available: self.visible_names(),
        }
    }

    /// Sorted names that `lookup` can currently resolve.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        match self.parameter() {
            Value::Map(entries) => names.extend(entries.keys().cloned()),
            Value::List(_) => names.extend(COLLECTION_KEYS.iter().map(|k| k.to_string())),
            _ => {}
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn append_sql(&mut self, sql: impl Into<String>) {
        self.fragments.push(sql.into());
    }

    /// Fragments joined with one space, trimmed.
    pub fn sql(&self) -> String {
        self.fragments.join(" ").trim().to_string()
    }

    /// Next loop alias suffix.
    pub fn next_unique(&mut self) -> usize {
        let n = self.unique_number;
        self.unique_number += 1;
        n
    }

    /// Run `f` against an empty fragment buffer and return what it emitted.
    /// The outer buffer is restored either way.
    pub fn capture<F>(&mut self, f: F) -> ScriptResult<String>
    where
        F: FnOnce(&mut Self) -> ScriptResult<()>,
    {
        let outer = std::mem::take(&mut self.fragments);
        let result = f(self);
        let captured = std::mem::replace(&mut self.fragments, outer);
        result.map(|()| captured.join(" "))
    }

    /// Final SQL text and every binding made along the way.
    pub fn finish(self) -> (String, Bindings) {
        let sql = self.sql();
        (sql, self.bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_bindings() {
        let ctx = EvaluationContext::new(Value::Int(1), Some("postgres"));
        assert_eq!(ctx.binding(PARAMETER_OBJECT_KEY), Some(&Value::Int(1)));
        assert_eq!(ctx.binding(DATABASE_ID_KEY), Some(&Value::from("postgres")));

        let ctx = EvaluationContext::new(Value::Null, None);
        assert_eq!(ctx.binding(DATABASE_ID_KEY), Some(&Value::Null));
    }

    #[test]
    fn test_explicit_binding_shadows_parameter() {
        let mut ctx = EvaluationContext::new(Value::from(json!({"name": "param"})), None);
        assert_eq!(ctx.lookup("name").unwrap(), &Value::from("param"));
        ctx.bind("name", Value::from("bound"));
        assert_eq!(ctx.lookup("name").unwrap(), &Value::from("bound"));
    }

    #[test]
    fn test_missing_map_key_is_null() {
        let ctx = EvaluationContext::new(Value::from(json!({"a": 1})), None);
        assert_eq!(ctx.lookup("b").unwrap(), &Value::Null);
    }

    #[test]
    fn test_scalar_parameter_has_no_properties() {
        let ctx = EvaluationContext::new(Value::Int(5), None);
        let err = ctx.lookup("id").unwrap_err();
        assert_eq!(err.path, "id");
        assert_eq!(err.available, vec!["_databaseId", "_parameter"]);
    }

    #[test]
    fn test_list_parameter_aliases() {
        let ctx = EvaluationContext::new(Value::from(vec![1, 2]), None);
        assert_eq!(ctx.lookup("list").unwrap(), &Value::from(vec![1, 2]));
        assert!(ctx.lookup("ids").is_err());
    }

    #[test]
    fn test_fragments_join_and_trim() {
        let mut ctx = EvaluationContext::new(Value::Null, None);
        ctx.append_sql(" select * ");
        ctx.append_sql("from t ");
        assert_eq!(ctx.sql(), "select *  from t");
    }

    #[test]
    fn test_capture_isolates_and_restores() {
        let mut ctx = EvaluationContext::new(Value::Null, None);
        ctx.append_sql("outer");
        let inner = ctx
            .capture(|c| {
                c.append_sql("a");
                c.append_sql("b");
                Ok(())
            })
            .unwrap();
        assert_eq!(inner, "a b");
        assert_eq!(ctx.sql(), "outer");

        let failed = ctx.capture(|c| {
            c.append_sql("lost");
            Err(crate::error::ScriptError::evaluation("boom"))
        });
        assert!(failed.is_err());
        assert_eq!(ctx.sql(), "outer");
    }

    #[test]
    fn test_unique_numbers_increase() {
        let mut ctx = EvaluationContext::new(Value::Null, None);
        assert_eq!(ctx.next_unique(), 0);
        assert_eq!(ctx.next_unique(), 1);
    }
}
