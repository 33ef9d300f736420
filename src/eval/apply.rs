//! SQL node evaluation.

use std::convert::Infallible;

use crate::ast::node::itemize;
use crate::ast::{ForeachNode, SqlNode, TextSegment, TextTemplate, TrimNode, Value};
use crate::error::{ScriptError, ScriptResult};
use crate::eval::evaluator::Evaluator;
use crate::eval::EvaluationContext;
use crate::scanner::PLACEHOLDER;

/// Binding that `${}` text sees for a scalar parameter.
const SCALAR_PARAMETER_KEY: &str = "value";

impl SqlNode {
    /// Append this node's output to the context. Returns whether the node
    /// contributed anything.
    pub fn apply(&self, ctx: &mut EvaluationContext) -> ScriptResult<bool> {
        match self {
            SqlNode::StaticText(text) => {
                ctx.append_sql(text.as_str());
                Ok(true)
            }
            SqlNode::DynamicText(template) => {
                let text = render_text(template, ctx)?;
                ctx.append_sql(text);
                Ok(true)
            }
            SqlNode::Sequence(children) => {
                for child in children {
                    child.apply(ctx)?;
                }
                Ok(true)
            }
            SqlNode::If(node) => {
                if Evaluator::new(ctx).evaluate_bool(&node.test)? {
                    node.contents.apply(ctx)?;
                    return Ok(true);
                }
                Ok(false)
            }
            SqlNode::Choose(node) => {
                for when in &node.whens {
                    if Evaluator::new(ctx).evaluate_bool(&when.test)? {
                        when.contents.apply(ctx)?;
                        return Ok(true);
                    }
                }
                match &node.otherwise {
                    Some(otherwise) => {
                        otherwise.apply(ctx)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SqlNode::Trim(node) | SqlNode::Where(node) | SqlNode::Set(node) => apply_trim(node, ctx),
            SqlNode::Foreach(node) => apply_foreach(node, ctx),
            SqlNode::Bind(node) => {
                let value = match Evaluator::new(ctx).evaluate(&node.value) {
                    Ok(value) => value,
                    Err(ScriptError::Binding(_)) => Value::Null,
                    Err(e) => return Err(e),
                };
                ctx.bind(node.name.as_str(), value);
                Ok(true)
            }
        }
    }
}

fn render_text(template: &TextTemplate, ctx: &mut EvaluationContext) -> ScriptResult<String> {
    if ctx.binding(SCALAR_PARAMETER_KEY).is_none() {
        let parameter = ctx.parameter();
        if parameter.is_null() || parameter.is_scalar() {
            let parameter = parameter.clone();
            ctx.bind(SCALAR_PARAMETER_KEY, parameter);
        }
    }

    let evaluator = Evaluator::new(ctx);
    let mut out = String::new();
    for segment in &template.segments {
        match segment {
            TextSegment::Literal(text) => out.push_str(text),
            TextSegment::Expr(expr) => match evaluator.evaluate(expr)? {
                Value::Null => {}
                value => out.push_str(&value.to_string()),
            },
        }
    }
    Ok(out)
}

fn apply_trim(node: &TrimNode, ctx: &mut EvaluationContext) -> ScriptResult<bool> {
    let captured = ctx.capture(|c| node.contents.apply(c).map(|_| ()))?;
    match node.transform(&captured) {
        Some(text) => {
            ctx.append_sql(text);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn apply_foreach(node: &ForeachNode, ctx: &mut EvaluationContext) -> ScriptResult<bool> {
    let collection = match Evaluator::new(ctx).evaluate(&node.collection) {
        Ok(Value::Null) | Err(ScriptError::Binding(_)) => return Ok(false),
        Ok(value) => value,
        Err(e) => return Err(e),
    };

    let entries: Vec<(Value, Value)> = match collection {
        Value::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item))
            .collect(),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(key, value)| (Value::String(key), value))
            .collect(),
        other => {
            return Err(ScriptError::evaluation(format!(
                "foreach collection '{}' is not iterable ({} '{}')",
                node.collection,
                other.type_name(),
                other
            )));
        }
    };
    if entries.is_empty() {
        return Ok(false);
    }

    let item = node.item.as_deref();
    let index = node.index.as_deref();
    let saved_item = item.and_then(|name| ctx.binding(name).cloned());
    let saved_index = index.and_then(|name| ctx.binding(name).cloned());

    let result = iterate(node, ctx, entries);

    restore(ctx, item, saved_item);
    restore(ctx, index, saved_index);

    let bodies = result?;
    if bodies.is_empty() {
        return Ok(false);
    }

    let mut out = String::new();
    if let Some(open) = &node.open {
        out.push_str(open);
    }
    out.push_str(&bodies.join(node.separator.as_deref().unwrap_or("")));
    if let Some(close) = &node.close {
        out.push_str(close);
    }
    ctx.append_sql(out);
    Ok(true)
}

/// Run the loop body once per entry, collecting the non-empty outputs.
fn iterate(
    node: &ForeachNode,
    ctx: &mut EvaluationContext,
    entries: Vec<(Value, Value)>,
) -> ScriptResult<Vec<String>> {
    let item = node.item.as_deref();
    let index = node.index.as_deref();
    let mut bodies = Vec::with_capacity(entries.len());

    for (key, value) in entries {
        let unique = ctx.next_unique();
        if let Some(name) = index {
            ctx.bind(itemize(name, unique), key.clone());
            ctx.bind(name, key);
        }
        if let Some(name) = item {
            ctx.bind(itemize(name, unique), value.clone());
            ctx.bind(name, value);
        }

        let body = ctx.capture(|c| node.contents.apply(c).map(|_| ()))?;
        let body = rename_placeholders(&body, item, index, unique);
        let body = body.trim();
        if !body.is_empty() {
            bodies.push(body.to_string());
        }
    }
    Ok(bodies)
}

fn restore(ctx: &mut EvaluationContext, name: Option<&str>, saved: Option<Value>) {
    let Some(name) = name else {
        return;
    };
    match saved {
        Some(value) => ctx.bind(name, value),
        None => {
            ctx.unbind(name);
        }
    }
}

/// Point `#{item...}` and `#{index...}` at this iteration's aliases.
fn rename_placeholders(body: &str, item: Option<&str>, index: Option<&str>, unique: usize) -> String {
    let renamed = PLACEHOLDER.rewrite(body, |content| {
        let trimmed = content.trim_start();
        let aliased = [item, index].into_iter().flatten().find_map(|name| {
            let rest = trimmed.strip_prefix(name)?;
            let at_boundary = rest.is_empty()
                || rest.starts_with(['.', ',', ':', '[', ' ', '\t', '\r', '\n']);
            at_boundary.then(|| format!("{}{}", itemize(name, unique), rest))
        });
        Ok::<_, Infallible>(format!("#{{{}}}", aliased.as_deref().unwrap_or(content)))
    });
    match renamed {
        Ok(text) => text,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BindNode, ChooseNode, Expr, IfNode};
    use crate::parser::parse_expression;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn expr(text: &str) -> Expr {
        parse_expression(text).unwrap()
    }

    fn text(s: &str) -> SqlNode {
        SqlNode::StaticText(s.to_string())
    }

    fn if_node(test: &str, contents: SqlNode) -> SqlNode {
        SqlNode::If(IfNode {
            test: expr(test),
            contents: Box::new(contents),
        })
    }

    fn render(node: &SqlNode, param: serde_json::Value) -> (String, crate::eval::Bindings) {
        let mut ctx = EvaluationContext::new(Value::from(param), None);
        node.apply(&mut ctx).unwrap();
        ctx.finish()
    }

    fn foreach(collection: &str, item: &str, body: &str) -> ForeachNode {
        ForeachNode {
            collection: expr(collection),
            item: Some(item.to_string()),
            index: None,
            open: Some("(".to_string()),
            close: Some(")".to_string()),
            separator: Some(",".to_string()),
            contents: Box::new(text(body)),
        }
    }

    #[test]
    fn test_if_true_and_false() {
        let node = SqlNode::Sequence(vec![
            text("select * from t"),
            if_node("flag", text("where ok = 1")),
        ]);
        assert_eq!(render(&node, json!({"flag": true})).0, "select * from t where ok = 1");
        assert_eq!(render(&node, json!({"flag": false})).0, "select * from t");
    }

    #[test]
    fn test_choose_first_match_then_otherwise() {
        let node = SqlNode::Choose(ChooseNode {
            whens: vec![
                IfNode {
                    test: expr("kind == 'a'"),
                    contents: Box::new(text("A")),
                },
                IfNode {
                    test: expr("kind != null"),
                    contents: Box::new(text("ANY")),
                },
            ],
            otherwise: Some(Box::new(text("NONE"))),
        });
        assert_eq!(render(&node, json!({"kind": "a"})).0, "A");
        assert_eq!(render(&node, json!({"kind": "b"})).0, "ANY");
        assert_eq!(render(&node, json!({})).0, "NONE");
    }

    #[test]
    fn test_where_strips_leading_and() {
        let node = SqlNode::Where(TrimNode::where_clause(SqlNode::Sequence(vec![
            if_node("a != null", text("AND a = #{a}")),
            if_node("b != null", text("AND b = #{b}")),
        ])));
        assert_eq!(
            render(&node, json!({"a": 1, "b": 2})).0,
            "WHERE a = #{a} AND b = #{b}"
        );
        assert_eq!(render(&node, json!({"b": 2})).0, "WHERE b = #{b}");
        assert_eq!(render(&node, json!({})).0, "");
    }

    #[test]
    fn test_set_strips_trailing_comma() {
        let node = SqlNode::Set(TrimNode::set_clause(SqlNode::Sequence(vec![
            if_node("name != null", text("name = #{name},")),
            if_node("age != null", text("age = #{age},")),
        ])));
        assert_eq!(render(&node, json!({"name": "x"})).0, "SET name = #{name}");
    }

    #[test]
    fn test_dynamic_text_substitution() {
        let node = SqlNode::DynamicText(TextTemplate {
            source: "order by ${col} ${dir}".to_string(),
            segments: vec![
                TextSegment::Literal("order by ".to_string()),
                TextSegment::Expr(expr("col")),
                TextSegment::Literal(" ".to_string()),
                TextSegment::Expr(expr("dir")),
            ],
        });
        assert_eq!(
            render(&node, json!({"col": "name", "dir": null})).0,
            "order by name"
        );
    }

    #[test]
    fn test_dynamic_text_scalar_parameter_as_value() {
        let node = SqlNode::DynamicText(TextTemplate {
            source: "select * from ${value}".to_string(),
            segments: vec![
                TextSegment::Literal("select * from ".to_string()),
                TextSegment::Expr(expr("value")),
            ],
        });
        assert_eq!(render(&node, json!("users")).0, "select * from users");
    }

    #[test]
    fn test_foreach_distinct_aliases() {
        let node = SqlNode::Foreach(foreach("ids", "x", "#{x}"));
        let (sql, bindings) = render(&node, json!({"ids": [1, 2, 3]}));
        assert_eq!(sql, "(#{__frch_x_0},#{__frch_x_1},#{__frch_x_2})");
        assert_eq!(bindings["__frch_x_0"], Value::Int(1));
        assert_eq!(bindings["__frch_x_1"], Value::Int(2));
        assert_eq!(bindings["__frch_x_2"], Value::Int(3));
        assert!(!bindings.contains_key("x"));
    }

    #[test]
    fn test_foreach_rewrites_only_loop_names() {
        let node = SqlNode::Foreach(ForeachNode {
            index: Some("i".to_string()),
            ..foreach(
                "users",
                "u",
                "(#{u.name, jdbcType=VARCHAR}, #{i}, #{id}, #{user})",
            )
        });
        let (sql, bindings) = render(&node, json!({"users": [{"name": "a"}]}));
        assert_eq!(
            sql,
            "((#{__frch_u_0.name, jdbcType=VARCHAR}, #{__frch_i_0}, #{id}, #{user}))"
        );
        assert_eq!(bindings["__frch_i_0"], Value::Int(0));
    }

    #[test]
    fn test_foreach_over_map() {
        let body = SqlNode::DynamicText(TextTemplate {
            source: "${k} = #{v}".to_string(),
            segments: vec![
                TextSegment::Expr(expr("k")),
                TextSegment::Literal(" = #{v}".to_string()),
            ],
        });
        let node = SqlNode::Foreach(ForeachNode {
            index: Some("k".to_string()),
            contents: Box::new(body),
            ..foreach("m", "v", "")
        });
        let (sql, _) = render(&node, json!({"m": {"a": 1, "b": 2}}));
        assert_eq!(sql, "(a = #{__frch_v_0},b = #{__frch_v_1})");
    }

    #[test]
    fn test_foreach_null_or_missing_skips() {
        let node = SqlNode::Foreach(foreach("ids", "x", "#{x}"));
        assert_eq!(render(&node, json!({"ids": null})).0, "");
        assert_eq!(render(&node, json!({"ids": []})).0, "");
        let node = SqlNode::Foreach(foreach("user.ids", "x", "#{x}"));
        assert_eq!(render(&node, json!({"user": null})).0, "");
    }

    #[test]
    fn test_foreach_not_iterable() {
        let node = SqlNode::Foreach(foreach("ids", "x", "#{x}"));
        let mut ctx = EvaluationContext::new(Value::from(json!({"ids": 5})), None);
        assert!(matches!(node.apply(&mut ctx), Err(ScriptError::Evaluation(_))));
    }

    #[test]
    fn test_foreach_restores_outer_binding() {
        let node = SqlNode::Sequence(vec![
            SqlNode::Bind(BindNode {
                name: "x".to_string(),
                value: expr("'outer'"),
            }),
            SqlNode::Foreach(foreach("ids", "x", "#{x}")),
        ]);
        let (_, bindings) = render(&node, json!({"ids": [1]}));
        assert_eq!(bindings["x"], Value::from("outer"));
    }

    #[test]
    fn test_bind_visible_to_later_nodes_only() {
        let node = SqlNode::Sequence(vec![
            if_node("pattern != null", text("early")),
            SqlNode::Bind(BindNode {
                name: "pattern".to_string(),
                value: expr("'%' + name + '%'"),
            }),
            if_node("pattern != null", text("late")),
        ]);
        let (sql, bindings) = render(&node, json!({"name": "ann"}));
        assert_eq!(sql, "late");
        assert_eq!(bindings["pattern"], Value::from("%ann%"));
    }

    #[test]
    fn test_bind_unresolvable_is_null() {
        let node = SqlNode::Bind(BindNode {
            name: "b".to_string(),
            value: expr("user.name"),
        });
        let (_, bindings) = render(&node, json!({"user": null}));
        assert_eq!(bindings["b"], Value::Null);
    }

    #[test]
    fn test_if_binding_error_propagates() {
        let node = if_node("user.name != null", text("x"));
        let mut ctx = EvaluationContext::new(Value::from(json!({"user": null})), None);
        assert!(matches!(node.apply(&mut ctx), Err(ScriptError::Binding(_))));
    }
}
