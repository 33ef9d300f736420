use crate::ast::*;
use crate::error::CompileError;
use crate::parser::parse_expression;

fn lit(v: impl Into<Value>) -> Expr {
    Expr::Literal(v.into())
}

#[test]
fn test_not_null_check() {
    let expr = parse_expression("name != null").unwrap();
    assert_eq!(
        expr,
        Expr::binary(Expr::ident("name"), BinaryOp::Ne, Expr::Literal(Value::Null))
    );
}

#[test]
fn test_and_with_method_call() {
    let expr = parse_expression("ids != null and ids.size() > 0").unwrap();
    let size = Expr::Call {
        target: Box::new(Expr::ident("ids")),
        method: "size".to_string(),
        args: vec![],
    };
    assert_eq!(
        expr,
        Expr::binary(
            Expr::binary(Expr::ident("ids"), BinaryOp::Ne, Expr::Literal(Value::Null)),
            BinaryOp::And,
            Expr::binary(size, BinaryOp::Gt, lit(0)),
        )
    );
}

#[test]
fn test_symbolic_logical_operators() {
    let words = parse_expression("a and b or c").unwrap();
    let symbols = parse_expression("a && b || c").unwrap();
    assert_eq!(words, symbols);
    assert_eq!(words.to_string(), "((a and b) or c)");
}

#[test]
fn test_arithmetic_precedence() {
    let expr = parse_expression("1 + 2 * 3").unwrap();
    assert_eq!(
        expr,
        Expr::binary(lit(1), BinaryOp::Add, Expr::binary(lit(2), BinaryOp::Mul, lit(3)))
    );
}

#[test]
fn test_word_operator_needs_boundary() {
    let expr = parse_expression("order == 'x'").unwrap();
    assert_eq!(expr, Expr::binary(Expr::ident("order"), BinaryOp::Eq, lit("x")));

    let expr = parse_expression("notes neq andy").unwrap();
    assert_eq!(
        expr,
        Expr::binary(Expr::ident("notes"), BinaryOp::Ne, Expr::ident("andy"))
    );
}

#[test]
fn test_relational_words() {
    let expr = parse_expression("age gte 18").unwrap();
    assert_eq!(expr, Expr::binary(Expr::ident("age"), BinaryOp::Ge, lit(18)));
    let expr = parse_expression("age <= 65").unwrap();
    assert_eq!(expr, Expr::binary(Expr::ident("age"), BinaryOp::Le, lit(65)));
}

#[test]
fn test_in_and_not_in() {
    let expr = parse_expression("state not in {'A', 'B'}").unwrap();
    assert_eq!(
        expr,
        Expr::binary(
            Expr::ident("state"),
            BinaryOp::NotIn,
            Expr::List(vec![lit("A"), lit("B")]),
        )
    );
    let expr = parse_expression("1 in list").unwrap();
    assert_eq!(expr, Expr::binary(lit(1), BinaryOp::In, Expr::ident("list")));
}

#[test]
fn test_map_literal_and_variable() {
    let expr = parse_expression("#{'a': 1, 'b': #limit}").unwrap();
    assert_eq!(
        expr,
        Expr::Map(vec![
            (lit("a"), lit(1)),
            (lit("b"), Expr::Variable("limit".to_string())),
        ])
    );
}

#[test]
fn test_unary() {
    assert_eq!(parse_expression("-5").unwrap(), lit(-5));
    assert_eq!(
        parse_expression("-x").unwrap(),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(Expr::ident("x")),
        }
    );
    let bang = parse_expression("!flag").unwrap();
    let word = parse_expression("not flag").unwrap();
    assert_eq!(bang, word);
}

#[test]
fn test_ternary() {
    let expr = parse_expression("active ? 'Y' : 'N'").unwrap();
    assert_eq!(
        expr,
        Expr::Conditional {
            condition: Box::new(Expr::ident("active")),
            then: Box::new(lit("Y")),
            otherwise: Box::new(lit("N")),
        }
    );
}

#[test]
fn test_number_suffixes() {
    assert_eq!(parse_expression("10L").unwrap(), lit(10));
    assert_eq!(parse_expression("1.5").unwrap(), lit(1.5));
    assert_eq!(parse_expression("2d").unwrap(), lit(2.0));
}

#[test]
fn test_index_and_property_chain() {
    let expr = parse_expression("orders[0].item.name").unwrap();
    assert!(expr.is_path());
    assert_eq!(expr.to_string(), "orders[0].item.name");
}

#[test]
fn test_string_escapes() {
    assert_eq!(parse_expression(r"'it\'s'").unwrap(), lit("it's"));
    assert_eq!(parse_expression(r#""say \"hi\"""#).unwrap(), lit("say \"hi\""));
}

#[test]
fn test_dangling_operator_is_error() {
    let err = parse_expression("a ==").unwrap_err();
    assert!(matches!(err, CompileError::Expression { .. }));
}

#[test]
fn test_trailing_input_is_error() {
    let err = parse_expression("a b").unwrap_err();
    assert_eq!(
        err,
        CompileError::expression("a b", "unexpected 'b' at offset 2")
    );
}

#[test]
fn test_unterminated_string_is_error() {
    assert!(parse_expression("name == 'abc").is_err());
    assert!(parse_expression("").is_err());
}
