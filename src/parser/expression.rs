//! Test/value expression parsing using nom.
//!
//! Precedence, lowest first:
//!
//! ```text
//! c ? a : b            ternary (right-assoc)
//! or  ||               logical or
//! and &&               logical and
//! == eq  != neq        equality
//! < lt <= lte > gt >= gte in, not in
//! + -                  additive
//! * / %                multiplicative
//! ! not -              unary
//! .name .m(args) [i]   postfix
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, one_of},
    combinator::{opt, recognize},
    multi::separated_list0,
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::ast::{BinaryOp, Expr, UnaryOp, Value};
use crate::error::CompileError;

/// Parse a complete expression.
pub fn parse_expression(input: &str) -> Result<Expr, CompileError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(CompileError::expression(input, "empty expression"));
    }

    match parse_ternary(text) {
        Ok((rest, expr)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(expr)
            } else {
                Err(CompileError::expression(
                    text,
                    format!(
                        "unexpected '{}' at offset {}",
                        rest,
                        text.len() - rest.len()
                    ),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(CompileError::expression(
            text,
            format!("syntax error at offset {}", text.len() - e.input.len()),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(CompileError::expression(text, "unexpected end of expression"))
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

/// Match an operator token. Word operators (`and`, `not in`) must end at a
/// word boundary.
fn operator<'a>(input: &'a str, op: &str) -> Option<&'a str> {
    let mut rest = input;
    for (i, word) in op.split(' ').enumerate() {
        if i > 0 {
            rest = multispace1::<_, nom::error::Error<&str>>(rest).ok()?.0;
        }
        let (after, _) = tag::<_, _, nom::error::Error<&str>>(word)(rest).ok()?;
        if word.chars().all(char::is_alphabetic) && after.starts_with(is_ident_char) {
            return None;
        }
        rest = after;
    }
    Some(rest)
}

/// Left-associative chain of binary operators at one precedence level.
fn parse_binary_chain<'a, F>(
    mut input: &'a str,
    mut left: Expr,
    parse_operand: F,
    operators: &[(&str, BinaryOp)],
) -> IResult<&'a str, Expr>
where
    F: Fn(&'a str) -> IResult<&'a str, Expr>,
{
    loop {
        let (remaining, _) = ws(input)?;

        let matched = operators
            .iter()
            .find_map(|(op_str, op)| operator(remaining, op_str).map(|after| (after, *op)));

        let Some((after_op, op)) = matched else {
            break;
        };
        let (after_ws, _) = ws(after_op)?;
        let (after_right, right) = parse_operand(after_ws)?;
        left = Expr::binary(left, op, right);
        input = after_right;
    }

    Ok((input, left))
}

fn parse_ternary(input: &str) -> IResult<&str, Expr> {
    let (input, condition) = parse_or(input)?;
    let (after_ws, _) = ws(input)?;
    let Ok((after_q, _)) = char::<_, nom::error::Error<&str>>('?')(after_ws) else {
        return Ok((input, condition));
    };
    let (input, then) = preceded(ws, parse_ternary)(after_q)?;
    let (input, _) = preceded(ws, char(':'))(input)?;
    let (input, otherwise) = preceded(ws, parse_ternary)(input)?;
    Ok((
        input,
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
    ))
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_and(input)?;
    parse_binary_chain(input, left, parse_and, &[("||", BinaryOp::Or), ("or", BinaryOp::Or)])
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_equality(input)?;
    parse_binary_chain(
        input,
        left,
        parse_equality,
        &[("&&", BinaryOp::And), ("and", BinaryOp::And)],
    )
}

fn parse_equality(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_relational(input)?;
    parse_binary_chain(
        input,
        left,
        parse_relational,
        &[
            ("==", BinaryOp::Eq),
            ("eq", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("neq", BinaryOp::Ne),
        ],
    )
}

fn parse_relational(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_additive(input)?;
    parse_binary_chain(
        input,
        left,
        parse_additive,
        &[
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
            ("lte", BinaryOp::Le),
            ("lt", BinaryOp::Lt),
            ("gte", BinaryOp::Ge),
            ("gt", BinaryOp::Gt),
            ("not in", BinaryOp::NotIn),
            ("in", BinaryOp::In),
        ],
    )
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_multiplicative(input)?;
    parse_binary_chain(
        input,
        left,
        parse_multiplicative,
        &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    )
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_unary(input)?;
    parse_binary_chain(
        input,
        left,
        parse_unary,
        &[
            ("*", BinaryOp::Mul),
            ("/", BinaryOp::Div),
            ("%", BinaryOp::Rem),
        ],
    )
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    if let Some(rest) = operator(input, "!").filter(|rest| !rest.starts_with('=')) {
        return not(rest);
    }
    if let Some(rest) = operator(input, "not") {
        return not(rest);
    }
    if let Some(rest) = operator(input, "-") {
        let (rest, operand) = preceded(ws, parse_unary)(rest)?;
        let expr = match operand {
            Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
            Expr::Literal(Value::Float(n)) => Expr::Literal(Value::Float(-n)),
            other => Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(other),
            },
        };
        return Ok((rest, expr));
    }
    parse_postfix(input)
}

fn not(input: &str) -> IResult<&str, Expr> {
    let (input, operand) = preceded(ws, parse_unary)(input)?;
    Ok((
        input,
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        },
    ))
}

/// `.name`, `.method(args)` and `[index]` after a primary.
fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut expr) = parse_primary(input)?;
    loop {
        if let Ok((rest, name)) = preceded(char::<_, nom::error::Error<&str>>('.'), identifier)(input) {
            if let Ok((rest, args)) = call_args(rest) {
                expr = Expr::Call {
                    target: Box::new(expr),
                    method: name.to_string(),
                    args,
                };
                input = rest;
            } else {
                expr = Expr::Property {
                    target: Box::new(expr),
                    name: name.to_string(),
                };
                input = rest;
            }
            continue;
        }
        if let Ok((rest, index)) = bracketed('[', ']', parse_ternary)(input) {
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
            input = rest;
            continue;
        }
        break;
    }
    Ok((input, expr))
}

fn call_args(input: &str) -> IResult<&str, Vec<Expr>> {
    let (input, _) = char('(')(input)?;
    let (input, args) = separated_list0(char(','), delimited_ws(parse_ternary))(input)?;
    let (input, _) = preceded(ws, char(')'))(input)?;
    Ok((input, args))
}

fn delimited_ws<'a, F>(inner: F) -> impl Fn(&'a str) -> IResult<&'a str, Expr>
where
    F: Fn(&'a str) -> IResult<&'a str, Expr>,
{
    move |input| {
        let (input, _) = ws(input)?;
        let (input, expr) = inner(input)?;
        let (input, _) = ws(input)?;
        Ok((input, expr))
    }
}

fn bracketed<'a, F>(open: char, close: char, inner: F) -> impl Fn(&'a str) -> IResult<&'a str, Expr>
where
    F: Fn(&'a str) -> IResult<&'a str, Expr>,
{
    move |input| {
        let (input, _) = char(open)(input)?;
        let (input, expr) = delimited_ws(&inner)(input)?;
        let (input, _) = char(close)(input)?;
        Ok((input, expr))
    }
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_number,
        parse_string,
        parse_keyword_literal,
        parse_map_literal,
        parse_variable,
        parse_list_literal,
        bracketed('(', ')', parse_ternary),
        parse_ident,
    ))(input)
}

fn parse_ident(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;
    Ok((rest, Expr::ident(name)))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_char)))(input)
}

fn parse_keyword_literal(input: &str) -> IResult<&str, Expr> {
    for (word, value) in [
        ("null", Value::Null),
        ("true", Value::Bool(true)),
        ("false", Value::Bool(false)),
    ] {
        if let Some(rest) = operator(input, word) {
            return Ok((rest, Expr::Literal(value)));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

/// Integers and decimals, with the optional `L`, `d`, `f` and `B` suffixes.
fn parse_number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    let (rest, suffix) = opt(one_of("lLdDfFbB"))(rest)?;
    if rest.starts_with(is_ident_char) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        )));
    }

    let is_float = text.contains(['.', 'e', 'E']) || matches!(suffix, Some('d' | 'D' | 'f' | 'F'));
    let value = if is_float {
        text.parse().map(Value::Float).ok()
    } else {
        text.parse().map(Value::Int).ok()
    };
    match value {
        Some(value) => Ok((rest, Expr::Literal(value))),
        None => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

/// Single- or double-quoted string with backslash escapes.
fn parse_string(input: &str) -> IResult<&str, Expr> {
    let (after_quote, quote) = one_of("'\"")(input)?;
    let mut value = String::new();
    let mut chars = after_quote.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            c if c == quote => {
                return Ok((&after_quote[i + 1..], Expr::Literal(Value::String(value))));
            }
            c => value.push(c),
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// `#name`: a context variable.
fn parse_variable(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = preceded(char('#'), identifier)(input)?;
    Ok((rest, Expr::Variable(name.to_string())))
}

/// `{a, b, c}`
fn parse_list_literal(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('{')(input)?;
    let (input, items) = separated_list0(char(','), delimited_ws(parse_ternary))(input)?;
    let (input, _) = preceded(ws, char('}'))(input)?;
    Ok((input, Expr::List(items)))
}

/// `#{'key': value, ...}`
fn parse_map_literal(input: &str) -> IResult<&str, Expr> {
    let (input, _) = tag("#{")(input)?;
    let (input, entries) = separated_list0(char(','), map_entry)(input)?;
    let (input, _) = preceded(ws, char('}'))(input)?;
    Ok((input, Expr::Map(entries)))
}

fn map_entry(input: &str) -> IResult<&str, (Expr, Expr)> {
    let (input, key) = delimited_ws(parse_ternary)(input)?;
    let (input, _) = char(':')(input)?;
    let (input, value) = delimited_ws(parse_ternary)(input)?;
    Ok((input, (key, value)))
}
