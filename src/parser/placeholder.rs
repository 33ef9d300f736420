//! `#{...}` placeholder content.
//!
//! ```text
//! #{ user.age : NUMERIC , numericScale = 2 , mode = IN }
//!    ───┬────   ───┬───   ──────────────┬────────────
//!       │          │                    └── options (key = value)
//!       │          └── jdbc type shorthand
//!       └── property path
//! ```

use nom::{
    bytes::complete::take_till,
    character::complete::{char, multispace0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::error::CompileError;

/// Keys accepted after the property.
pub const OPTION_KEYS: [&str; 8] = [
    "property",
    "javaType",
    "jdbcType",
    "mode",
    "numericScale",
    "resultMap",
    "typeHandler",
    "jdbcTypeName",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Placeholder {
    pub property: String,
    /// `property:TYPE` shorthand.
    pub jdbc_type: Option<String>,
    /// Remaining `key=value` options in order of appearance.
    pub options: Vec<(String, String)>,
}

impl Placeholder {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse placeholder content (without the `#{`/`}` delimiters).
pub fn parse_placeholder(content: &str) -> Result<Placeholder, CompileError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('(') {
        return Err(CompileError::UnsupportedExpression(content.to_string()));
    }

    let (rest, (property, jdbc_type)) = head(trimmed)
        .map_err(|_| CompileError::placeholder(content, "malformed property"))?;

    let mut placeholder = Placeholder {
        property: property.trim().to_string(),
        jdbc_type: jdbc_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        options: Vec::new(),
    };

    if rest.is_empty() {
        return Ok(placeholder);
    }
    // `head` stops only at ',' or end of input
    for option in rest[1..].split(',') {
        let Some((key, value)) = option.split_once('=') else {
            return Err(CompileError::placeholder(
                content,
                format!("expected key=value but found '{}'", option.trim()),
            ));
        };
        let key = key.trim();
        if key == "expression" {
            return Err(CompileError::UnsupportedExpression(content.to_string()));
        }
        if !OPTION_KEYS.contains(&key) {
            return Err(CompileError::InvalidPlaceholderKey {
                key: key.to_string(),
                content: content.to_string(),
            });
        }
        if key != "property" {
            placeholder
                .options
                .push((key.to_string(), value.trim().to_string()));
        }
    }
    Ok(placeholder)
}

/// `property (: jdbcType)?` up to the first option separator.
fn head(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    let (input, property) = take_till(|c: char| c == ',' || c == ':')(input)?;
    let (input, jdbc_type) = opt(preceded(char(':'), take_till(|c: char| c == ',')))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (property, jdbc_type)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_property() {
        let p = parse_placeholder(" id ").unwrap();
        assert_eq!(p.property, "id");
        assert_eq!(p.jdbc_type, None);
        assert!(p.options.is_empty());
    }

    #[test]
    fn test_jdbc_shorthand_and_options() {
        let p = parse_placeholder("price:NUMERIC, numericScale=2, mode=IN").unwrap();
        assert_eq!(p.property, "price");
        assert_eq!(p.jdbc_type.as_deref(), Some("NUMERIC"));
        assert_eq!(p.option("numericScale"), Some("2"));
        assert_eq!(p.option("mode"), Some("IN"));
    }

    #[test]
    fn test_expression_rejected() {
        assert!(matches!(
            parse_placeholder("(id + 1), jdbcType=INTEGER"),
            Err(CompileError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            parse_placeholder("id, expression=x"),
            Err(CompileError::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_unknown_key() {
        let err = parse_placeholder("id, jdbcTyp=VARCHAR").unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidPlaceholderKey {
                key: "jdbcTyp".to_string(),
                content: "id, jdbcTyp=VARCHAR".to_string(),
            }
        );
    }

    #[test]
    fn test_option_without_value() {
        assert!(matches!(
            parse_placeholder("id, jdbcType"),
            Err(CompileError::InvalidPlaceholder { .. })
        ));
    }
}
