//! Compiled template nodes.
//!
//! A statement body compiles into one [`SqlNode`] tree. Nodes are immutable
//! once built and hold no per-execution state, so one tree serves every
//! concurrent execution of its statement.

use crate::ast::Expr;

/// Prefixes stripped by `<where>`.
const WHERE_PREFIXES: [&str; 8] = [
    "AND ", "OR ", "AND\n", "OR\n", "AND\r", "OR\r", "AND\t", "OR\t",
];

#[derive(Debug, Clone, PartialEq)]
pub enum SqlNode {
    StaticText(String),
    DynamicText(TextTemplate),
    If(IfNode),
    Choose(ChooseNode),
    Trim(TrimNode),
    Where(TrimNode),
    Set(TrimNode),
    Foreach(ForeachNode),
    Bind(BindNode),
    Sequence(Vec<SqlNode>),
}

impl SqlNode {
    /// Element name this node was compiled from, `None` for text.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            SqlNode::StaticText(_) | SqlNode::DynamicText(_) | SqlNode::Sequence(_) => None,
            SqlNode::If(_) => Some("if"),
            SqlNode::Choose(_) => Some("choose"),
            SqlNode::Trim(_) => Some("trim"),
            SqlNode::Where(_) => Some("where"),
            SqlNode::Set(_) => Some("set"),
            SqlNode::Foreach(_) => Some("foreach"),
            SqlNode::Bind(_) => Some("bind"),
        }
    }

    pub fn is_static_text(&self) -> bool {
        match self {
            SqlNode::StaticText(_) => true,
            SqlNode::Sequence(children) => children.iter().all(SqlNode::is_static_text),
            _ => false,
        }
    }
}

/// Text with `${...}` substitutions, split at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct TextTemplate {
    pub source: String,
    pub segments: Vec<TextSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextSegment {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub test: Expr,
    pub contents: Box<SqlNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChooseNode {
    pub whens: Vec<IfNode>,
    pub otherwise: Option<Box<SqlNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindNode {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeachNode {
    pub collection: Expr,
    pub item: Option<String>,
    pub index: Option<String>,
    pub open: Option<String>,
    pub close: Option<String>,
    pub separator: Option<String>,
    pub contents: Box<SqlNode>,
}

/// Alias bound for one loop iteration, e.g. `__frch_item_3`.
pub fn itemize(name: &str, unique: usize) -> String {
    format!("__frch_{}_{}", name, unique)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrimNode {
    pub contents: Box<SqlNode>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Upper-cased at construction.
    pub prefix_overrides: Vec<String>,
    pub suffix_overrides: Vec<String>,
}

impl TrimNode {
    /// Build a `<trim>` node. Overrides are `|`-separated lists.
    pub fn new(
        contents: SqlNode,
        prefix: Option<String>,
        prefix_overrides: Option<&str>,
        suffix: Option<String>,
        suffix_overrides: Option<&str>,
    ) -> Self {
        Self {
            contents: Box::new(contents),
            prefix,
            suffix,
            prefix_overrides: parse_overrides(prefix_overrides),
            suffix_overrides: parse_overrides(suffix_overrides),
        }
    }

    pub fn where_clause(contents: SqlNode) -> Self {
        Self {
            contents: Box::new(contents),
            prefix: Some("WHERE".to_string()),
            suffix: None,
            prefix_overrides: WHERE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            suffix_overrides: Vec::new(),
        }
    }

    pub fn set_clause(contents: SqlNode) -> Self {
        Self {
            contents: Box::new(contents),
            prefix: Some("SET".to_string()),
            suffix: None,
            prefix_overrides: vec![",".to_string()],
            suffix_overrides: vec![",".to_string()],
        }
    }

    /// Transform captured child output. Returns `None` when nothing is
    /// left to emit, in which case prefix and suffix are not applied either.
    pub fn transform(&self, text: &str) -> Option<String> {
        let mut body = text.trim();
        if body.is_empty() {
            return None;
        }

        for token in &self.prefix_overrides {
            if starts_with_ignore_case(body, token) {
                body = &body[token.trim().len()..];
                break;
            }
        }
        for token in &self.suffix_overrides {
            if ends_with_ignore_case(body, token) || ends_with_ignore_case(body, token.trim()) {
                body = &body[..body.len() - token.trim().len()];
                break;
            }
        }

        let body = body.trim();
        if body.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(body.len() + 16);
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(body);
        if let Some(suffix) = &self.suffix {
            out.push(' ');
            out.push_str(suffix);
        }
        Some(out)
    }
}

fn parse_overrides(overrides: Option<&str>) -> Vec<String> {
    overrides
        .map(|s| {
            s.split('|')
                .filter(|t| !t.is_empty())
                .map(|t| t.to_ascii_uppercase())
                .collect()
        })
        .unwrap_or_default()
}

fn starts_with_ignore_case(text: &str, token: &str) -> bool {
    text.get(..token.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(token))
}

fn ends_with_ignore_case(text: &str, token: &str) -> bool {
    !token.is_empty()
        && text.len() >= token.len()
        && text
            .get(text.len() - token.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trim(prefix: &str, overrides: &str) -> TrimNode {
        TrimNode::new(
            SqlNode::Sequence(vec![]),
            Some(prefix.to_string()),
            Some(overrides),
            None,
            None,
        )
    }

    #[test]
    fn test_parse_overrides_uppercases() {
        let node = trim("WHERE", "and|or");
        assert_eq!(node.prefix_overrides, vec!["AND", "OR"]);
    }

    #[test]
    fn test_trim_strips_leading_token_once() {
        let node = trim("WHERE", "AND|OR");
        assert_eq!(
            node.transform(" AND a=1 AND b=2 ").as_deref(),
            Some("WHERE a=1 AND b=2")
        );
    }

    #[test]
    fn test_trim_whitespace_only_contributes_nothing() {
        let node = trim("WHERE", "AND|OR");
        assert_eq!(node.transform("  \n\t "), None);
    }

    #[test]
    fn test_where_is_case_insensitive() {
        let node = TrimNode::where_clause(SqlNode::Sequence(vec![]));
        assert_eq!(
            node.transform("or state = ?").as_deref(),
            Some("WHERE state = ?")
        );
        // no separator after the keyword: not an override match
        assert_eq!(
            node.transform("ORDER_ID = 1").as_deref(),
            Some("WHERE ORDER_ID = 1")
        );
    }

    #[test]
    fn test_set_strips_trailing_comma() {
        let node = TrimNode::set_clause(SqlNode::Sequence(vec![]));
        assert_eq!(
            node.transform("name = ?, age = ?, ").as_deref(),
            Some("SET name = ?, age = ?")
        );
    }

    #[test]
    fn test_prefix_and_suffix_overrides() {
        let node = TrimNode::new(
            SqlNode::Sequence(vec![]),
            Some("(".to_string()),
            Some(","),
            Some(")".to_string()),
            Some(","),
        );
        assert_eq!(node.transform(", a, b,").as_deref(), Some("( a, b )"));
    }

    #[test]
    fn test_only_override_token_left_is_empty() {
        let node = trim("WHERE", "AND|OR");
        assert_eq!(node.transform("AND "), None);
    }

    #[test]
    fn test_itemize() {
        assert_eq!(itemize("item", 3), "__frch_item_3");
    }
}
