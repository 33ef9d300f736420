//! Tag tree to [`SqlNode`] compilation.
//!
//! Runs once per statement. Everything the hot path needs is decided here:
//! tag names are matched, expressions are parsed and `${}` text is split
//! into segments, so evaluation never parses.

use crate::ast::{
    BindNode, ChooseNode, ForeachNode, IfNode, SqlNode, TextSegment, TextTemplate, TrimNode,
};
use crate::error::CompileError;
use crate::parser::{parse_expression, Content, Element};
use crate::scanner::{Piece, SUBSTITUTION};

/// Control elements understood by the compiler.
pub const TAGS: [&str; 10] = [
    "if", "choose", "when", "otherwise", "trim", "where", "set", "foreach", "bind", "script",
];

/// A compiled statement body.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub root: SqlNode,
    /// Whether evaluation depends on the parameter. A static template
    /// renders the same text for every execution.
    pub dynamic: bool,
}

/// Compile the children of `element` (the statement element itself is not
/// a tag and its name is ignored).
pub fn compile(element: &Element) -> Result<Template, CompileError> {
    let mut compiler = Compiler { dynamic: false };
    let root = compiler.children(&element.children)?;
    Ok(Template {
        root,
        dynamic: compiler.dynamic,
    })
}

struct Compiler {
    dynamic: bool,
}

impl Compiler {
    fn children(&mut self, children: &[Content]) -> Result<SqlNode, CompileError> {
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Content::Text(text) | Content::CData(text) => nodes.push(self.text(text)?),
                Content::Element(element) => nodes.push(self.element(element)?),
            }
        }
        Ok(SqlNode::Sequence(nodes))
    }

    fn text(&mut self, text: &str) -> Result<SqlNode, CompileError> {
        if !SUBSTITUTION.has_tokens(text) {
            return Ok(SqlNode::StaticText(text.to_string()));
        }
        self.dynamic = true;

        // escapes stay in the literal runs so the placeholder pass still
        // sees `\#{`; only `${` escapes are resolved here
        let segments = SUBSTITUTION
            .split(text)
            .into_iter()
            .map(|piece| match piece {
                Piece::Text(literal) => Ok(TextSegment::Literal(literal)),
                Piece::Token(content) => parse_expression(content.trim()).map(TextSegment::Expr),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SqlNode::DynamicText(TextTemplate {
            source: text.to_string(),
            segments,
        }))
    }

    fn element(&mut self, element: &Element) -> Result<SqlNode, CompileError> {
        // a nested <script> is transparent
        if element.name == "script" {
            return self.children(&element.children);
        }
        let node = match element.name.as_str() {
            "if" => SqlNode::If(self.conditional(element)?),
            "choose" => self.choose(element)?,
            "trim" => SqlNode::Trim(TrimNode::new(
                self.children(&element.children)?,
                element.attribute("prefix").map(str::to_string),
                element.attribute("prefixOverrides"),
                element.attribute("suffix").map(str::to_string),
                element.attribute("suffixOverrides"),
            )),
            "where" => SqlNode::Where(TrimNode::where_clause(self.children(&element.children)?)),
            "set" => SqlNode::Set(TrimNode::set_clause(self.children(&element.children)?)),
            "foreach" => self.foreach(element)?,
            "bind" => SqlNode::Bind(BindNode {
                name: required(element, "name")?.to_string(),
                value: expression(element, "value")?,
            }),
            "when" | "otherwise" => {
                return Err(CompileError::MisplacedTag {
                    tag: element.name.clone(),
                    parent: "choose",
                })
            }
            other => return Err(CompileError::UnknownTag(other.to_string())),
        };
        self.dynamic = true;
        Ok(node)
    }

    fn conditional(&mut self, element: &Element) -> Result<IfNode, CompileError> {
        Ok(IfNode {
            test: expression(element, "test")?,
            contents: Box::new(self.children(&element.children)?),
        })
    }

    fn choose(&mut self, element: &Element) -> Result<SqlNode, CompileError> {
        let mut whens = Vec::new();
        let mut otherwise = None;

        for child in &element.children {
            let child = match child {
                Content::Element(child) => child,
                Content::Text(text) if text.trim().is_empty() => continue,
                Content::Text(_) | Content::CData(_) => {
                    return Err(CompileError::MisplacedTag {
                        tag: "#text".to_string(),
                        parent: "when",
                    })
                }
            };
            match child.name.as_str() {
                "when" => whens.push(self.conditional(child)?),
                "otherwise" => {
                    if otherwise.is_some() {
                        return Err(CompileError::TooManyOtherwise);
                    }
                    otherwise = Some(Box::new(self.children(&child.children)?));
                }
                name if TAGS.contains(&name) => {
                    return Err(CompileError::MisplacedTag {
                        tag: name.to_string(),
                        parent: "when",
                    })
                }
                name => return Err(CompileError::UnknownTag(name.to_string())),
            }
        }

        Ok(SqlNode::Choose(ChooseNode { whens, otherwise }))
    }

    fn foreach(&mut self, element: &Element) -> Result<SqlNode, CompileError> {
        let owned = |name: &str| element.attribute(name).map(str::to_string);
        Ok(SqlNode::Foreach(ForeachNode {
            collection: expression(element, "collection")?,
            item: owned("item"),
            index: owned("index"),
            open: owned("open"),
            close: owned("close"),
            separator: owned("separator"),
            contents: Box::new(self.children(&element.children)?),
        }))
    }
}

fn required<'e>(element: &'e Element, attribute: &'static str) -> Result<&'e str, CompileError> {
    element
        .attribute(attribute)
        .ok_or_else(|| CompileError::missing(element.name.as_str(), attribute))
}

fn expression(element: &Element, attribute: &'static str) -> Result<crate::ast::Expr, CompileError> {
    parse_expression(required(element, attribute)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::parser::parse_document;

    fn compile_text(markup: &str) -> Result<Template, CompileError> {
        compile(&parse_document(markup).unwrap())
    }

    #[test]
    fn test_plain_text_is_static() {
        let template = compile_text("<select>select * from t where id = #{id}</select>").unwrap();
        assert!(!template.dynamic);
        assert!(template.root.is_static_text());
    }

    #[test]
    fn test_escaped_substitution_is_static() {
        let template = compile_text(r"<select>select '\${x}' from t</select>").unwrap();
        assert!(!template.dynamic);
    }

    #[test]
    fn test_substitution_splits_segments() {
        let template = compile_text("<select>order by ${col} desc</select>").unwrap();
        assert!(template.dynamic);
        let SqlNode::Sequence(nodes) = template.root else {
            panic!("expected sequence");
        };
        assert_eq!(
            nodes[0],
            SqlNode::DynamicText(TextTemplate {
                source: "order by ${col} desc".to_string(),
                segments: vec![
                    TextSegment::Literal("order by ".to_string()),
                    TextSegment::Expr(Expr::ident("col")),
                    TextSegment::Literal(" desc".to_string()),
                ],
            })
        );
    }

    #[test]
    fn test_control_tag_makes_dynamic() {
        let template =
            compile_text(r#"<select>select 1 <where><if test="a">x</if></where></select>"#).unwrap();
        assert!(template.dynamic);
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            compile_text("<select><iff test='a'>x</iff></select>").unwrap_err(),
            CompileError::UnknownTag("iff".to_string())
        );
    }

    #[test]
    fn test_when_outside_choose() {
        assert_eq!(
            compile_text("<select><when test='a'>x</when></select>").unwrap_err(),
            CompileError::MisplacedTag {
                tag: "when".to_string(),
                parent: "choose",
            }
        );
    }

    #[test]
    fn test_two_otherwise() {
        let err = compile_text(
            "<select><choose><otherwise>a</otherwise><otherwise>b</otherwise></choose></select>",
        )
        .unwrap_err();
        assert_eq!(err, CompileError::TooManyOtherwise);
    }

    #[test]
    fn test_missing_attributes() {
        let cases = [
            ("<select><if>x</if></select>", "if", "test"),
            ("<select><choose><when>x</when></choose></select>", "when", "test"),
            ("<select><foreach item='x'>x</foreach></select>", "foreach", "collection"),
            ("<select><bind value='1'/></select>", "bind", "name"),
            ("<select><bind name='a'/></select>", "bind", "value"),
        ];
        for (markup, tag, attribute) in cases {
            assert_eq!(
                compile_text(markup).unwrap_err(),
                CompileError::missing(tag, attribute),
                "{markup}"
            );
        }
    }

    #[test]
    fn test_bad_test_expression() {
        assert!(matches!(
            compile_text("<select><if test='a =='>x</if></select>"),
            Err(CompileError::Expression { .. })
        ));
    }

    #[test]
    fn test_trim_attributes() {
        let template = compile_text(
            r#"<update><trim prefix="SET" suffixOverrides=",">a = 1,</trim></update>"#,
        )
        .unwrap();
        let SqlNode::Sequence(nodes) = template.root else {
            panic!("expected sequence");
        };
        let SqlNode::Trim(trim) = &nodes[0] else {
            panic!("expected trim");
        };
        assert_eq!(trim.prefix.as_deref(), Some("SET"));
        assert_eq!(trim.suffix_overrides, vec![","]);
        assert!(trim.prefix_overrides.is_empty());
    }

    #[test]
    fn test_compile_is_idempotent() {
        let element = parse_document(
            r#"<select>select * from t <where><foreach collection="ids" item="id" open="id in (" close=")" separator=",">#{id}</foreach></where></select>"#,
        )
        .unwrap();
        assert_eq!(compile(&element).unwrap(), compile(&element).unwrap());
    }
}
