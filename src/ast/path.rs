//! Property paths such as `orders[0].item.name`.

use nom::{
    branch::alt,
    bytes::complete::{take_until, take_while1},
    character::complete::char,
    combinator::{all_consuming, map},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Property(String),
    Index(String),
}

/// A dotted property path with optional `[index]` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    text: String,
    segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// Parse a path. Text that is not a well-formed path is kept as a
    /// single property name.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let segments = match all_consuming(parse_segments)(trimmed) {
            Ok((_, segments)) if !segments.is_empty() => segments,
            _ => vec![PathSegment::Property(trimmed.to_string())],
        };
        Self {
            text: trimmed.to_string(),
            segments,
        }
    }

    /// The first property name, which is what binding lookups key on.
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Property(name)) | Some(PathSegment::Index(name)) => name,
            None => "",
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Everything after the root segment.
    pub fn rest(&self) -> &[PathSegment] {
        self.segments.get(1..).unwrap_or(&[])
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

fn parse_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$')(input)
}

fn parse_index(input: &str) -> IResult<&str, PathSegment> {
    map(delimited(char('['), take_until("]"), char(']')), |s: &str| {
        PathSegment::Index(s.trim().to_string())
    })(input)
}

fn parse_segments(input: &str) -> IResult<&str, Vec<PathSegment>> {
    let (input, (first, tail)) = pair(
        map(parse_name, |s: &str| PathSegment::Property(s.to_string())),
        many0(alt((
            map(preceded(char('.'), parse_name), |s: &str| {
                PathSegment::Property(s.to_string())
            }),
            parse_index,
        ))),
    )(input)?;
    let mut segments = vec![first];
    segments.extend(tail);
    Ok((input, segments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_path() {
        let path = PropertyPath::parse("order[0].item[0].name");
        assert_eq!(path.root(), "order");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Property("order".into()),
                PathSegment::Index("0".into()),
                PathSegment::Property("item".into()),
                PathSegment::Index("0".into()),
                PathSegment::Property("name".into()),
            ]
        );
        assert_eq!(path.rest().len(), 4);
    }

    #[test]
    fn test_malformed_path_is_single_property() {
        let path = PropertyPath::parse("a..b");
        assert_eq!(path.segments(), &[PathSegment::Property("a..b".into())]);
    }

    #[test]
    fn test_foreach_alias_path() {
        let path = PropertyPath::parse("__frch_item_0.name");
        assert_eq!(path.root(), "__frch_item_0");
    }
}
