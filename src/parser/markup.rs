//! Tag tree parsing for statement bodies and mapper documents.
//!
//! ```text
//! <select id="find">select * from t <where><if test="id != null">id = #{id}</if></where></select>
//!  ──┬───  ───┬───   ───────┬──────  ───┬─── ───────────────┬──────────────────
//!    │        │             │           │                   └── nested element
//!    │        │             │           └── child element
//!    │        │             └── text (entities decoded)
//!    │        └── attributes
//!    └── element name
//! ```
//!
//! CDATA sections are kept verbatim. Comments, processing instructions and
//! `<!DOCTYPE>` are skipped.

use nom::{
    bytes::complete::{tag, take_till, take_until, take_while1},
    character::complete::{char, multispace0, multispace1, one_of},
    error::{ErrorKind, ParseError},
    multi::many0,
    sequence::preceded,
    IResult,
};

use crate::error::CompileError;

/// One node of element content.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    CData(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Content>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Content::Text(text.into()));
        self
    }

    pub fn with_cdata(mut self, text: impl Into<String>) -> Self {
        self.children.push(Content::CData(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug)]
struct MarkupError<'a> {
    input: &'a str,
    message: String,
}

impl<'a> ParseError<&'a str> for MarkupError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        Self {
            input,
            message: format!("unexpected input ({})", kind.description()),
        }
    }

    fn append(_: &'a str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

type Res<'a, T> = IResult<&'a str, T, MarkupError<'a>>;

fn fail<'a, T>(input: &'a str, message: impl Into<String>) -> Res<'a, T> {
    Err(nom::Err::Failure(MarkupError {
        input,
        message: message.into(),
    }))
}

/// Parse a document with exactly one root element.
pub fn parse_document(text: &str) -> Result<Element, CompileError> {
    let position = |rest: &str| text.len() - rest.len();

    let result = misc(text).and_then(|(input, _)| {
        if input.is_empty() {
            return fail(input, "document has no root element");
        }
        let (input, root) = element(input)?;
        let (input, _) = misc(input)?;
        if !input.is_empty() {
            return fail(input, "unexpected content after the root element");
        }
        Ok((input, root))
    });

    match result {
        Ok((_, root)) => Ok(root),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(CompileError::markup(position(e.input), e.message))
        }
        Err(nom::Err::Incomplete(_)) => Err(CompileError::markup(text.len(), "unexpected end")),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

fn name(input: &str) -> Res<'_, &str> {
    take_while1(is_name_char)(input)
}

/// Whitespace, comments, processing instructions and doctype.
fn misc(mut input: &str) -> Res<'_, ()> {
    loop {
        let (rest, _) = multispace0(input)?;
        input = rest;
        if input.starts_with("<!--") {
            input = comment(input)?.0;
        } else if input.starts_with("<?") {
            input = processing_instruction(input)?.0;
        } else if input.starts_with("<!DOCTYPE") {
            input = doctype(input)?.0;
        } else {
            return Ok((input, ()));
        }
    }
}

fn comment(input: &str) -> Res<'_, ()> {
    let (rest, _) = tag("<!--")(input)?;
    match take_until::<_, _, MarkupError>("-->")(rest) {
        Ok((rest, _)) => Ok((&rest[3..], ())),
        Err(_) => fail(input, "unterminated comment"),
    }
}

fn processing_instruction(input: &str) -> Res<'_, ()> {
    let (rest, _) = tag("<?")(input)?;
    match take_until::<_, _, MarkupError>("?>")(rest) {
        Ok((rest, _)) => Ok((&rest[2..], ())),
        Err(_) => fail(input, "unterminated processing instruction"),
    }
}

fn doctype(input: &str) -> Res<'_, ()> {
    let (rest, _) = tag("<!DOCTYPE")(input)?;
    let (rest, _) = take_till(|c: char| c == '[' || c == '>')(rest)?;
    let rest = match rest.strip_prefix('[') {
        Some(subset) => match take_until::<_, _, MarkupError>("]")(subset) {
            Ok((after, _)) => &after[1..],
            Err(_) => return fail(input, "unterminated doctype"),
        },
        None => rest,
    };
    match take_until::<_, _, MarkupError>(">")(rest) {
        Ok((rest, _)) => Ok((&rest[1..], ())),
        Err(_) => fail(input, "unterminated doctype"),
    }
}

fn cdata(input: &str) -> Res<'_, &str> {
    let (rest, _) = tag("<![CDATA[")(input)?;
    match take_until::<_, _, MarkupError>("]]>")(rest) {
        Ok((after, data)) => Ok((&after[3..], data)),
        Err(_) => fail(input, "unterminated CDATA section"),
    }
}

fn attribute(input: &str) -> Res<'_, (String, String)> {
    let (input, key) = name(input)?;
    let (input, _) = preceded(multispace0, char('='))(input)?;
    let (input, _) = multispace0(input)?;
    let (after_quote, quote) = one_of("\"'")(input)?;
    let Some(end) = after_quote.find(quote) else {
        return fail(input, format!("unterminated value for attribute '{}'", key));
    };
    let value = match decode_entities(&after_quote[..end]) {
        Ok(value) => value,
        Err(message) => return fail(after_quote, message),
    };
    Ok((&after_quote[end + 1..], (key.to_string(), value)))
}

fn element(input: &str) -> Res<'_, Element> {
    let start = input;
    let (input, _) = char('<')(input)?;
    let (input, tag_name) = name(input)?;
    let (input, attributes) = many0(preceded(multispace1, attribute))(input)?;
    let (input, _) = multispace0(input)?;

    let mut element = Element {
        name: tag_name.to_string(),
        attributes,
        children: Vec::new(),
    };

    if let Some(rest) = input.strip_prefix("/>") {
        return Ok((rest, element));
    }
    let Some(input) = input.strip_prefix('>') else {
        return fail(input, format!("expected '>' to close <{}>", tag_name));
    };

    let (input, children) = content(input)?;
    element.children = children;

    let Some(after) = input.strip_prefix("</") else {
        return fail(start, format!("element <{}> is never closed", tag_name));
    };
    let (after, close) = name(after)?;
    if close != tag_name {
        return fail(
            input,
            format!("expected </{}> but found </{}>", tag_name, close),
        );
    }
    let (after, _) = multispace0(after)?;
    match after.strip_prefix('>') {
        Some(rest) => Ok((rest, element)),
        None => fail(after, format!("expected '>' after </{}", close)),
    }
}

fn content(mut input: &str) -> Res<'_, Vec<Content>> {
    let mut children = Vec::new();
    loop {
        if input.is_empty() || input.starts_with("</") {
            return Ok((input, children));
        }
        if input.starts_with("<!--") {
            input = comment(input)?.0;
        } else if input.starts_with("<![CDATA[") {
            let (rest, data) = cdata(input)?;
            children.push(Content::CData(data.to_string()));
            input = rest;
        } else if input.starts_with("<?") {
            input = processing_instruction(input)?.0;
        } else if input.starts_with('<') {
            let (rest, child) = element(input)?;
            children.push(Content::Element(child));
            input = rest;
        } else {
            let (rest, raw) = take_till(|c: char| c == '<')(input)?;
            match decode_entities(raw) {
                Ok(text) => children.push(Content::Text(text)),
                Err(message) => return fail(input, message),
            }
            input = rest;
        }
    }
}

/// Decode the predefined and numeric character entities.
pub fn decode_entities(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let Some(semi) = after.find(';') else {
            return Err(format!("unterminated entity in '{}'", raw));
        };
        let entity = &after[..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                .and_then(Result::ok)
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => return Err(format!("unknown entity '&{};'", entity)),
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
