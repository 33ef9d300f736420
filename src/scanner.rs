//! Delimited token scanning for `${...}` and `#{...}`.
//!
//! ```text
//! select * from ${table} where id = #{id} and note = '\#{literal}'
//!               ───┬────            ──┬──             ─────┬──────
//!                  │                  │                    └── escaped, copied as text
//!                  │                  └── placeholder token (#{ })
//!                  └── substitution token (${ })
//! ```

use std::convert::Infallible;

use nom::{bytes::complete::take_until, IResult};

/// Raw substitution tokens, resolved while the template is evaluated.
pub const SUBSTITUTION: TokenScanner<'static> = TokenScanner::new("${", "}");

/// Bind placeholders, resolved by the parameter mapping pass.
pub const PLACEHOLDER: TokenScanner<'static> = TokenScanner::new("#{", "}");

const ESCAPE: char = '\\';

/// One run of scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    /// Token content without delimiters.
    Token(String),
}

#[derive(Debug, Clone, Copy)]
pub struct TokenScanner<'a> {
    open: &'a str,
    close: &'a str,
}

impl<'a> TokenScanner<'a> {
    pub const fn new(open: &'a str, close: &'a str) -> Self {
        Self { open, close }
    }

    /// Replace every token with the handler's output. An escaped open
    /// delimiter is emitted literally with its backslash dropped; an
    /// unterminated token is copied verbatim.
    pub fn scan<E, F>(&self, text: &str, handler: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        self.scan_inner(text, handler, false)
    }

    /// Like [`scan`](Self::scan), but escapes are written back out so the
    /// text can be scanned again by a later pass.
    pub fn rewrite<E, F>(&self, text: &str, handler: F) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        self.scan_inner(text, handler, true)
    }

    /// Replace tokens whose content `lookup` knows; unknown tokens and
    /// escapes are left in place.
    pub fn substitute<F>(&self, text: &str, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let replaced = self.rewrite(text, |content| {
            Ok::<_, Infallible>(
                lookup(content.trim())
                    .unwrap_or_else(|| format!("{}{}{}", self.open, content, self.close)),
            )
        });
        match replaced {
            Ok(text) => text,
            Err(never) => match never {},
        }
    }

    /// Whether the text holds at least one unescaped, terminated token.
    pub fn has_tokens(&self, text: &str) -> bool {
        let mut found = false;
        let _ = self.scan(text, |_| {
            found = true;
            Ok::<_, Infallible>(String::new())
        });
        found
    }

    /// Collect the content of every token.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let _ = self.scan(text, |content| {
            tokens.push(content.to_string());
            Ok::<_, Infallible>(String::new())
        });
        tokens
    }

    /// Split text into literal runs and token contents, escapes resolved.
    /// Adjacent literal runs are merged.
    pub fn split(&self, text: &str) -> Vec<Piece> {
        let mut pieces: Vec<Piece> = Vec::new();
        let _ = self.walk(text, false, |piece| {
            let merged = match (&piece, pieces.last_mut()) {
                (Piece::Text(more), Some(Piece::Text(last))) => {
                    last.push_str(more);
                    true
                }
                _ => false,
            };
            if !merged {
                pieces.push(piece);
            }
            Ok::<_, Infallible>(())
        });
        pieces
    }

    fn scan_inner<E, F>(&self, text: &str, mut handler: F, keep_escapes: bool) -> Result<String, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        if !text.contains(self.open) {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        self.walk(text, keep_escapes, |piece| {
            match piece {
                Piece::Text(t) => out.push_str(&t),
                Piece::Token(content) => out.push_str(&handler(&content)?),
            }
            Ok::<(), E>(())
        })?;
        Ok(out)
    }

    fn walk<E, F>(&self, text: &str, keep_escapes: bool, mut sink: F) -> Result<(), E>
    where
        F: FnMut(Piece) -> Result<(), E>,
    {
        let mut rest = text;

        loop {
            let Ok((at_open, before)) = until(self.open, rest) else {
                if !rest.is_empty() {
                    sink(Piece::Text(rest.to_string()))?;
                }
                break;
            };

            if let Some(unescaped) = before.strip_suffix(ESCAPE) {
                let kept = if keep_escapes { before } else { unescaped };
                sink(Piece::Text(format!("{}{}", kept, self.open)))?;
                rest = &at_open[self.open.len()..];
                continue;
            }
            if !before.is_empty() {
                sink(Piece::Text(before.to_string()))?;
            }

            match self.token_content(&at_open[self.open.len()..], keep_escapes) {
                Some((content, after)) => {
                    sink(Piece::Token(content))?;
                    rest = after;
                }
                None => {
                    sink(Piece::Text(at_open.to_string()))?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Content up to the matching close delimiter, honouring escaped
    /// closes. `None` when the token never terminates.
    fn token_content<'t>(&self, mut input: &'t str, keep_escapes: bool) -> Option<(String, &'t str)> {
        let mut content = String::new();
        loop {
            let (at_close, segment) = until(self.close, input).ok()?;
            let after = &at_close[self.close.len()..];
            match segment.strip_suffix(ESCAPE) {
                Some(unescaped) => {
                    content.push_str(if keep_escapes { segment } else { unescaped });
                    content.push_str(self.close);
                    input = after;
                }
                None => {
                    content.push_str(segment);
                    return Some((content, after));
                }
            }
        }
    }
}

fn until<'t>(delimiter: &str, input: &'t str) -> IResult<&'t str, &'t str> {
    take_until(delimiter)(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(text: &str) -> String {
        PLACEHOLDER
            .scan(text, |c| Ok::<_, Infallible>(c.to_uppercase()))
            .unwrap()
    }

    #[test]
    fn test_replaces_tokens() {
        assert_eq!(upper("a #{b} c #{d}"), "a B c D");
    }

    #[test]
    fn test_escaped_open_is_literal() {
        assert_eq!(upper(r"x = \#{notAToken}"), "x = #{notAToken}");
    }

    #[test]
    fn test_escaped_close_inside_token() {
        assert_eq!(upper(r"#{a\}b}"), "A}B");
    }

    #[test]
    fn test_unterminated_copied_verbatim() {
        assert_eq!(upper("a #{b} #{c"), "a B #{c");
    }

    #[test]
    fn test_empty_token_reaches_handler() {
        assert_eq!(
            PLACEHOLDER
                .scan("x#{}y", |c| Ok::<_, Infallible>(format!("[{}]", c)))
                .unwrap(),
            "x[]y"
        );
    }

    #[test]
    fn test_handler_error_propagates() {
        let result: Result<String, String> = SUBSTITUTION.scan("${a} ${b}", |c| {
            if c == "b" {
                Err("bad".to_string())
            } else {
                Ok(c.to_string())
            }
        });
        assert_eq!(result, Err("bad".to_string()));
    }

    #[test]
    fn test_has_tokens() {
        assert!(SUBSTITUTION.has_tokens("order by ${col}"));
        assert!(!SUBSTITUTION.has_tokens(r"order by \${col}"));
        assert!(!SUBSTITUTION.has_tokens("order by ${col"));
        assert!(!SUBSTITUTION.has_tokens("id = #{id}"));
    }

    #[test]
    fn test_rewrite_keeps_escapes() {
        let out = PLACEHOLDER
            .rewrite(r"#{a} \#{b}", |c| Ok::<_, Infallible>(format!("#{{x_{}}}", c)))
            .unwrap();
        assert_eq!(out, r"#{x_a} \#{b}");
    }

    #[test]
    fn test_split() {
        assert_eq!(
            SUBSTITUTION.split(r"order by ${col} \${x} ${dir"),
            vec![
                Piece::Text("order by ".to_string()),
                Piece::Token("col".to_string()),
                Piece::Text(" ${x} ${dir".to_string()),
            ]
        );
    }

    #[test]
    fn test_substitute_known_only() {
        let out = SUBSTITUTION.substitute(r"from ${schema}.t where ${col} = 1 and \${x}", |name| {
            (name == "schema").then(|| "app".to_string())
        });
        assert_eq!(out, r"from app.t where ${col} = 1 and \${x}");
    }

    #[test]
    fn test_tokens() {
        assert_eq!(SUBSTITUTION.tokens("${a} and ${ b }"), vec!["a", " b "]);
    }
}
