//! Parsers using nom.
//!
//! Three small grammars feed the compiler:
//!
//! - [`expression`]: `test`/`value` attributes and `${...}` content
//! - [`markup`]: the tag tree of statement bodies and mapper documents
//! - [`placeholder`]: `#{...}` content, read after evaluation

pub mod expression;
pub mod markup;
pub mod placeholder;

#[cfg(test)]
mod tests;

pub use expression::parse_expression;
pub use markup::{parse_document, Content, Element};
pub use placeholder::{parse_placeholder, Placeholder};
