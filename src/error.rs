//! Error types for sqlscript.

use thiserror::Error;

/// Valid keys inside a `#{...}` placeholder.
pub const PLACEHOLDER_KEYS: &str =
    "javaType,jdbcType,mode,numericScale,resultMap,typeHandler,jdbcTypeName";

/// Raised while loading a statement. A template that fails here never
/// reaches evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Element name the compiler does not understand
    #[error("Unknown element <{0}> in SQL statement")]
    UnknownTag(String),

    /// Branch tag outside its parent, or text between branches
    #[error("Element <{tag}> is only allowed inside <{parent}>")]
    MisplacedTag { tag: String, parent: &'static str },

    /// More than one `<otherwise>` in a `<choose>`
    #[error("Too many default (otherwise) elements in choose statement")]
    TooManyOtherwise,

    /// Required attribute absent
    #[error("Element <{tag}> requires attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: &'static str },

    /// Malformed `#{...}` content or option value
    #[error("Invalid placeholder #{{{content}}}: {message}")]
    InvalidPlaceholder { content: String, message: String },

    /// `#{(expr)}` form
    #[error("Expression based parameters are not supported: #{{{0}}}")]
    UnsupportedExpression(String),

    /// Option key outside the supported set
    #[error(
        "An invalid property '{key}' was found in mapping #{{{content}}}. Valid properties are {}",
        PLACEHOLDER_KEYS
    )]
    InvalidPlaceholderKey { key: String, content: String },

    /// Syntax error in a test, value or `${}` expression
    #[error("Invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// Malformed tag tree
    #[error("Markup error at position {position}: {message}")]
    Markup { position: usize, message: String },

    /// `<include>` refid with no matching `<sql>`
    #[error("Could not find SQL fragment to include with refid '{0}'")]
    UnknownFragment(String),

    /// Same `<property>` name twice in one include
    #[error("Variable '{0}' defined twice in the same include definition")]
    DuplicateProperty(String),

    /// Id registered twice for the same database
    #[error("Statement '{0}' is already defined")]
    DuplicateStatement(String),

    /// Fragment that includes itself, directly or not
    #[error("Circular include of fragment '{0}'")]
    CircularInclude(String),
}

impl CompileError {
    /// Create a markup error at the given byte position.
    pub fn markup(position: usize, message: impl Into<String>) -> Self {
        Self::Markup {
            position,
            message: message.into(),
        }
    }

    /// Create an expression syntax error.
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing(tag: impl Into<String>, attribute: &'static str) -> Self {
        Self::MissingAttribute {
            tag: tag.into(),
            attribute,
        }
    }

    /// Create an invalid placeholder error.
    pub fn placeholder(content: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPlaceholder {
            content: content.into(),
            message: message.into(),
        }
    }
}

/// An expression referenced a property or variable that cannot be resolved.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Cannot resolve '{path}'. Available bindings: [{}]", .available.join(", "))]
pub struct BindingError {
    pub path: String,
    pub available: Vec<String>,
}

/// No converter was found for a placeholder and none was named explicitly.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("No type handler for property '{property}' (considered: {})", .candidates.join(", "))]
pub struct TypeResolutionError {
    pub property: String,
    pub candidates: Vec<String>,
}

/// The main error type for sqlscript operations.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Statement failed to load
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Unresolvable property or variable
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// No converter for a placeholder
    #[error(transparent)]
    TypeResolution(#[from] TypeResolutionError),

    /// Type errors inside expressions, non-iterable foreach collections.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Statement id not registered
    #[error("Unknown statement: '{0}'")]
    UnknownStatement(String),

    /// Short id defined in more than one namespace
    #[error("Ambiguous statement id '{id}', candidates: {}", .candidates.join(", "))]
    AmbiguousStatement { id: String, candidates: Vec<String> },

    /// Invalid config file or mapper document
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a config or mapper file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }

    /// True for errors raised at statement-load time.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::Compile(_))
    }
}

/// Result type alias for sqlscript operations.
pub type ScriptResult<T> = Result<T, ScriptError>;
