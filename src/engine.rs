//! Statement compilation and per-execution rendering.
//!
//! An [`Engine`] owns everything shared between statements: the converter
//! registry, declared type aliases and the output settings. It is cheap to
//! clone and safe to share across threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{SqlNode, Value};
use crate::compiler::{self, Template};
use crate::config::{PlaceholderStyle, ScriptConfig};
use crate::error::{ScriptResult, TypeResolutionError};
use crate::eval::{Bindings, EvaluationContext};
use crate::mapping::{BoundSql, ParameterMappingExtractor, StaticSql};
use crate::parser::{parse_document, Element};
use crate::scanner::SUBSTITUTION;
use crate::types::{TypeAliases, TypeHandlerRegistry, ValueType};

/// A compiled statement, ready to be bound any number of times.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlSource {
    /// Rendered and extracted once at compile time.
    Static(StaticSql),
    /// Evaluated per execution.
    Dynamic {
        root: SqlNode,
        parameter_type: ValueType,
    },
}

impl SqlSource {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, SqlSource::Dynamic { .. })
    }
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: TypeHandlerRegistry,
    aliases: TypeAliases,
    database_id: Option<String>,
    placeholder: PlaceholderStyle,
    shrink_whitespace: bool,
    variables: BTreeMap<String, String>,
}

impl Engine {
    pub fn new(config: &ScriptConfig) -> ScriptResult<Self> {
        let aliases = config.type_aliases()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                registry: TypeHandlerRegistry::new(config.default_enum_handler),
                aliases,
                database_id: config.database_id.clone(),
                placeholder: config.placeholder,
                shrink_whitespace: config.shrink_whitespace,
                variables: config.variables.clone(),
            }),
        })
    }

    pub fn registry(&self) -> &TypeHandlerRegistry {
        &self.inner.registry
    }

    pub fn aliases(&self) -> &TypeAliases {
        &self.inner.aliases
    }

    pub fn database_id(&self) -> Option<&str> {
        self.inner.database_id.as_deref()
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.inner.variables.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.inner.variables
    }

    /// Resolve a `parameterType` alias.
    pub fn resolve_type(&self, alias: &str) -> ScriptResult<ValueType> {
        self.inner.aliases.resolve(alias).ok_or_else(|| {
            TypeResolutionError {
                property: alias.to_string(),
                candidates: Vec::new(),
            }
            .into()
        })
    }

    /// Compile a statement element. Static bodies are rendered and their
    /// placeholders extracted here, once.
    pub fn compile(&self, element: &Element, parameter_type: ValueType) -> ScriptResult<SqlSource> {
        let Template { root, dynamic } = compiler::compile(element)?;
        if dynamic {
            debug!("compiled dynamic statement <{}>", element.name);
            return Ok(SqlSource::Dynamic {
                root,
                parameter_type,
            });
        }

        let mut ctx = EvaluationContext::new(Value::Null, self.database_id());
        root.apply(&mut ctx)?;
        let sql = self.finish_sql(ctx.sql());
        let extracted = self.extractor().extract(&sql, &parameter_type, &Bindings::new())?;
        debug!(
            "compiled static statement <{}> with {} parameter(s)",
            element.name,
            extracted.parameter_mappings.len()
        );
        Ok(SqlSource::Static(extracted))
    }

    /// Compile script text: a `<script>` document, or plain SQL in which
    /// global variables are substituted first.
    pub fn compile_script(&self, script: &str, parameter_type: ValueType) -> ScriptResult<SqlSource> {
        let element = if script.trim_start().starts_with("<script") {
            parse_document(script)?
        } else {
            let text = SUBSTITUTION.substitute(script, |name| self.variable(name).map(str::to_string));
            Element::new("script").with_text(text)
        };
        self.compile(&element, parameter_type)
    }

    /// Render a compiled statement for one parameter value.
    pub fn bound_sql(&self, source: &SqlSource, parameter: &Value) -> ScriptResult<BoundSql> {
        let (root, parameter_type) = match source {
            SqlSource::Static(sql) => return Ok(BoundSql::new(sql.clone(), Bindings::new())),
            SqlSource::Dynamic {
                root,
                parameter_type,
            } => (root, parameter_type),
        };

        let declared = if parameter_type.is_object() {
            parameter.value_type()
        } else {
            parameter_type.clone()
        };

        let mut ctx = EvaluationContext::new(parameter.clone(), self.database_id());
        root.apply(&mut ctx)?;
        let (sql, bindings) = ctx.finish();
        let sql = self.finish_sql(sql);
        let extracted = self.extractor().extract(&sql, &declared, &bindings)?;
        Ok(BoundSql::new(extracted, bindings))
    }

    /// Values for every marker of `bound`, converted for binding.
    pub fn bind_values(&self, bound: &BoundSql, parameter: &Value) -> ScriptResult<Vec<Value>> {
        bound.bind_values(parameter, &self.inner.registry)
    }

    /// Compile and render in one step.
    pub fn render(&self, script: &str, parameter: &Value) -> ScriptResult<BoundSql> {
        let source = self.compile_script(script, ValueType::Object)?;
        self.bound_sql(&source, parameter)
    }

    fn extractor(&self) -> ParameterMappingExtractor<'_> {
        ParameterMappingExtractor::new(
            &self.inner.registry,
            &self.inner.aliases,
            self.inner.placeholder,
        )
    }

    fn finish_sql(&self, sql: String) -> String {
        if self.inner.shrink_whitespace {
            shrink_whitespace(&sql)
        } else {
            sql
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry: TypeHandlerRegistry::default(),
                aliases: TypeAliases::new(),
                database_id: None,
                placeholder: PlaceholderStyle::default(),
                shrink_whitespace: false,
                variables: BTreeMap::new(),
            }),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.inner.registry)
            .field("database_id", &self.inner.database_id)
            .field("placeholder", &self.inner.placeholder)
            .field("shrink_whitespace", &self.inner.shrink_whitespace)
            .finish()
    }
}

/// Collapse every whitespace run to one space.
pub fn shrink_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
