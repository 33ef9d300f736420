//! Placeholder extraction and bind parameter descriptors.
//!
//! The second pass over rendered SQL: every `#{...}` token becomes a
//! positional marker and one [`ParameterMapping`], in order of appearance.

use std::str::FromStr;

use crate::ast::{PropertyPath, Value};
use crate::config::PlaceholderStyle;
use crate::error::{BindingError, CompileError, ScriptResult, TypeResolutionError};
use crate::eval::context::COLLECTION_KEYS;
use crate::eval::Bindings;
use crate::parser::{parse_placeholder, Placeholder};
use crate::scanner::PLACEHOLDER;
use crate::types::{JdbcType, ParameterMode, TypeAliases, TypeHandler, TypeHandlerRegistry, ValueType};

/// Describes one bind parameter of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMapping {
    /// Dotted property path, may contain `[index]` segments.
    pub property: String,
    pub value_type: ValueType,
    pub jdbc_type: Option<JdbcType>,
    pub jdbc_type_name: Option<String>,
    pub mode: ParameterMode,
    pub numeric_scale: Option<u32>,
    pub result_map: Option<String>,
    /// Converter resolved at extraction time. `None` defers the choice to
    /// the runtime value.
    pub type_handler: Option<String>,
}

impl ParameterMapping {
    pub fn new(property: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            property: property.into(),
            value_type,
            jdbc_type: None,
            jdbc_type_name: None,
            mode: ParameterMode::In,
            numeric_scale: None,
            result_map: None,
            type_handler: None,
        }
    }
}

/// SQL with its markers and mappings, no per-execution bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
}

/// Output of one execution: final SQL, ordered mappings and every binding
/// the evaluation produced (`foreach` aliases, `bind` names).
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
    pub additional_parameters: Bindings,
}

impl BoundSql {
    pub fn new(sql: StaticSql, additional_parameters: Bindings) -> Self {
        Self {
            sql: sql.sql,
            parameter_mappings: sql.parameter_mappings,
            additional_parameters,
        }
    }

    pub fn has_additional_parameter(&self, name: &str) -> bool {
        let path = PropertyPath::parse(name);
        self.additional_parameters.contains_key(path.root())
    }

    pub fn additional_parameter(&self, name: &str) -> Option<&Value> {
        let path = PropertyPath::parse(name);
        self.additional_parameters.get(path.root())?.select(path.rest())
    }

    /// Raw value for every mapping, in marker order. Output parameters
    /// resolve to `Null`.
    pub fn resolve_values(&self, parameter: &Value) -> ScriptResult<Vec<Value>> {
        self.parameter_mappings
            .iter()
            .map(|mapping| self.resolve_value(mapping, parameter))
            .collect()
    }

    /// Like [`resolve_values`](Self::resolve_values), with each value run
    /// through its converter.
    pub fn bind_values(
        &self,
        parameter: &Value,
        registry: &TypeHandlerRegistry,
    ) -> ScriptResult<Vec<Value>> {
        self.parameter_mappings
            .iter()
            .map(|mapping| {
                let value = self.resolve_value(mapping, parameter)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                match converter(mapping, &value, registry) {
                    Some(handler) => handler.to_parameter(&value, mapping.jdbc_type),
                    None => Ok(value),
                }
            })
            .collect()
    }

    fn resolve_value(&self, mapping: &ParameterMapping, parameter: &Value) -> ScriptResult<Value> {
        if mapping.mode == ParameterMode::Out {
            return Ok(Value::Null);
        }

        let path = PropertyPath::parse(&mapping.property);
        let found = if let Some(bound) = self.additional_parameters.get(path.root()) {
            bound.select(path.rest())
        } else {
            match parameter {
                Value::Null => return Ok(Value::Null),
                scalar if scalar.is_scalar() => return Ok(scalar.clone()),
                Value::List(_) if COLLECTION_KEYS.contains(&path.root()) => {
                    parameter.select(path.rest())
                }
                _ => parameter.select(path.segments()),
            }
        };

        found.cloned().ok_or_else(|| {
            let mut available: Vec<String> = self.additional_parameters.keys().cloned().collect();
            if let Value::Map(entries) = parameter {
                available.extend(entries.keys().cloned());
            }
            available.sort();
            available.dedup();
            BindingError {
                path: mapping.property.clone(),
                available,
            }
            .into()
        })
    }
}

/// Explicit converter, then the declared type's, then the runtime value's,
/// then the jdbc type's.
fn converter(
    mapping: &ParameterMapping,
    value: &Value,
    registry: &TypeHandlerRegistry,
) -> Option<std::sync::Arc<dyn TypeHandler>> {
    if let Some(name) = mapping.type_handler.as_deref().filter(|n| *n != "object") {
        if let Some(handler) = registry.resolve_named(name, &mapping.value_type) {
            return Some(handler);
        }
    }
    if !mapping.value_type.is_object() {
        if let Some(handler) = registry.handler_for(&mapping.value_type, mapping.jdbc_type) {
            return Some(handler);
        }
    }
    registry
        .handler_for(&value.value_type(), mapping.jdbc_type)
        .filter(|h| h.name() != "object")
        .or_else(|| mapping.jdbc_type.and_then(|jdbc| registry.handler_for_jdbc(jdbc)))
}

/// Replaces `#{...}` tokens with markers and builds their mappings.
#[derive(Debug, Clone, Copy)]
pub struct ParameterMappingExtractor<'a> {
    registry: &'a TypeHandlerRegistry,
    aliases: &'a TypeAliases,
    style: PlaceholderStyle,
}

impl<'a> ParameterMappingExtractor<'a> {
    pub fn new(
        registry: &'a TypeHandlerRegistry,
        aliases: &'a TypeAliases,
        style: PlaceholderStyle,
    ) -> Self {
        Self {
            registry,
            aliases,
            style,
        }
    }

    /// `declared` is the statement's parameter type; `extra` the bindings
    /// produced while rendering.
    pub fn extract(&self, sql: &str, declared: &ValueType, extra: &Bindings) -> ScriptResult<StaticSql> {
        let mut parameter_mappings = Vec::new();
        let sql = PLACEHOLDER.scan(sql, |content| {
            let mapping = self.mapping(content, declared, extra)?;
            parameter_mappings.push(mapping);
            Ok::<_, crate::error::ScriptError>(self.style.marker(parameter_mappings.len()))
        })?;
        Ok(StaticSql {
            sql,
            parameter_mappings,
        })
    }

    fn mapping(&self, content: &str, declared: &ValueType, extra: &Bindings) -> ScriptResult<ParameterMapping> {
        let placeholder = parse_placeholder(content)?;
        let property = placeholder.property.clone();
        let path = PropertyPath::parse(&property);

        let jdbc_type = placeholder
            .option("jdbcType")
            .or(placeholder.jdbc_type.as_deref())
            .map(|name| JdbcType::from_str(name).map_err(|e| CompileError::placeholder(content, e)))
            .transpose()?;
        let result_map = placeholder.option("resultMap").map(str::to_string);

        let mut value_type = if let Some(bound) = extra.get(path.root()) {
            bound
                .select(path.rest())
                .map(Value::value_type)
                .unwrap_or(ValueType::Object)
        } else if !declared.is_list() && self.registry.has_handler(declared) {
            declared.clone()
        } else if jdbc_type == Some(JdbcType::Cursor) {
            if result_map.is_none() {
                return Err(CompileError::placeholder(
                    content,
                    "resultMap is required for CURSOR parameters",
                )
                .into());
            }
            ValueType::Cursor
        } else if property.is_empty() || declared.is_map() || declared.is_object() {
            ValueType::Object
        } else {
            declared
                .property_type(path.segments())
                .unwrap_or(ValueType::Object)
        };

        if let Some(alias) = placeholder.option("javaType") {
            value_type = self.aliases.resolve(alias).ok_or_else(|| {
                CompileError::placeholder(content, format!("unknown javaType '{}'", alias))
            })?;
        }

        let mode = placeholder
            .option("mode")
            .map(|m| ParameterMode::from_str(m).map_err(|e| CompileError::placeholder(content, e)))
            .transpose()?
            .unwrap_or_default();
        let numeric_scale = placeholder
            .option("numericScale")
            .map(|s| {
                s.parse::<u32>().map_err(|_| {
                    CompileError::placeholder(content, format!("invalid numericScale '{}'", s))
                })
            })
            .transpose()?;

        let type_handler = self.type_handler(&placeholder, &value_type, jdbc_type)?;

        Ok(ParameterMapping {
            property,
            value_type,
            jdbc_type,
            jdbc_type_name: placeholder.option("jdbcTypeName").map(str::to_string),
            mode,
            numeric_scale,
            result_map,
            type_handler,
        })
    }

    fn type_handler(
        &self,
        placeholder: &Placeholder,
        value_type: &ValueType,
        jdbc_type: Option<JdbcType>,
    ) -> ScriptResult<Option<String>> {
        if let Some(name) = placeholder.option("typeHandler") {
            return match self.registry.resolve_named(name, value_type) {
                Some(handler) => Ok(Some(handler.name().to_string())),
                None => Err(TypeResolutionError {
                    property: placeholder.property.clone(),
                    candidates: self.registry.handler_names(),
                }
                .into()),
            };
        }

        if *value_type == ValueType::Cursor {
            return Ok(None);
        }
        if !self.registry.knows_type(value_type) {
            return Err(TypeResolutionError {
                property: placeholder.property.clone(),
                candidates: self.registry.candidates(value_type),
            }
            .into());
        }
        Ok(self
            .registry
            .handler_for(value_type, jdbc_type)
            .map(|h| h.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;
    use crate::types::{EnumType, RecordType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        registry: TypeHandlerRegistry,
        aliases: TypeAliases,
    }

    impl Fixture {
        fn new() -> Self {
            let mut aliases = TypeAliases::new();
            aliases.register_enum(EnumType::new("Status", vec!["ACTIVE".into(), "BLOCKED".into()]));
            Self {
                registry: TypeHandlerRegistry::default(),
                aliases,
            }
        }

        fn extractor(&self) -> ParameterMappingExtractor<'_> {
            ParameterMappingExtractor::new(&self.registry, &self.aliases, PlaceholderStyle::Question)
        }

        fn extract(&self, sql: &str, declared: &ValueType) -> ScriptResult<StaticSql> {
            self.extractor().extract(sql, declared, &Bindings::new())
        }
    }

    fn user_type() -> ValueType {
        ValueType::Record(Arc::new(
            RecordType::new("User")
                .with_property("id", ValueType::Long)
                .with_property("name", ValueType::String)
                .with_property(
                    "address",
                    ValueType::Record(Arc::new(
                        RecordType::new("Address").with_property("city", ValueType::String),
                    )),
                ),
        ))
    }

    #[test]
    fn test_markers_and_order() {
        let fx = Fixture::new();
        let out = fx
            .extract("select * from t where a = #{a} and b = #{b}", &ValueType::Map)
            .unwrap();
        assert_eq!(out.sql, "select * from t where a = ? and b = ?");
        let props: Vec<&str> = out.parameter_mappings.iter().map(|m| m.property.as_str()).collect();
        assert_eq!(props, vec!["a", "b"]);
        assert!(out.parameter_mappings.iter().all(|m| m.value_type == ValueType::Object));
    }

    #[test]
    fn test_numbered_markers() {
        let fx = Fixture::new();
        let extractor =
            ParameterMappingExtractor::new(&fx.registry, &fx.aliases, PlaceholderStyle::Numbered);
        let out = extractor
            .extract("a = #{a} and b = #{b}", &ValueType::Map, &Bindings::new())
            .unwrap();
        assert_eq!(out.sql, "a = $1 and b = $2");
    }

    #[test]
    fn test_escaped_placeholder_stays_literal() {
        let fx = Fixture::new();
        let out = fx.extract(r"select '\#{x}' , #{y}", &ValueType::Map).unwrap();
        assert_eq!(out.sql, "select '#{x}' , ?");
        assert_eq!(out.parameter_mappings.len(), 1);
    }

    #[test]
    fn test_declared_simple_type_wins() {
        let fx = Fixture::new();
        let out = fx.extract("id = #{id}", &ValueType::Long).unwrap();
        assert_eq!(out.parameter_mappings[0].value_type, ValueType::Long);
        assert_eq!(out.parameter_mappings[0].type_handler.as_deref(), Some("long"));
    }

    #[test]
    fn test_list_parameter_elements_are_untyped() {
        let fx = Fixture::new();
        let out = fx.extract("#{list[1]}, #{array[0]}", &ValueType::List).unwrap();
        for mapping in &out.parameter_mappings {
            assert_eq!(mapping.value_type, ValueType::Object);
            assert_eq!(mapping.type_handler.as_deref(), Some("object"));
        }
    }

    #[test]
    fn test_record_property_types() {
        let fx = Fixture::new();
        let out = fx
            .extract("#{name}, #{address.city}, #{missing}", &user_type())
            .unwrap();
        let types: Vec<ValueType> = out
            .parameter_mappings
            .iter()
            .map(|m| m.value_type.clone())
            .collect();
        assert_eq!(types, vec![ValueType::String, ValueType::String, ValueType::Object]);
    }

    #[test]
    fn test_record_without_handler_fails() {
        let fx = Fixture::new();
        let err = fx.extract("#{address}", &user_type()).unwrap_err();
        match err {
            ScriptError::TypeResolution(e) => assert_eq!(e.property, "address"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extra_binding_runtime_type() {
        let fx = Fixture::new();
        let mut extra = Bindings::new();
        extra.insert("__frch_x_0".to_string(), Value::from("a"));
        extra.insert("__frch_u_0".to_string(), Value::from(json!({"age": 3})));
        let out = fx
            .extractor()
            .extract("#{__frch_x_0}, #{__frch_u_0.age}", &user_type(), &extra)
            .unwrap();
        assert_eq!(out.parameter_mappings[0].value_type, ValueType::String);
        assert_eq!(out.parameter_mappings[1].value_type, ValueType::Long);
    }

    #[test]
    fn test_options() {
        let fx = Fixture::new();
        let out = fx
            .extract(
                "#{price, javaType=decimal, jdbcType=NUMERIC, numericScale=2, mode=INOUT, jdbcTypeName=MONEY}",
                &ValueType::Map,
            )
            .unwrap();
        let m = &out.parameter_mappings[0];
        assert_eq!(m.value_type, ValueType::Decimal);
        assert_eq!(m.jdbc_type, Some(JdbcType::Numeric));
        assert_eq!(m.numeric_scale, Some(2));
        assert_eq!(m.mode, ParameterMode::InOut);
        assert_eq!(m.jdbc_type_name.as_deref(), Some("MONEY"));
        assert_eq!(m.type_handler.as_deref(), Some("decimal"));
    }

    #[test]
    fn test_jdbc_shorthand_selects_handler() {
        let fx = Fixture::new();
        let out = fx.extract("#{body:CLOB}", &ValueType::String).unwrap();
        assert_eq!(out.parameter_mappings[0].jdbc_type, Some(JdbcType::Clob));
        assert_eq!(out.parameter_mappings[0].type_handler.as_deref(), Some("clob"));
    }

    #[test]
    fn test_cursor_needs_result_map() {
        let fx = Fixture::new();
        let out = fx
            .extract("#{rows, jdbcType=CURSOR, mode=OUT, resultMap=userMap}", &user_type())
            .unwrap();
        assert_eq!(out.parameter_mappings[0].value_type, ValueType::Cursor);
        assert!(out.parameter_mappings[0].type_handler.is_none());

        let err = fx.extract("#{rows, jdbcType=CURSOR}", &user_type()).unwrap_err();
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_invalid_options() {
        let fx = Fixture::new();
        for sql in [
            "#{a, jdbcType=NOPE}",
            "#{a, javaType=Nope}",
            "#{a, mode=SIDEWAYS}",
            "#{a, numericScale=two}",
        ] {
            let err = fx.extract(sql, &ValueType::Map).unwrap_err();
            assert!(
                matches!(err, ScriptError::Compile(CompileError::InvalidPlaceholder { .. })),
                "{sql}: {err:?}"
            );
        }
    }

    #[test]
    fn test_unknown_type_handler() {
        let fx = Fixture::new();
        let err = fx.extract("#{a, typeHandler=money}", &ValueType::Map).unwrap_err();
        match err {
            ScriptError::TypeResolution(e) => {
                assert_eq!(e.property, "a");
                assert!(e.candidates.contains(&"string".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_enum_handler_by_name() {
        let fx = Fixture::new();
        let out = fx
            .extract("#{s, javaType=Status, typeHandler=enum_ordinal}", &ValueType::Map)
            .unwrap();
        assert_eq!(out.parameter_mappings[0].type_handler.as_deref(), Some("enum_ordinal"));
    }

    fn bound(sql: &str, mappings: Vec<ParameterMapping>, extra: Bindings) -> BoundSql {
        BoundSql::new(
            StaticSql {
                sql: sql.to_string(),
                parameter_mappings: mappings,
            },
            extra,
        )
    }

    #[test]
    fn test_resolve_values_precedence() {
        let mut extra = Bindings::new();
        extra.insert("__frch_id_0".to_string(), Value::Int(7));
        let sql = bound(
            "?, ?, ?",
            vec![
                ParameterMapping::new("__frch_id_0", ValueType::Object),
                ParameterMapping::new("user.name", ValueType::Object),
                ParameterMapping {
                    mode: ParameterMode::Out,
                    ..ParameterMapping::new("result", ValueType::Object)
                },
            ],
            extra,
        );
        let values = sql
            .resolve_values(&Value::from(json!({"user": {"name": "ann"}})))
            .unwrap();
        assert_eq!(values, vec![Value::Int(7), Value::from("ann"), Value::Null]);
    }

    #[test]
    fn test_resolve_scalar_and_list_parameters() {
        let sql = bound("?", vec![ParameterMapping::new("id", ValueType::Long)], Bindings::new());
        assert_eq!(sql.resolve_values(&Value::Int(5)).unwrap(), vec![Value::Int(5)]);
        assert_eq!(sql.resolve_values(&Value::Null).unwrap(), vec![Value::Null]);

        let sql = bound("?", vec![ParameterMapping::new("list[1]", ValueType::Object)], Bindings::new());
        assert_eq!(
            sql.resolve_values(&Value::from(vec![10, 20])).unwrap(),
            vec![Value::Int(20)]
        );
    }

    #[test]
    fn test_resolve_unresolvable_path() {
        let sql = bound("?", vec![ParameterMapping::new("user.name", ValueType::Object)], Bindings::new());
        let err = sql
            .resolve_values(&Value::from(json!({"user": 3})))
            .unwrap_err();
        match err {
            ScriptError::Binding(e) => {
                assert_eq!(e.path, "user.name");
                assert_eq!(e.available, vec!["user"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bind_values_applies_converters() {
        let fx = Fixture::new();
        let status = fx.aliases.resolve("Status").unwrap();
        let sql = bound(
            "?, ?, ?",
            vec![
                ParameterMapping {
                    type_handler: Some("enum_ordinal".to_string()),
                    ..ParameterMapping::new("status", status)
                },
                ParameterMapping::new("on", ValueType::Date),
                ParameterMapping::new("flag", ValueType::Object),
            ],
            Bindings::new(),
        );
        let values = sql
            .bind_values(
                &Value::from(json!({"status": "BLOCKED", "on": "2024-02-03", "flag": true})),
                &fx.registry,
            )
            .unwrap();
        assert_eq!(
            values,
            vec![Value::Int(1), Value::from("2024-02-03"), Value::Bool(true)]
        );
    }
}
