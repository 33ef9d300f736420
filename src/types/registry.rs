//! Process-wide converter registry.
//!
//! Built-ins are registered by [`TypeHandlerRegistry::new`]. The only
//! mutation after that is the lazy default handler for enum types, which is
//! inserted at most once per enum through the `DashMap` entry API.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::types::handler::{
    ArrayHandler, BooleanHandler, BytesHandler, DecimalHandler, EnumHandlerKind, EnumNameHandler,
    EnumOrdinalHandler, FloatHandler, IntegerHandler, ObjectHandler, StringHandler,
    TemporalHandler, TypeHandler,
};
use crate::types::{JdbcType, ValueType};

const ENUM_NAME: &str = "enum_name";
const ENUM_ORDINAL: &str = "enum_ordinal";

type HandlerMap = HashMap<Option<JdbcType>, Arc<dyn TypeHandler>>;

pub struct TypeHandlerRegistry {
    by_type: DashMap<ValueType, HandlerMap>,
    by_jdbc: DashMap<JdbcType, Arc<dyn TypeHandler>>,
    by_name: DashMap<String, Arc<dyn TypeHandler>>,
    enum_handler: EnumHandlerKind,
}

impl TypeHandlerRegistry {
    pub fn new(enum_handler: EnumHandlerKind) -> Self {
        let registry = Self {
            by_type: DashMap::new(),
            by_jdbc: DashMap::new(),
            by_name: DashMap::new(),
            enum_handler,
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&self) {
        let boolean: Arc<dyn TypeHandler> = Arc::new(BooleanHandler);
        self.register(ValueType::Boolean, None, boolean.clone());
        self.register(ValueType::Boolean, Some(JdbcType::Bit), boolean.clone());
        self.register_jdbc(JdbcType::Boolean, boolean.clone());
        self.register_jdbc(JdbcType::Bit, boolean);

        let byte: Arc<dyn TypeHandler> = Arc::new(IntegerHandler::BYTE);
        self.register(ValueType::Byte, None, byte.clone());
        self.register_jdbc(JdbcType::TinyInt, byte);

        let short: Arc<dyn TypeHandler> = Arc::new(IntegerHandler::SHORT);
        self.register(ValueType::Short, None, short.clone());
        self.register_jdbc(JdbcType::SmallInt, short);

        let integer: Arc<dyn TypeHandler> = Arc::new(IntegerHandler::INTEGER);
        self.register(ValueType::Integer, None, integer.clone());
        self.register_jdbc(JdbcType::Integer, integer);

        let long: Arc<dyn TypeHandler> = Arc::new(IntegerHandler::LONG);
        self.register(ValueType::Long, None, long.clone());
        self.register_jdbc(JdbcType::BigInt, long);

        let float: Arc<dyn TypeHandler> = Arc::new(FloatHandler::FLOAT);
        self.register(ValueType::Float, None, float.clone());
        self.register_jdbc(JdbcType::Float, float.clone());
        self.register_jdbc(JdbcType::Real, float);

        let double: Arc<dyn TypeHandler> = Arc::new(FloatHandler::DOUBLE);
        self.register(ValueType::Double, None, double.clone());
        self.register_jdbc(JdbcType::Double, double);

        let decimal: Arc<dyn TypeHandler> = Arc::new(DecimalHandler);
        self.register(ValueType::Decimal, None, decimal.clone());
        self.register_jdbc(JdbcType::Decimal, decimal.clone());
        self.register_jdbc(JdbcType::Numeric, decimal);

        let string: Arc<dyn TypeHandler> = Arc::new(StringHandler::STRING);
        self.register(ValueType::String, None, string.clone());
        self.register(ValueType::String, Some(JdbcType::Char), string.clone());
        self.register(ValueType::String, Some(JdbcType::Varchar), string.clone());
        self.register(ValueType::String, Some(JdbcType::Clob), Arc::new(StringHandler::CLOB));
        self.register(ValueType::String, Some(JdbcType::NVarchar), Arc::new(StringHandler::NSTRING));
        self.register(ValueType::String, Some(JdbcType::NChar), Arc::new(StringHandler::NSTRING));
        self.register(ValueType::String, Some(JdbcType::NClob), Arc::new(StringHandler::NCLOB));
        self.register(ValueType::String, Some(JdbcType::SqlXml), Arc::new(StringHandler::SQLXML));
        for jdbc in [JdbcType::Char, JdbcType::Varchar, JdbcType::LongVarchar] {
            self.register_jdbc(jdbc, string.clone());
        }
        self.register_jdbc(JdbcType::Clob, Arc::new(StringHandler::CLOB));
        self.register_jdbc(JdbcType::NVarchar, Arc::new(StringHandler::NSTRING));
        self.register_jdbc(JdbcType::NChar, Arc::new(StringHandler::NSTRING));
        self.register_jdbc(JdbcType::NClob, Arc::new(StringHandler::NCLOB));
        self.register_jdbc(JdbcType::SqlXml, Arc::new(StringHandler::SQLXML));

        let bytes: Arc<dyn TypeHandler> = Arc::new(BytesHandler::BYTES);
        self.register(ValueType::Bytes, None, bytes.clone());
        self.register(ValueType::Bytes, Some(JdbcType::Blob), Arc::new(BytesHandler::BLOB));
        for jdbc in [JdbcType::Binary, JdbcType::VarBinary, JdbcType::LongVarBinary] {
            self.register_jdbc(jdbc, bytes.clone());
        }
        self.register_jdbc(JdbcType::Blob, Arc::new(BytesHandler::BLOB));

        let date: Arc<dyn TypeHandler> = Arc::new(TemporalHandler::DATE);
        let time: Arc<dyn TypeHandler> = Arc::new(TemporalHandler::TIME);
        let timestamp: Arc<dyn TypeHandler> = Arc::new(TemporalHandler::TIMESTAMP);
        self.register(ValueType::Date, None, date.clone());
        self.register(ValueType::Time, None, time.clone());
        self.register(ValueType::Timestamp, None, timestamp.clone());
        self.register(ValueType::Timestamp, Some(JdbcType::Date), date.clone());
        self.register(ValueType::Timestamp, Some(JdbcType::Time), time.clone());
        self.register_jdbc(JdbcType::Date, date);
        self.register_jdbc(JdbcType::Time, time);
        self.register_jdbc(JdbcType::Timestamp, timestamp);

        let array: Arc<dyn TypeHandler> = Arc::new(ArrayHandler);
        self.register(ValueType::List, None, array.clone());
        self.register_jdbc(JdbcType::Array, array);

        let object: Arc<dyn TypeHandler> = Arc::new(ObjectHandler);
        self.register(ValueType::Object, None, object.clone());
        self.register_jdbc(JdbcType::Other, object);
    }

    /// Register a handler for a type, optionally tied to one jdbc type.
    pub fn register(&self, ty: ValueType, jdbc_type: Option<JdbcType>, handler: Arc<dyn TypeHandler>) {
        self.by_name
            .entry(handler.name().to_string())
            .or_insert_with(|| handler.clone());
        self.by_type.entry(ty).or_default().insert(jdbc_type, handler);
    }

    /// Register a handler used when only the jdbc type is known.
    pub fn register_jdbc(&self, jdbc_type: JdbcType, handler: Arc<dyn TypeHandler>) {
        self.by_name
            .entry(handler.name().to_string())
            .or_insert_with(|| handler.clone());
        self.by_jdbc.insert(jdbc_type, handler);
    }

    /// Resolve a handler: exact `(type, jdbc)` match, then the type's
    /// default, then the type's only handler. Anything else is `None`, and
    /// the caller decides whether that is an error.
    pub fn handler_for(&self, ty: &ValueType, jdbc_type: Option<JdbcType>) -> Option<Arc<dyn TypeHandler>> {
        if let ValueType::Enum(enum_type) = ty {
            self.by_type.entry(ty.clone()).or_insert_with(|| {
                debug!("registering {:?} enum handler for {}", self.enum_handler, enum_type.name);
                let handler: Arc<dyn TypeHandler> = match self.enum_handler {
                    EnumHandlerKind::Name => Arc::new(EnumNameHandler::new(enum_type.clone())),
                    EnumHandlerKind::Ordinal => Arc::new(EnumOrdinalHandler::new(enum_type.clone())),
                };
                HashMap::from([(None, handler)])
            });
        }

        let handlers = self.by_type.get(ty)?;
        if let Some(handler) = jdbc_type.and_then(|jdbc| handlers.get(&Some(jdbc))) {
            return Some(handler.clone());
        }
        if let Some(handler) = handlers.get(&None) {
            return Some(handler.clone());
        }
        sole_handler(&handlers)
    }

    pub fn has_handler(&self, ty: &ValueType) -> bool {
        self.handler_for(ty, None).is_some()
    }

    /// Whether anything at all is registered for the type.
    pub fn knows_type(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Enum(_)) || self.by_type.contains_key(ty)
    }

    pub fn handler_for_jdbc(&self, jdbc_type: JdbcType) -> Option<Arc<dyn TypeHandler>> {
        self.by_jdbc.get(&jdbc_type).map(|h| h.clone())
    }

    pub fn handler_named(&self, name: &str) -> Option<Arc<dyn TypeHandler>> {
        self.by_name.get(name).map(|h| h.clone())
    }

    /// Handler named explicitly for a property of type `ty`. Enum handlers
    /// are bound to their enum, so they are built on request.
    pub fn resolve_named(&self, name: &str, ty: &ValueType) -> Option<Arc<dyn TypeHandler>> {
        if let Some(handler) = self.handler_named(name) {
            return Some(handler);
        }
        let ValueType::Enum(enum_type) = ty else {
            return None;
        };
        let handler: Arc<dyn TypeHandler> = match name {
            ENUM_NAME => Arc::new(EnumNameHandler::new(enum_type.clone())),
            ENUM_ORDINAL => Arc::new(EnumOrdinalHandler::new(enum_type.clone())),
            _ => return None,
        };
        Some(handler)
    }

    /// Every registered handler name, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.extend([ENUM_NAME.to_string(), ENUM_ORDINAL.to_string()]);
        names.sort();
        names.dedup();
        names
    }

    /// Handler names registered for one type, sorted.
    pub fn candidates(&self, ty: &ValueType) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_type
            .get(ty)
            .map(|handlers| handlers.values().map(|h| h.name().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names.dedup();
        names
    }
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        Self::new(EnumHandlerKind::default())
    }
}

impl std::fmt::Debug for TypeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandlerRegistry")
            .field("types", &self.by_type.len())
            .field("handlers", &self.by_name.len())
            .field("enum_handler", &self.enum_handler)
            .finish()
    }
}

fn sole_handler(handlers: &HandlerMap) -> Option<Arc<dyn TypeHandler>> {
    let mut values = handlers.values();
    let first = values.next()?;
    values
        .all(|h| Arc::ptr_eq(h, first) || h.name() == first.name())
        .then(|| first.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumType;

    #[test]
    fn test_exact_then_default() {
        let registry = TypeHandlerRegistry::default();
        let h = registry.handler_for(&ValueType::String, Some(JdbcType::Clob)).unwrap();
        assert_eq!(h.name(), "clob");
        let h = registry.handler_for(&ValueType::String, Some(JdbcType::Integer)).unwrap();
        assert_eq!(h.name(), "string");
    }

    #[test]
    fn test_no_handler_for_structured_types() {
        let registry = TypeHandlerRegistry::default();
        assert!(registry.handler_for(&ValueType::Map, None).is_none());
        assert!(registry.handler_for(&ValueType::Cursor, None).is_none());
        assert!(!registry.knows_type(&ValueType::Map));
    }

    #[test]
    fn test_sole_handler_across_hints() {
        let registry = TypeHandlerRegistry::default();
        let ty = ValueType::Record(Arc::new(crate::types::RecordType::new("Point")));
        registry.register(ty.clone(), Some(JdbcType::Struct), Arc::new(ObjectHandler));
        let h = registry.handler_for(&ty, Some(JdbcType::Varchar)).unwrap();
        assert_eq!(h.name(), "object");
    }

    #[test]
    fn test_ambiguous_yields_none() {
        let registry = TypeHandlerRegistry::default();
        let ty = ValueType::Record(Arc::new(crate::types::RecordType::new("Money")));
        registry.register(ty.clone(), Some(JdbcType::Varchar), Arc::new(StringHandler::STRING));
        registry.register(ty.clone(), Some(JdbcType::Decimal), Arc::new(DecimalHandler));
        assert!(registry.handler_for(&ty, None).is_none());
        assert_eq!(
            registry.handler_for(&ty, Some(JdbcType::Decimal)).unwrap().name(),
            "decimal"
        );
        assert_eq!(registry.candidates(&ty), vec!["decimal", "string"]);
    }

    #[test]
    fn test_enum_handler_registered_once() {
        let registry = TypeHandlerRegistry::new(EnumHandlerKind::Ordinal);
        let ty = ValueType::Enum(Arc::new(EnumType::new("Color", vec!["RED".into()])));
        let first = registry.handler_for(&ty, None).unwrap();
        let second = registry.handler_for(&ty, None).unwrap();
        assert_eq!(first.name(), "enum_ordinal");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_resolve_named() {
        let registry = TypeHandlerRegistry::default();
        assert_eq!(
            registry.resolve_named("clob", &ValueType::Object).unwrap().name(),
            "clob"
        );
        let ty = ValueType::Enum(Arc::new(EnumType::new("Color", vec!["RED".into()])));
        assert_eq!(registry.resolve_named("enum_ordinal", &ty).unwrap().name(), "enum_ordinal");
        assert!(registry.resolve_named("enum_ordinal", &ValueType::String).is_none());
        assert!(registry.resolve_named("money", &ValueType::String).is_none());
        assert!(registry.handler_names().contains(&"enum_name".to_string()));
    }

    #[test]
    fn test_enum_handler_concurrent_first_use() {
        let registry = Arc::new(TypeHandlerRegistry::default());
        let ty = ValueType::Enum(Arc::new(EnumType::new("Shape", vec!["SQUARE".into()])));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let ty = ty.clone();
                std::thread::spawn(move || registry.handler_for(&ty, None).unwrap())
            })
            .collect();
        let handlers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(handlers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
