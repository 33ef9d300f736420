//! Declared types, backend (JDBC) types and type converters.

pub mod handler;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use crate::ast::PathSegment;
use crate::error::{ScriptError, ScriptResult};

pub use handler::{EnumHandlerKind, TypeHandler};
pub use registry::TypeHandlerRegistry;

/// The in-process type of a parameter or property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Untyped; the converter is picked from the runtime value.
    Object,
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    Timestamp,
    List,
    Map,
    /// A result cursor (`jdbcType=CURSOR` output parameters).
    Cursor,
    Enum(Arc<EnumType>),
    Record(Arc<RecordType>),
}

impl ValueType {
    /// Built-in alias lookup (case-insensitive).
    pub fn builtin(alias: &str) -> Option<Self> {
        let ty = match alias.trim().to_ascii_lowercase().trim_start_matches('_') {
            "object" => ValueType::Object,
            "boolean" | "bool" => ValueType::Boolean,
            "byte" => ValueType::Byte,
            "short" => ValueType::Short,
            "int" | "integer" => ValueType::Integer,
            "long" => ValueType::Long,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            "decimal" | "bigdecimal" | "biginteger" => ValueType::Decimal,
            "string" | "char" | "character" => ValueType::String,
            "bytes" | "byte[]" => ValueType::Bytes,
            "date" | "localdate" => ValueType::Date,
            "time" | "localtime" => ValueType::Time,
            "timestamp" | "localdatetime" | "datetime" | "instant" => ValueType::Timestamp,
            "list" | "arraylist" | "collection" | "array" => ValueType::List,
            "map" | "hashmap" => ValueType::Map,
            "cursor" | "resultset" => ValueType::Cursor,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ValueType::Map)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ValueType::List)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, ValueType::Object)
    }

    /// Type of the property reached by `segments` when this is a record.
    pub fn property_type(&self, segments: &[PathSegment]) -> Option<ValueType> {
        let mut current = self.clone();
        for segment in segments {
            current = match (&current, segment) {
                (ValueType::Record(record), PathSegment::Property(name)) => {
                    record.property(name)?.clone()
                }
                // element types are not tracked
                (ValueType::List, PathSegment::Index(_)) => ValueType::Object,
                (ValueType::Map, _) | (ValueType::Object, _) => ValueType::Object,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Object => write!(f, "object"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Byte => write!(f, "byte"),
            ValueType::Short => write!(f, "short"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Long => write!(f, "long"),
            ValueType::Float => write!(f, "float"),
            ValueType::Double => write!(f, "double"),
            ValueType::Decimal => write!(f, "decimal"),
            ValueType::String => write!(f, "string"),
            ValueType::Bytes => write!(f, "bytes"),
            ValueType::Date => write!(f, "date"),
            ValueType::Time => write!(f, "time"),
            ValueType::Timestamp => write!(f, "timestamp"),
            ValueType::List => write!(f, "list"),
            ValueType::Map => write!(f, "map"),
            ValueType::Cursor => write!(f, "cursor"),
            ValueType::Enum(e) => write!(f, "{}", e.name),
            ValueType::Record(r) => write!(f, "{}", r.name),
        }
    }
}

/// A named enumeration. Values travel as their variant names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, variants: Vec<String>) -> Self {
        Self {
            name: name.into(),
            variants,
        }
    }

    pub fn ordinal(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == variant)
    }
}

/// A structured parameter type with declared property types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordType {
    pub name: String,
    properties: Vec<(String, ValueType)>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.properties.push((name.into(), ty));
        self
    }

    pub fn property(&self, name: &str) -> Option<&ValueType> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &ValueType)> {
        self.properties.iter().map(|(n, t)| (n.as_str(), t))
    }
}

/// Backend column/bind types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JdbcType {
    Array,
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Null,
    Other,
    Blob,
    Clob,
    Boolean,
    Cursor,
    Undefined,
    NVarchar,
    NChar,
    NClob,
    Struct,
    SqlXml,
}

impl JdbcType {
    pub fn name(&self) -> &'static str {
        match self {
            JdbcType::Array => "ARRAY",
            JdbcType::Bit => "BIT",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Float => "FLOAT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "DOUBLE",
            JdbcType::Numeric => "NUMERIC",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar => "VARCHAR",
            JdbcType::LongVarchar => "LONGVARCHAR",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::Binary => "BINARY",
            JdbcType::VarBinary => "VARBINARY",
            JdbcType::LongVarBinary => "LONGVARBINARY",
            JdbcType::Null => "NULL",
            JdbcType::Other => "OTHER",
            JdbcType::Blob => "BLOB",
            JdbcType::Clob => "CLOB",
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::Cursor => "CURSOR",
            JdbcType::Undefined => "UNDEFINED",
            JdbcType::NVarchar => "NVARCHAR",
            JdbcType::NChar => "NCHAR",
            JdbcType::NClob => "NCLOB",
            JdbcType::Struct => "STRUCT",
            JdbcType::SqlXml => "SQLXML",
        }
    }

    const ALL: [JdbcType; 32] = [
        JdbcType::Array,
        JdbcType::Bit,
        JdbcType::TinyInt,
        JdbcType::SmallInt,
        JdbcType::Integer,
        JdbcType::BigInt,
        JdbcType::Float,
        JdbcType::Real,
        JdbcType::Double,
        JdbcType::Numeric,
        JdbcType::Decimal,
        JdbcType::Char,
        JdbcType::Varchar,
        JdbcType::LongVarchar,
        JdbcType::Date,
        JdbcType::Time,
        JdbcType::Timestamp,
        JdbcType::Binary,
        JdbcType::VarBinary,
        JdbcType::LongVarBinary,
        JdbcType::Null,
        JdbcType::Other,
        JdbcType::Blob,
        JdbcType::Clob,
        JdbcType::Boolean,
        JdbcType::Cursor,
        JdbcType::Undefined,
        JdbcType::NVarchar,
        JdbcType::NChar,
        JdbcType::NClob,
        JdbcType::Struct,
        JdbcType::SqlXml,
    ];
}

impl FromStr for JdbcType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        JdbcType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown jdbcType '{}'", wanted))
    }
}

impl std::fmt::Display for JdbcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Direction of a bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl FromStr for ParameterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(ParameterMode::In),
            "OUT" => Ok(ParameterMode::Out),
            "INOUT" => Ok(ParameterMode::InOut),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for ParameterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterMode::In => write!(f, "IN"),
            ParameterMode::Out => write!(f, "OUT"),
            ParameterMode::InOut => write!(f, "INOUT"),
        }
    }
}

/// Type names usable in `parameterType` and `javaType`: the built-ins plus
/// declared records and enums.
#[derive(Debug, Clone, Default)]
pub struct TypeAliases {
    declared: HashMap<String, ValueType>,
}

impl TypeAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, alias: impl Into<String>, ty: ValueType) {
        self.declared.insert(alias.into().to_ascii_lowercase(), ty);
    }

    pub fn register_record(&mut self, record: RecordType) -> ValueType {
        let ty = ValueType::Record(Arc::new(record));
        self.register(ty.to_string(), ty.clone());
        ty
    }

    pub fn register_enum(&mut self, enum_type: EnumType) -> ValueType {
        let ty = ValueType::Enum(Arc::new(enum_type));
        self.register(ty.to_string(), ty.clone());
        ty
    }

    pub fn resolve(&self, alias: &str) -> Option<ValueType> {
        self.declared
            .get(&alias.trim().to_ascii_lowercase())
            .cloned()
            .or_else(|| ValueType::builtin(alias))
    }

    /// Build aliases from declared enums and records. Records may reference
    /// each other by name in any order; cycles and unknown names fail.
    pub fn from_declarations(
        enums: &BTreeMap<String, Vec<String>>,
        records: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> ScriptResult<Self> {
        let mut aliases = Self::new();
        for (name, variants) in enums {
            aliases.register_enum(EnumType::new(name.clone(), variants.clone()));
        }

        let mut pending: Vec<&String> = records.keys().collect();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|name| {
                let props = &records[*name];
                let resolved: Option<Vec<(String, ValueType)>> = props
                    .iter()
                    .map(|(prop, alias)| aliases.resolve(alias).map(|ty| (prop.clone(), ty)))
                    .collect();
                match resolved {
                    Some(props) => {
                        let record = props
                            .into_iter()
                            .fold(RecordType::new(name.as_str()), |r, (p, t)| {
                                r.with_property(p, t)
                            });
                        aliases.register_record(record);
                        false
                    }
                    None => true,
                }
            });
            if pending.len() == before {
                let names: Vec<&str> = pending.iter().map(|s| s.as_str()).collect();
                return Err(ScriptError::Config(format!(
                    "record types reference unknown or cyclic types: {}",
                    names.join(", ")
                )));
            }
        }
        Ok(aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PropertyPath;

    #[test]
    fn test_builtin_aliases() {
        assert_eq!(ValueType::builtin("int"), Some(ValueType::Integer));
        assert_eq!(ValueType::builtin("_long"), Some(ValueType::Long));
        assert_eq!(ValueType::builtin("HashMap"), Some(ValueType::Map));
        assert_eq!(ValueType::builtin("Widget"), None);
    }

    #[test]
    fn test_jdbc_type_parse() {
        assert_eq!("VARCHAR".parse::<JdbcType>(), Ok(JdbcType::Varchar));
        assert_eq!("numeric".parse::<JdbcType>(), Ok(JdbcType::Numeric));
        assert!("VARCHAR2".parse::<JdbcType>().is_err());
    }

    #[test]
    fn test_record_property_types() {
        let mut records = BTreeMap::new();
        records.insert(
            "User".to_string(),
            BTreeMap::from([
                ("id".to_string(), "long".to_string()),
                ("address".to_string(), "Address".to_string()),
            ]),
        );
        records.insert(
            "Address".to_string(),
            BTreeMap::from([("city".to_string(), "string".to_string())]),
        );
        let aliases = TypeAliases::from_declarations(&BTreeMap::new(), &records).unwrap();
        let user = aliases.resolve("user").unwrap();

        let path = PropertyPath::parse("address.city");
        assert_eq!(user.property_type(path.segments()), Some(ValueType::String));
        let path = PropertyPath::parse("nickname");
        assert_eq!(user.property_type(path.segments()), None);
    }

    #[test]
    fn test_cyclic_records_rejected() {
        let records = BTreeMap::from([
            (
                "A".to_string(),
                BTreeMap::from([("b".to_string(), "B".to_string())]),
            ),
            (
                "B".to_string(),
                BTreeMap::from([("a".to_string(), "A".to_string())]),
            ),
        ]);
        let err = TypeAliases::from_declarations(&BTreeMap::new(), &records).unwrap_err();
        assert!(err.to_string().contains("A, B"));
    }
}
