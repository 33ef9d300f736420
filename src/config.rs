//! Engine configuration

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};
use crate::types::{EnumHandlerKind, TypeAliases};

/// File looked up in the working directory by [`ScriptConfig::discover`].
pub const CONFIG_FILE: &str = "sqlscript.toml";

/// How bind markers are written into the final SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `?` for every parameter.
    #[default]
    Question,
    /// `$1`, `$2`, ... in order of appearance.
    Numbered,
}

impl PlaceholderStyle {
    /// Marker for the 1-based parameter `position`.
    pub fn marker(self, position: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Numbered => format!("${}", position),
        }
    }
}

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Database id matched against statement `databaseId` attributes
    pub database_id: Option<String>,

    /// Bind marker style
    pub placeholder: PlaceholderStyle,

    /// Converter enum types get when none is named
    pub default_enum_handler: EnumHandlerKind,

    /// Collapse whitespace runs in the final SQL
    pub shrink_whitespace: bool,

    /// Global `${}` properties for fragment includes
    pub variables: BTreeMap<String, String>,

    /// Declared record types: name -> property -> type alias
    pub types: BTreeMap<String, BTreeMap<String, String>>,

    /// Declared enum types: name -> variants
    pub enums: BTreeMap<String, Vec<String>>,
}

impl ScriptConfig {
    /// Create a new configuration builder
    pub fn builder() -> ScriptConfigBuilder {
        ScriptConfigBuilder::default()
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> ScriptResult<Self> {
        toml::from_str(text).map_err(|e| ScriptError::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ScriptResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ScriptError::Config(format!("{}: {}", path.display(), e)))
    }

    /// `./sqlscript.toml`, then `<config dir>/sqlscript/config.toml`, else
    /// defaults.
    pub fn discover() -> ScriptResult<Self> {
        for path in Self::search_paths() {
            if path.is_file() {
                debug!("loading config from {}", path.display());
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("sqlscript").join("config.toml"));
        }
        paths
    }

    /// Type aliases: built-ins plus the declared records and enums.
    pub fn type_aliases(&self) -> ScriptResult<TypeAliases> {
        TypeAliases::from_declarations(&self.enums, &self.types)
    }
}

/// Builder for ScriptConfig
#[derive(Debug, Default)]
pub struct ScriptConfigBuilder {
    config: ScriptConfig,
}

impl ScriptConfigBuilder {
    /// Set the database id
    pub fn database_id(mut self, id: impl Into<String>) -> Self {
        self.config.database_id = Some(id.into());
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.config.placeholder = style;
        self
    }

    pub fn enum_handler(mut self, kind: EnumHandlerKind) -> Self {
        self.config.default_enum_handler = kind;
        self
    }

    pub fn shrink_whitespace(mut self, enabled: bool) -> Self {
        self.config.shrink_whitespace = enabled;
        self
    }

    /// Add a global include variable
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.variables.insert(name.into(), value.into());
        self
    }

    /// Declare a record type from `(property, type alias)` pairs
    pub fn record<I, K, V>(mut self, name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.config.types.insert(name.into(), properties);
        self
    }

    /// Declare an enum type
    pub fn enumeration<I, S>(mut self, name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants = variants.into_iter().map(Into::into).collect();
        self.config.enums.insert(name.into(), variants);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ScriptConfig {
        self.config
    }
}
