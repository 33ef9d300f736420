//! Mapper documents and the compiled statement cache.
//!
//! ```text
//! <mapper namespace="users">
//!   <sql id="columns">id, name</sql>
//!   <select id="find" parameterType="map">
//!     select <include refid="columns"/> from users <where>...</where>
//!   </select>
//! </mapper>
//! ```
//!
//! Statements are registered as `namespace.id`. Includes are resolved when
//! a statement is first compiled, so a fragment may live in a mapper that
//! is added later.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::ast::Value;
use crate::config::ScriptConfig;
use crate::engine::{Engine, SqlSource};
use crate::error::{CompileError, ScriptError, ScriptResult};
use crate::mapping::BoundSql;
use crate::parser::{parse_document, Content, Element};
use crate::scanner::SUBSTITUTION;
use crate::types::ValueType;

/// Suffix of the statement id a `<selectKey>` is registered under.
pub const SELECT_KEY_SUFFIX: &str = "!selectKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl FromStr for StatementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select" => Ok(StatementKind::Select),
            "insert" => Ok(StatementKind::Insert),
            "update" => Ok(StatementKind::Update),
            "delete" => Ok(StatementKind::Delete),
            other => Err(format!("unknown statement kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementKind::Select => write!(f, "select"),
            StatementKind::Insert => write!(f, "insert"),
            StatementKind::Update => write!(f, "update"),
            StatementKind::Delete => write!(f, "delete"),
        }
    }
}

/// Key generation attached to an insert or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectKey {
    /// Id of the generated key statement (`<id>!selectKey`).
    pub statement_id: String,
    pub key_property: Option<String>,
    pub key_column: Option<String>,
    /// Runs before the statement (`order="BEFORE"`).
    pub before: bool,
}

/// A registered statement, not yet compiled.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    /// Qualified id, `namespace.id`.
    pub id: String,
    pub namespace: String,
    pub kind: StatementKind,
    pub database_id: Option<String>,
    pub parameter_type: ValueType,
    pub result_type: Option<String>,
    pub result_map: Option<String>,
    pub select_key: Option<SelectKey>,
    /// Statement element with `<selectKey>` removed; includes unresolved.
    pub body: Element,
}

impl MappedStatement {
    /// The id without its namespace.
    pub fn short_id(&self) -> &str {
        self.id
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone)]
struct Fragment {
    namespace: String,
    database_id: Option<String>,
    element: Element,
}

pub struct Catalog {
    engine: Engine,
    fragments: HashMap<String, Fragment>,
    statements: BTreeMap<String, Arc<MappedStatement>>,
    cache: DashMap<String, Arc<SqlSource>>,
}

impl Catalog {
    pub fn new(config: &ScriptConfig) -> ScriptResult<Self> {
        Ok(Self::with_engine(Engine::new(config)?))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            fragments: HashMap::new(),
            statements: BTreeMap::new(),
            cache: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Register the fragments and statements of one mapper document.
    /// Returns the number of statements added.
    pub fn add_mapper(&mut self, text: &str) -> ScriptResult<usize> {
        let root = parse_document(text)?;
        if root.name != "mapper" {
            return Err(ScriptError::Config(format!(
                "expected <mapper> document, found <{}>",
                root.name
            )));
        }
        let namespace = root
            .attribute("namespace")
            .filter(|ns| !ns.trim().is_empty())
            .ok_or_else(|| CompileError::missing("mapper", "namespace"))?
            .trim()
            .to_string();

        for element in root.elements().filter(|e| e.name == "sql") {
            self.add_fragment(&namespace, element)?;
        }

        let mut added = 0;
        for element in root.elements() {
            match element.name.as_str() {
                "sql" => {}
                "select" | "insert" | "update" | "delete" => {
                    added += self.add_statement(&namespace, element)?;
                }
                other => warn!("skipping unsupported <{}> in mapper '{}'", other, namespace),
            }
        }

        info!("loaded mapper '{}' with {} statement(s)", namespace, added);
        Ok(added)
    }

    fn add_fragment(&mut self, namespace: &str, element: &Element) -> ScriptResult<()> {
        let id = qualify(namespace, required(element, "id")?);
        let database_id = element.attribute("databaseId").map(str::to_string);
        if !self.database_matches(database_id.as_deref()) {
            debug!("skipping fragment '{}' for database {:?}", id, database_id);
            return Ok(());
        }
        if let Some(previous) = self.fragments.get(&id) {
            match (&previous.database_id, &database_id) {
                (Some(_), None) => return Ok(()),
                (None, Some(_)) => {}
                _ => return Err(CompileError::DuplicateStatement(id).into()),
            }
        }
        self.fragments.insert(
            id,
            Fragment {
                namespace: namespace.to_string(),
                database_id,
                element: element.clone(),
            },
        );
        Ok(())
    }

    fn add_statement(&mut self, namespace: &str, element: &Element) -> ScriptResult<usize> {
        let id = qualify(namespace, required(element, "id")?);
        let database_id = element.attribute("databaseId").map(str::to_string);
        if !self.database_matches(database_id.as_deref()) {
            warn!("skipping statement '{}' for database {:?}", id, database_id);
            return Ok(0);
        }
        if !self.should_replace(&id, database_id.as_deref())? {
            return Ok(0);
        }
        let stale_key = format!("{}{}", id, SELECT_KEY_SUFFIX);
        self.statements.remove(&stale_key);
        self.cache.remove(&stale_key);

        let kind = StatementKind::from_str(&element.name).map_err(ScriptError::Config)?;
        let parameter_type = match element.attribute("parameterType") {
            Some(alias) => self.engine.resolve_type(alias)?,
            None => ValueType::Object,
        };

        let (body, key_element) = self.split_select_key(element)?;
        let select_key = match key_element {
            Some(key) => {
                let key_id = format!("{}{}", id, SELECT_KEY_SUFFIX);
                let select_key = SelectKey {
                    statement_id: key_id.clone(),
                    key_property: key.attribute("keyProperty").map(str::to_string),
                    key_column: key.attribute("keyColumn").map(str::to_string),
                    before: key
                        .attribute("order")
                        .is_some_and(|o| o.eq_ignore_ascii_case("BEFORE")),
                };
                self.insert(MappedStatement {
                    id: key_id,
                    namespace: namespace.to_string(),
                    kind: StatementKind::Select,
                    database_id: key.attribute("databaseId").map(str::to_string),
                    parameter_type: parameter_type.clone(),
                    result_type: key.attribute("resultType").map(str::to_string),
                    result_map: None,
                    select_key: None,
                    body: key,
                });
                Some(select_key)
            }
            None => None,
        };

        self.insert(MappedStatement {
            id,
            namespace: namespace.to_string(),
            kind,
            database_id,
            parameter_type,
            result_type: element.attribute("resultType").map(str::to_string),
            result_map: element.attribute("resultMap").map(str::to_string),
            select_key,
            body,
        });
        Ok(1)
    }

    fn insert(&mut self, statement: MappedStatement) {
        debug!("registered {} statement '{}'", statement.kind, statement.id);
        self.cache.remove(&statement.id);
        self.statements
            .insert(statement.id.clone(), Arc::new(statement));
    }

    /// Statements for another database are never registered; without a
    /// configured id only database-neutral statements are.
    fn database_matches(&self, database_id: Option<&str>) -> bool {
        match (self.engine.database_id(), database_id) {
            (_, None) => true,
            (Some(required), Some(id)) => required == id,
            (None, Some(_)) => false,
        }
    }

    /// A database-specific statement replaces a neutral one and is never
    /// replaced by one.
    fn should_replace(&self, id: &str, database_id: Option<&str>) -> ScriptResult<bool> {
        let Some(previous) = self.statements.get(id) else {
            return Ok(true);
        };
        match (previous.database_id.as_deref(), database_id) {
            (Some(_), None) => Ok(false),
            (None, Some(_)) => Ok(true),
            _ => Err(CompileError::DuplicateStatement(id.to_string()).into()),
        }
    }

    /// Remove `<selectKey>` children, keeping the one for this database.
    fn split_select_key(&self, element: &Element) -> ScriptResult<(Element, Option<Element>)> {
        let mut body = Element {
            name: element.name.clone(),
            attributes: element.attributes.clone(),
            children: Vec::with_capacity(element.children.len()),
        };
        let mut chosen: Option<Element> = None;

        for child in &element.children {
            match child {
                Content::Element(key) if key.name == "selectKey" => {
                    let database_id = key.attribute("databaseId");
                    if !self.database_matches(database_id) {
                        continue;
                    }
                    let replace = match &chosen {
                        None => true,
                        Some(previous) => match (previous.attribute("databaseId"), database_id) {
                            (None, Some(_)) => true,
                            (Some(_), None) => false,
                            _ => {
                                return Err(CompileError::DuplicateStatement(format!(
                                    "{}{}",
                                    element.attribute("id").unwrap_or_default(),
                                    SELECT_KEY_SUFFIX
                                ))
                                .into())
                            }
                        },
                    };
                    if replace {
                        chosen = Some(key.clone());
                    }
                }
                other => body.children.push(other.clone()),
            }
        }
        Ok((body, chosen))
    }

    /// Look a statement up by qualified id, or by short id when only one
    /// namespace defines it.
    pub fn statement(&self, id: &str) -> ScriptResult<Arc<MappedStatement>> {
        if let Some(statement) = self.statements.get(id) {
            return Ok(statement.clone());
        }
        let candidates: Vec<&Arc<MappedStatement>> = self
            .statements
            .values()
            .filter(|s| s.short_id() == id)
            .collect();
        match candidates.as_slice() {
            [] => Err(ScriptError::UnknownStatement(id.to_string())),
            [only] => Ok(Arc::clone(only)),
            many => Err(ScriptError::AmbiguousStatement {
                id: id.to_string(),
                candidates: many.iter().map(|s| s.id.clone()).collect(),
            }),
        }
    }

    /// Qualified ids of every registered statement, sorted.
    pub fn statement_ids(&self) -> impl Iterator<Item = &str> {
        self.statements.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Compiled source of a statement. Compiles at most once; a failed
    /// compile is not cached and fails again on the next call.
    pub fn source(&self, id: &str) -> ScriptResult<Arc<SqlSource>> {
        let statement = self.statement(id)?;
        if let Some(source) = self.cache.get(&statement.id) {
            return Ok(source.clone());
        }

        match self.cache.entry(statement.id.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let body = self.resolve_includes(&statement)?;
                let source = Arc::new(
                    self.engine
                        .compile(&body, statement.parameter_type.clone())?,
                );
                debug!(
                    "cached {} statement '{}'",
                    if source.is_dynamic() { "dynamic" } else { "static" },
                    statement.id
                );
                Ok(entry.insert(source).clone())
            }
        }
    }

    /// Render a statement for one parameter value.
    pub fn bound_sql(&self, id: &str, parameter: &Value) -> ScriptResult<BoundSql> {
        let source = self.source(id)?;
        self.engine.bound_sql(&source, parameter)
    }

    /// Compile every statement; returns the failures.
    pub fn compile_all(&self) -> Vec<(String, ScriptError)> {
        let failures: Vec<(String, ScriptError)> = self
            .statements
            .keys()
            .filter_map(|id| self.source(id).err().map(|e| (id.clone(), e)))
            .collect();
        if !failures.is_empty() {
            warn!("{} of {} statement(s) failed to compile", failures.len(), self.len());
        }
        failures
    }

    /// Statement body with every `<include>` expanded. Known `${}` names
    /// are replaced from the global variables, and inside included
    /// fragments also from the include's properties. Unknown names stay for
    /// evaluation at render time.
    pub fn resolve_includes(&self, statement: &MappedStatement) -> ScriptResult<Element> {
        let variables: HashMap<String, String> = self
            .engine
            .variables()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut stack = Vec::new();
        self.expand(&statement.body, &statement.namespace, &variables, &mut stack)
            .map_err(ScriptError::from)
    }

    fn expand(
        &self,
        element: &Element,
        namespace: &str,
        variables: &HashMap<String, String>,
        stack: &mut Vec<String>,
    ) -> Result<Element, CompileError> {
        let substitute = |text: &str| -> String {
            if !variables.is_empty() {
                SUBSTITUTION.substitute(text, |name| variables.get(name).cloned())
            } else {
                text.to_string()
            }
        };

        let mut out = Element {
            name: element.name.clone(),
            attributes: element
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), substitute(value)))
                .collect(),
            children: Vec::with_capacity(element.children.len()),
        };

        for child in &element.children {
            match child {
                Content::Text(text) => out.children.push(Content::Text(substitute(text))),
                Content::CData(text) => out.children.push(Content::CData(substitute(text))),
                Content::Element(include) if include.name == "include" => {
                    let refid = SUBSTITUTION.substitute(
                        required(include, "refid")?,
                        |name| variables.get(name).cloned(),
                    );
                    let id = qualify(namespace, &refid);
                    if stack.contains(&id) {
                        return Err(CompileError::CircularInclude(id));
                    }
                    let fragment = self
                        .fragments
                        .get(&id)
                        .ok_or_else(|| CompileError::UnknownFragment(id.clone()))?;
                    let scoped = include_variables(include, variables)?;

                    stack.push(id);
                    let expanded =
                        self.expand(&fragment.element, &fragment.namespace, &scoped, stack)?;
                    stack.pop();
                    out.children.extend(expanded.children);
                }
                Content::Element(child) => out.children.push(Content::Element(self.expand(
                    child, namespace, variables, stack,
                )?)),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("engine", &self.engine)
            .field("fragments", &self.fragments.len())
            .field("statements", &self.statements.len())
            .field("compiled", &self.cache.len())
            .finish()
    }
}

/// Inherited variables plus the `<property>` children of one include.
fn include_variables(
    include: &Element,
    inherited: &HashMap<String, String>,
) -> Result<HashMap<String, String>, CompileError> {
    let mut declared: HashMap<String, String> = HashMap::new();
    for property in include.elements().filter(|e| e.name == "property") {
        let name = required(property, "name")?;
        let value = SUBSTITUTION.substitute(required(property, "value")?, |n| {
            inherited.get(n).cloned()
        });
        if declared.insert(name.to_string(), value).is_some() {
            return Err(CompileError::DuplicateProperty(name.to_string()));
        }
    }
    if declared.is_empty() {
        return Ok(inherited.clone());
    }
    let mut scoped = inherited.clone();
    scoped.extend(declared);
    Ok(scoped)
}

/// Apply the namespace unless the reference already carries one.
fn qualify(namespace: &str, id: &str) -> String {
    let id = id.trim();
    if id.contains('.') {
        id.to_string()
    } else {
        format!("{}.{}", namespace, id)
    }
}

fn required<'e>(element: &'e Element, attribute: &'static str) -> Result<&'e str, CompileError> {
    element
        .attribute(attribute)
        .ok_or_else(|| CompileError::missing(element.name.as_str(), attribute))
}
