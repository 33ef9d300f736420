//! sqlscript: render and check mapper statements
//!
//! # Usage
//!
//! ```bash
//! # Render a statement with parameters
//! sqlscript render mappers/users.xml findActive --json '{"name": "ann"}'
//!
//! # Compile every statement of one or more mappers
//! sqlscript check mappers/*.xml
//!
//! # Show the compiled node tree
//! sqlscript explain mappers/users.xml findActive
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlscript::ast::{SqlNode, TextSegment};
use sqlscript::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlscript")]
#[command(version)]
#[command(about = "Dynamic SQL templates: render, check, explain", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlscript render users.xml findActive --json '{\"name\": \"ann\"}'
    sqlscript render users.xml updateUser --params user.json --format json
    sqlscript check mappers/*.xml")]
struct Cli {
    /// Configuration file (defaults to ./sqlscript.toml)
    #[arg(short, long, global = true, env = "SQLSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Database id used to select statement variants
    #[arg(long, global = true)]
    database_id: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one statement into SQL and bind parameters
    Render {
        /// Mapper document
        mapper: PathBuf,
        /// Statement id, short or qualified
        statement: String,
        /// JSON file holding the parameter object
        #[arg(short, long, conflicts_with = "json")]
        params: Option<PathBuf>,
        /// Inline JSON parameter object
        #[arg(short, long)]
        json: Option<String>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Compile every statement of the given mappers
    Check {
        #[arg(required = true)]
        mappers: Vec<PathBuf>,
    },
    /// Show the compiled form of a statement
    Explain { mapper: PathBuf, statement: String },
    /// Show the tag reference
    Tags,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Render {
            mapper,
            statement,
            params,
            json,
            format,
        } => render(&cli, mapper, statement, params.as_deref(), json.as_deref(), *format),
        Commands::Check { mappers } => check(&cli, mappers),
        Commands::Explain { mapper, statement } => explain(&cli, mapper, statement),
        Commands::Tags => {
            show_tags();
            Ok(true)
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sqlscript=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SQLSCRIPT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ScriptConfig> {
    let mut config = match &cli.config {
        Some(path) => ScriptConfig::load(path)?,
        None => ScriptConfig::discover()?,
    };
    if let Some(id) = &cli.database_id {
        config.database_id = Some(id.clone());
    }
    Ok(config)
}

fn load_catalog(cli: &Cli, mappers: &[&Path]) -> Result<Catalog> {
    let config = load_config(cli)?;
    let mut catalog = Catalog::new(&config)?;
    for path in mappers {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let count = catalog
            .add_mapper(&text)
            .with_context(|| format!("loading {}", path.display()))?;
        if cli.verbose {
            println!("{} {} ({} statements)", "Loaded".dimmed(), path.display(), count);
        }
    }
    Ok(catalog)
}

fn parameter_object(params: Option<&Path>, json: Option<&str>) -> Result<Value> {
    let text = match (params, json) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, Some(json)) => json.to_string(),
        (None, None) => return Ok(Value::Null),
    };
    let parsed: serde_json::Value = serde_json::from_str(&text).context("parameter JSON")?;
    Ok(Value::from(parsed))
}

fn render(
    cli: &Cli,
    mapper: &Path,
    statement: &str,
    params: Option<&Path>,
    json: Option<&str>,
    format: OutputFormat,
) -> Result<bool> {
    let catalog = load_catalog(cli, &[mapper])?;
    let parameter = parameter_object(params, json)?;
    let bound = catalog.bound_sql(statement, &parameter)?;
    let values = catalog.engine().bind_values(&bound, &parameter)?;

    match format {
        OutputFormat::Json => {
            let parameters: Vec<serde_json::Value> = bound
                .parameter_mappings
                .iter()
                .zip(&values)
                .map(|(mapping, value)| {
                    serde_json::json!({
                        "property": mapping.property,
                        "type": mapping.value_type.to_string(),
                        "jdbcType": mapping.jdbc_type.map(|j| j.to_string()),
                        "mode": mapping.mode.to_string(),
                        "typeHandler": mapping.type_handler,
                        "value": serde_json::Value::from(value),
                    })
                })
                .collect();
            let out = serde_json::json!({ "sql": bound.sql, "parameters": parameters });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("{}", "SQL:".green().bold());
            println!("  {}", sqlscript::shrink_whitespace(&bound.sql).white());
            println!();
            if bound.parameter_mappings.is_empty() {
                println!("{}", "(no parameters)".dimmed());
                return Ok(true);
            }
            let rows: Vec<[String; 6]> = bound
                .parameter_mappings
                .iter()
                .zip(&values)
                .enumerate()
                .map(|(i, (mapping, value))| {
                    [
                        (i + 1).to_string(),
                        mapping.property.clone(),
                        mapping.value_type.to_string(),
                        mapping.jdbc_type.map(|j| j.to_string()).unwrap_or_default(),
                        mapping.type_handler.clone().unwrap_or_else(|| "-".to_string()),
                        value.to_string(),
                    ]
                })
                .collect();
            print_table(["#", "property", "type", "jdbc", "handler", "value"], &rows);
        }
    }
    Ok(true)
}

fn print_table<const N: usize>(header: [&str; N], rows: &[[String; N]]) {
    let mut widths = header.map(str::len);
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let head: Vec<String> = header
        .iter()
        .zip(widths)
        .map(|(h, w)| format!("{:width$}", h, width = w))
        .collect();
    println!("{}", head.join(" │ ").white().bold());

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{:width$}", c, width = w))
            .collect();
        println!("{}", cells.join(" │ "));
    }
}

fn check(cli: &Cli, mappers: &[PathBuf]) -> Result<bool> {
    let paths: Vec<&Path> = mappers.iter().map(PathBuf::as_path).collect();
    let catalog = load_catalog(cli, &paths)?;
    let failures = catalog.compile_all();

    for (id, err) in &failures {
        println!("{} {}: {}", "✗".red(), id.white(), err);
    }
    let ok = catalog.len() - failures.len();
    println!(
        "{} {} of {} statement(s) compiled",
        if failures.is_empty() { "✓".green() } else { "✗".red() },
        ok.to_string().cyan(),
        catalog.len()
    );
    Ok(failures.is_empty())
}

fn explain(cli: &Cli, mapper: &Path, statement: &str) -> Result<bool> {
    let catalog = load_catalog(cli, &[mapper])?;
    let mapped = catalog.statement(statement)?;
    let source = catalog.source(statement)?;

    println!("{} {}", "Statement:".dimmed(), mapped.id.cyan().bold());
    println!("  {} {}", "Kind:".dimmed(), mapped.kind);
    println!("  {} {}", "Parameter type:".dimmed(), mapped.parameter_type);
    if let Some(id) = &mapped.database_id {
        println!("  {} {}", "Database:".dimmed(), id);
    }
    if let Some(key) = &mapped.select_key {
        println!(
            "  {} {} ({})",
            "Select key:".dimmed(),
            key.statement_id,
            if key.before { "before" } else { "after" }
        );
    }
    println!();

    match source.as_ref() {
        SqlSource::Static(sql) => {
            println!("{}", "Static SQL:".green().bold());
            println!("  {}", sql.sql.trim().white());
            for mapping in &sql.parameter_mappings {
                println!(
                    "    • {} {}",
                    mapping.property.white(),
                    mapping.value_type.to_string().dimmed()
                );
            }
        }
        SqlSource::Dynamic { root, .. } => {
            println!("{}", "Dynamic tree:".green().bold());
            print_node(root, 1);
        }
    }
    Ok(true)
}

fn print_node(node: &SqlNode, depth: usize) {
    let pad = "  ".repeat(depth);
    match node {
        SqlNode::Sequence(children) => {
            for child in children {
                print_node(child, depth);
            }
        }
        SqlNode::StaticText(text) => {
            let text = sqlscript::shrink_whitespace(text);
            if !text.is_empty() {
                println!("{}{}", pad, text.white());
            }
        }
        SqlNode::DynamicText(template) => {
            let exprs: Vec<String> = template
                .segments
                .iter()
                .filter_map(|s| match s {
                    TextSegment::Expr(e) => Some(e.to_string()),
                    TextSegment::Literal(_) => None,
                })
                .collect();
            println!(
                "{}{} {}",
                pad,
                sqlscript::shrink_whitespace(&template.source).white(),
                format!("[${{}}: {}]", exprs.join(", ")).yellow()
            );
        }
        SqlNode::If(n) => {
            println!("{}{} {}", pad, "if".cyan(), n.test.to_string().yellow());
            print_node(&n.contents, depth + 1);
        }
        SqlNode::Choose(n) => {
            println!("{}{}", pad, "choose".cyan());
            for when in &n.whens {
                println!("{}  {} {}", pad, "when".cyan(), when.test.to_string().yellow());
                print_node(&when.contents, depth + 2);
            }
            if let Some(otherwise) = &n.otherwise {
                println!("{}  {}", pad, "otherwise".cyan());
                print_node(otherwise, depth + 2);
            }
        }
        SqlNode::Trim(n) | SqlNode::Where(n) | SqlNode::Set(n) => {
            println!(
                "{}{} prefix={:?} suffix={:?} overrides={:?}/{:?}",
                pad,
                node.tag().unwrap_or("trim").cyan(),
                n.prefix.as_deref().unwrap_or(""),
                n.suffix.as_deref().unwrap_or(""),
                n.prefix_overrides,
                n.suffix_overrides
            );
            print_node(&n.contents, depth + 1);
        }
        SqlNode::Foreach(n) => {
            println!(
                "{}{} {} item={} index={} separator={:?}",
                pad,
                "foreach".cyan(),
                n.collection.to_string().yellow(),
                n.item.as_deref().unwrap_or("-"),
                n.index.as_deref().unwrap_or("-"),
                n.separator.as_deref().unwrap_or("")
            );
            print_node(&n.contents, depth + 1);
        }
        SqlNode::Bind(n) => {
            println!("{}{} {} = {}", pad, "bind".cyan(), n.name, n.value.to_string().yellow());
        }
    }
}

fn show_tags() {
    println!("{}", "sqlscript Tag Reference".cyan().bold());
    println!();

    let tags = [
        ("<if>", "test", "Body when test is truthy"),
        ("<choose>", "", "First <when> whose test holds, else <otherwise>"),
        ("<when>", "test", "Branch of <choose>"),
        ("<otherwise>", "", "Fallback branch of <choose>"),
        ("<trim>", "prefix suffix prefixOverrides suffixOverrides", "Strip and wrap body"),
        ("<where>", "", "WHERE, leading AND/OR removed"),
        ("<set>", "", "SET, trailing comma removed"),
        ("<foreach>", "collection item index open close separator", "Repeat body per element"),
        ("<bind>", "name value", "Bind an expression result"),
        ("<include>", "refid", "Splice a <sql> fragment (mapper files)"),
        ("${expr}", "", "Text substitution"),
        ("#{prop,...}", "javaType jdbcType mode numericScale typeHandler", "Bind marker"),
    ];

    println!(
        "{:14} {:50} {}",
        "Tag".white().bold(),
        "Attributes".white().bold(),
        "Effect".white().bold()
    );
    println!("{}", "─".repeat(100).dimmed());

    for (tag, attributes, effect) in tags {
        println!("{:14} {:50} {}", tag.cyan().bold(), attributes.yellow(), effect.white());
    }
}

