//! Source and destination tables of a single SQL statement.
//!
//! The sanitized text goes through a ranked list of parse strategies (dialect
//! x strictness). The first strategy that yields a statement wins; when none
//! does, a regex scan over `FROM`/`JOIN`/`INTO` takes over.

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{
    Ident, ObjectName, ObjectNamePart, Query, SetExpr, Statement, TableObject, Visit, Visitor,
};
use sqlparser::dialect::{DatabricksDialect, Dialect, GenericDialect, HiveDialect, MsSqlDialect};
use sqlparser::parser::{Parser, ParserOptions};
use sqlparser::tokenizer::Token;
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::sanitize::{restore, sanitize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedTables {
    pub sources: BTreeSet<String>,
    pub destination: Option<String>,
}

impl ExtractedTables {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.destination.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Hive,
    Spark,
    TSql,
    Generic,
}

impl SqlDialect {
    pub const RANKED: [SqlDialect; 4] = [
        SqlDialect::Hive,
        SqlDialect::Spark,
        SqlDialect::TSql,
        SqlDialect::Generic,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SqlDialect::Hive => "Hive",
            SqlDialect::Spark => "Spark",
            SqlDialect::TSql => "TSQL",
            SqlDialect::Generic => "Generic",
        }
    }

    fn dialect(self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Hive => Box::new(HiveDialect {}),
            SqlDialect::Spark => Box::new(DatabricksDialect {}),
            SqlDialect::TSql => Box::new(MsSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Any parse error disqualifies the dialect.
    Strict,
    /// Statements that fail are skipped up to the next `;`; the first one
    /// that parses is kept.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseStrategy {
    pub dialect: SqlDialect,
    pub mode: ParseMode,
}

impl ParseStrategy {
    pub fn parse(&self, sql: &str) -> Result<Statement> {
        let dialect = self.dialect.dialect();
        match self.mode {
            ParseMode::Strict => parse_strict(dialect.as_ref(), sql),
            ParseMode::Lenient => parse_lenient(dialect.as_ref(), sql),
        }
    }
}

/// Every dialect in strict mode, then every dialect again in lenient mode.
pub fn ranked_strategies() -> impl Iterator<Item = ParseStrategy> {
    [ParseMode::Strict, ParseMode::Lenient]
        .into_iter()
        .flat_map(|mode| {
            SqlDialect::RANKED
                .into_iter()
                .map(move |dialect| ParseStrategy { dialect, mode })
        })
}

/// Tries each strategy in order. On success returns the winning strategy and
/// its statement, otherwise every strategy that was attempted.
pub fn try_each<I>(sql: &str, strategies: I) -> Result<(ParseStrategy, Statement), Vec<ParseStrategy>>
where
    I: IntoIterator<Item = ParseStrategy>,
{
    let mut attempted = Vec::new();
    for strategy in strategies {
        match strategy.parse(sql) {
            Ok(statement) => return Ok((strategy, statement)),
            Err(e) => {
                debug!(
                    "Dialect {} ({:?}) failed: {}",
                    strategy.dialect.label(),
                    strategy.mode,
                    e
                );
                attempted.push(strategy);
            }
        }
    }
    Err(attempted)
}

fn parse_strict(dialect: &dyn Dialect, sql: &str) -> Result<Statement> {
    let statements = Parser::parse_sql(dialect, sql).map_err(|e| anyhow!(e.to_string()))?;
    statements
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no statement found"))
}

fn parse_lenient(dialect: &dyn Dialect, sql: &str) -> Result<Statement> {
    let options = ParserOptions::new().with_trailing_commas(true);
    let mut parser = Parser::new(dialect)
        .with_options(options)
        .try_with_sql(sql)
        .map_err(|e| anyhow!(e.to_string()))?;

    let mut last_error: Option<String> = None;
    loop {
        while parser.consume_token(&Token::SemiColon) {}
        if parser.peek_token().token == Token::EOF {
            break;
        }
        match parser.parse_statement() {
            Ok(statement) => return Ok(statement),
            Err(e) => {
                last_error = Some(e.to_string());
                loop {
                    let token = parser.next_token().token;
                    if token == Token::SemiColon || token == Token::EOF {
                        break;
                    }
                }
            }
        }
    }
    bail!(last_error.unwrap_or_else(|| "no statement found".to_string()))
}

/// Extracts `(sources, destination)` from one SQL text. Never fails: parse
/// problems degrade to the regex scan, and then to an empty result.
pub fn extract_tables(sql: &str) -> ExtractedTables {
    if sql.trim().is_empty() {
        return ExtractedTables::default();
    }
    let clean = sanitize(sql);
    if clean.trim_matches(|c: char| c.is_whitespace() || c == ';').is_empty() {
        return ExtractedTables::default();
    }

    match try_each(&clean, ranked_strategies()) {
        Ok((strategy, statement)) => {
            debug!(
                "Parsed statement with dialect {} ({:?})",
                strategy.dialect.label(),
                strategy.mode
            );
            let tables = tables_from_statement(&statement);
            debug!(
                "SQL extraction - sources: {:?}, destination: {:?}",
                tables.sources, tables.destination
            );
            tables
        }
        Err(attempted) => {
            let labels = attempted
                .iter()
                .map(|s| s.dialect.label())
                .unique()
                .join(", ");
            warn!(
                "All SQL dialects ({}) failed for statement (first 500 chars): {}",
                labels,
                clean.chars().take(500).collect::<String>()
            );
            let tables = extract_via_regex(&clean);
            if tables.is_empty() {
                warn!("Regex fallback found no tables either; statement contributes nothing");
            }
            tables
        }
    }
}

/// Collects every table reference and every CTE alias declared anywhere in
/// the tree.
#[derive(Debug, Default)]
struct TableRefCollector {
    ctes: HashSet<String>,
    relations: Vec<ObjectName>,
}

impl Visitor for TableRefCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(ident_to_string(&cte.alias.name).to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.relations.push(relation.clone());
        ControlFlow::Continue(())
    }
}

fn tables_from_statement(statement: &Statement) -> ExtractedTables {
    let mut collector = TableRefCollector::default();
    let _ = statement.visit(&mut collector);

    let destination = write_target(statement, &collector.relations);
    let mut sources = BTreeSet::new();

    for relation in &collector.relations {
        let (schema, name) = match split_object_name(relation) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Skipping table reference {}: {}", relation, e);
                continue;
            }
        };
        // a bare reference to a CTE is not a table; a qualified one is
        if schema.is_none() && collector.ctes.contains(&name.to_lowercase()) {
            continue;
        }
        let full_name = normalize_reference(&join_name(schema.as_deref(), &name));
        if destination.as_deref() == Some(full_name.as_str()) {
            continue;
        }
        if full_name.chars().count() > 1 {
            sources.insert(full_name);
        }
    }

    ExtractedTables {
        sources,
        destination,
    }
}

/// INSERT / UPDATE target, schema-qualified and restored.
///
/// `relations` is the visit order of the statement; an UPDATE visits its
/// target table first.
fn write_target(statement: &Statement, relations: &[ObjectName]) -> Option<String> {
    let name = match statement {
        Statement::Insert(insert) => match &insert.table {
            TableObject::TableName(name) => name,
            TableObject::TableFunction(_) => return None,
        },
        Statement::Update { .. } => relations.first()?,
        Statement::Query(query) => {
            return match query.body.as_ref() {
                SetExpr::Insert(inner) => write_target(inner, &[]),
                _ => None,
            }
        }
        _ => return None,
    };
    let (schema, table) = split_object_name(name).ok()?;
    Some(normalize_reference(&join_name(schema.as_deref(), &table)))
}

fn ident_to_string(ident: &Ident) -> String {
    ident.value.clone()
}

fn object_name_parts(name: &ObjectName) -> Result<Vec<String>> {
    let mut parts: Vec<String> = Vec::with_capacity(name.0.len());
    for part in &name.0 {
        match part {
            ObjectNamePart::Identifier(ident) => parts.push(ident_to_string(ident)),
            ObjectNamePart::Function(_) => bail!("Unsupported function in object name: {}", name),
        }
    }
    Ok(parts)
}

/// `(schema, table)`; catalog parts beyond the schema are dropped.
fn split_object_name(name: &ObjectName) -> Result<(Option<String>, String)> {
    let mut parts = object_name_parts(name)?;
    let table = parts
        .pop()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("Empty object name"))?;
    Ok((parts.pop(), table))
}

fn join_name(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{schema}.{table}"),
        None => table.to_string(),
    }
}

fn normalize_reference(name: &str) -> String {
    restore(name).to_lowercase().replace(['"', '`', '\''], "")
}

static CTE_DEFINITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\w+)\s+AS\s*\(").expect("cte regex"));
static FROM_JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([a-zA-Z0-9_."`]+)"#).expect("from/join regex")
});
static INSERT_INTO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:INSERT\s+INTO|UPDATE|TABLE|INTO)\s+([a-zA-Z0-9_."`]+)"#)
        .expect("insert regex")
});

/// Last-resort scan used when no parse strategy produced a statement.
pub fn extract_via_regex(sql: &str) -> ExtractedTables {
    let ctes: HashSet<String> = CTE_DEFINITION_RE
        .captures_iter(sql)
        .map(|c| c[1].to_lowercase())
        .filter(|c| !c.contains('.'))
        .collect();

    let destination = INSERT_INTO_RE
        .captures(sql)
        .map(|c| normalize_reference(&c[1]));

    let sources = FROM_JOIN_RE
        .captures_iter(sql)
        .map(|c| normalize_reference(&c[1]))
        .filter(|s| {
            let has_schema = s.contains('.');
            let is_cte = ctes.contains(s);
            (has_schema || !is_cte)
                && destination.as_deref() != Some(s.as_str())
                && s.chars().count() > 1
        })
        .collect();

    ExtractedTables {
        sources,
        destination,
    }
}
