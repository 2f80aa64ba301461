//! Data-lake zones and the token rules that map schema and table names onto them.
//!
//! Everything here is pure: no I/O, case-insensitive matching, and every rule
//! table is plain data so it can be tested on its own.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Origen,
    Landing,
    Raw,
    Curado,
    Refinado,
    Consumo,
    Datamart,
    /// Self-describing datamart schema (`datamart_<suffix>` or `data_analytics`).
    /// Ranked at the Datamart position.
    DatamartAlias(String),
    Sftp,
    HBase,
}

impl Zone {
    pub fn as_str(&self) -> &str {
        match self {
            Zone::Origen => "Origen",
            Zone::Landing => "Landing",
            Zone::Raw => "Raw",
            Zone::Curado => "Curado",
            Zone::Refinado => "Refinado",
            Zone::Consumo => "Consumo",
            Zone::Datamart => "Datamart",
            Zone::DatamartAlias(name) => name,
            Zone::Sftp => "SFTP",
            Zone::HBase => "HBase",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Zone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Frozen processing order of the ranked zones plus its derived index.
///
/// Built once and shared (behind an `Arc`) by everything that needs to
/// compare zones.
#[derive(Debug, Clone)]
pub struct ZoneOrder {
    zones: Vec<Zone>,
    index: HashMap<Zone, usize>,
}

impl ZoneOrder {
    pub fn new(zones: Vec<Zone>) -> Self {
        let index = zones
            .iter()
            .enumerate()
            .map(|(i, z)| (z.clone(), i))
            .collect();
        Self { zones, index }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Position of `zone` in the order, `None` when the zone is unranked.
    /// Datamart aliases share the Datamart position.
    pub fn index_of(&self, zone: &Zone) -> Option<usize> {
        match zone {
            Zone::DatamartAlias(_) => self.index.get(&Zone::Datamart).copied(),
            other => self.index.get(other).copied(),
        }
    }

    /// Same as [`ZoneOrder::index_of`] for an optional zone.
    pub fn rank(&self, zone: Option<&Zone>) -> Option<usize> {
        zone.and_then(|z| self.index_of(z))
    }
}

impl Default for ZoneOrder {
    fn default() -> Self {
        Self::new(vec![
            Zone::Origen,
            Zone::Landing,
            Zone::Raw,
            Zone::Curado,
            Zone::Refinado,
            Zone::Consumo,
            Zone::Datamart,
        ])
    }
}

/// Exact token table. Every abbreviation in use across the lake maps here.
pub const ZONE_TOKENS: &[(&str, Zone)] = &[
    ("origen", Zone::Origen),
    ("landing", Zone::Landing),
    ("land", Zone::Landing),
    ("lnd", Zone::Landing),
    ("1land", Zone::Landing),
    ("file", Zone::Landing),
    ("archivo", Zone::Landing),
    ("path", Zone::Landing),
    ("directorio", Zone::Landing),
    ("carpeta", Zone::Landing),
    ("folder", Zone::Landing),
    ("raw", Zone::Raw),
    ("1raw", Zone::Raw),
    ("cur", Zone::Curado),
    ("2cur", Zone::Curado),
    ("curado", Zone::Curado),
    ("ref", Zone::Refinado),
    ("3ref", Zone::Refinado),
    ("refinado", Zone::Refinado),
    ("con", Zone::Consumo),
    ("4con", Zone::Consumo),
    ("consumo", Zone::Consumo),
    ("kudu", Zone::Consumo),
    ("insertkudu", Zone::Consumo),
    ("dm", Zone::Datamart),
    ("mart", Zone::Datamart),
    ("datamart", Zone::Datamart),
    ("sftp", Zone::Sftp),
    ("ftp", Zone::Sftp),
    ("hbase", Zone::HBase),
];

/// Tokens whose presence in an attribute key marks a file drop.
pub fn landing_tokens() -> impl Iterator<Item = &'static str> {
    ZONE_TOKENS
        .iter()
        .filter(|(_, zone)| *zone == Zone::Landing)
        .map(|(token, _)| *token)
}

fn word_rule(alternation: &str) -> Regex {
    Regex::new(&format!(r"(^|[^a-z0-9])({alternation})($|[^a-z0-9])"))
        .expect("zone word rule must compile")
}

static DATAMART_WORD_RE: LazyLock<Regex> = LazyLock::new(|| word_rule("datamart_[a-z0-9_]+"));

/// Free-text rules, checked in order after the substring overrides.
static TEXT_RULES: LazyLock<Vec<(Regex, Zone)>> = LazyLock::new(|| {
    vec![
        (word_rule("raw|1raw"), Zone::Raw),
        (word_rule("ref|refinado|3ref"), Zone::Refinado),
        (word_rule("cur|curado|2cur"), Zone::Curado),
        (word_rule("land|lnd|landing|1land|archivo"), Zone::Landing),
        (word_rule("con|consumo|4con"), Zone::Consumo),
        (word_rule("dm|mart|datamart"), Zone::Datamart),
        (
            word_rule("archivo|file|path|directorio|carpeta|folder"),
            Zone::Landing,
        ),
    ]
});

const KNOWN_ZONE_PREFIX: &str = "1land|2cur|3ref|4con|1raw|raw|ref|cur|dm|mart|datamart(?:_[a-z0-9_]+)?|data_analytics|kudu|insertkudu|landing|lnd|land|con|consumo";

static PLACEHOLDER_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:\$|var_|\$\{?)[a-z0-9]+\}?_)+").expect("placeholder regex")
});
static DATAMART_SCHEMA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|_)datamart_([a-z0-9_]+)$").expect("datamart schema regex")
});
static ZONE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)_({KNOWN_ZONE_PREFIX})$")).expect("zone suffix regex")
});

/// Exact token lookup. Unknown tokens return `None`.
pub fn normalize_token(token: &str) -> Option<Zone> {
    let t = token.trim().to_lowercase();
    if t.is_empty() {
        return None;
    }
    if let Some((_, zone)) = ZONE_TOKENS.iter().find(|(tok, _)| *tok == t) {
        return Some(zone.clone());
    }
    if t.starts_with("datamart_") || t == "data_analytics" {
        return Some(Zone::DatamartAlias(t));
    }
    None
}

/// Guess a zone from free text such as an attribute key or a table name.
pub fn infer_from_text(s: &str) -> Option<Zone> {
    let txt = s.to_lowercase();
    if txt.trim().is_empty() {
        return None;
    }

    if txt.contains("kudu") {
        return Some(Zone::Consumo);
    }
    if txt.contains("data_analytics") {
        return Some(Zone::DatamartAlias("data_analytics".to_string()));
    }
    if txt.contains("ftp") {
        return Some(Zone::Sftp);
    }
    if txt.contains("archivo") {
        return Some(Zone::Landing);
    }

    if let Some(caps) = DATAMART_WORD_RE.captures(&txt) {
        return Some(Zone::DatamartAlias(caps[2].to_string()));
    }
    TEXT_RULES
        .iter()
        .find(|(re, _)| re.is_match(&txt))
        .map(|(_, zone)| zone.clone())
}

/// Strips quoting and any trailing alias word from a raw table token.
pub fn clean_table_name(raw: &str) -> String {
    let first = raw.split_whitespace().next().unwrap_or("");
    let name = first.replace(['`', '[', ']'], "");
    strip_double_quotes(&name).to_string()
}

fn strip_double_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Schema-first inference: the schema part wins when it carries a hint.
pub fn infer_from_table_name(table: &str) -> Option<Zone> {
    let cleaned = clean_table_name(table).to_lowercase();
    if let Some((schema, _)) = cleaned.split_once('.') {
        if let Some(zone) = infer_from_text(schema) {
            return Some(zone);
        }
    }
    infer_from_text(&cleaned)
}

/// Resolves `(zone, canonical_name)` for a raw table reference.
///
/// Precedence: datamart schema suffix, then a `_<zone>` schema suffix, then a
/// schema that is itself a zone token, then free-text inference.
pub fn canonicalize_table_pair(raw_table: &str, zone_hint: Option<&Zone>) -> (Option<Zone>, String) {
    let trimmed = raw_table.trim().replace(['`', '[', ']'], "");
    let s = strip_double_quotes(&trimmed).to_lowercase();
    if s.is_empty() {
        return (None, String::new());
    }

    let Some((left, right)) = s.split_once('.') else {
        return (zone_hint.cloned(), s);
    };

    let resolve_zone = |token: &str| {
        normalize_token(token)
            .or_else(|| zone_hint.cloned())
            .or_else(|| infer_from_text(token))
    };

    let stripped = PLACEHOLDER_PREFIX_RE.replace(left, "");
    let clean_left = if stripped.is_empty() { left } else { stripped.as_ref() };

    if let Some(caps) = DATAMART_SCHEMA_RE.captures(clean_left) {
        return (Some(Zone::Datamart), format!("{}.{}", &caps[1], right));
    }
    if clean_left == "data_analytics" {
        return (Some(Zone::Datamart), format!("analytics.{right}"));
    }

    if let Some(caps) = ZONE_SUFFIX_RE.captures(left) {
        return (resolve_zone(&caps[1]), format!("{clean_left}.{right}"));
    }

    if normalize_token(left).is_some() {
        return (resolve_zone(left), right.to_string());
    }

    let zone = resolve_zone(left).or_else(|| zone_hint.cloned());
    (zone, format!("{left}.{right}"))
}
