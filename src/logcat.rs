//! Post-run log triage: which terms hit which known warning or error.

use itertools::Itertools;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Processing term \d+/\d+: ([\w\[\]\(\)\.\$\{\}-]+)").expect("term regex")
});
static LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(WARN|ERROR)\b\s+(.+)$").expect("level regex"));

pub const UNKNOWN_TERM: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    NoLoadedRows,
    SourceWithoutDestination,
    ErrorParsingSql,
    TermNotFound,
    ErrorLoadingTerm,
}

/// Message fragments, checked in order.
const CATEGORY_FRAGMENTS: &[(&str, LogCategory)] = &[
    ("No loaded rows", LogCategory::NoLoadedRows),
    (
        "detected in a source but not used in any relation",
        LogCategory::SourceWithoutDestination,
    ),
    ("failed for statement", LogCategory::ErrorParsingSql),
    ("Term not found", LogCategory::TermNotFound),
    ("Error loading term", LogCategory::ErrorLoadingTerm),
];

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::NoLoadedRows => "NO_LOADED_ROWS",
            LogCategory::SourceWithoutDestination => "SOURCE_WITHOUT_DESTINATION",
            LogCategory::ErrorParsingSql => "ERROR_PARSING_SQL",
            LogCategory::TermNotFound => "TERM_NOT_FOUND",
            LogCategory::ErrorLoadingTerm => "ERROR_LOADING_TERM",
        }
    }

    pub fn for_message(message: &str) -> Option<Self> {
        CATEGORY_FRAGMENTS
            .iter()
            .find(|(fragment, _)| message.contains(fragment))
            .map(|(_, category)| *category)
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CategorizedTerm {
    #[serde(rename = "Atlas Term")]
    pub term: String,
    #[serde(rename = "Category")]
    pub category: LogCategory,
}

/// Scans a run log and returns the distinct `(term, category)` pairs in the
/// order they first appear.
pub fn categorize_log(text: &str) -> Vec<CategorizedTerm> {
    let mut current = UNKNOWN_TERM.to_string();
    let mut found = Vec::new();
    for line in text.lines().map(str::trim) {
        if let Some(caps) = TERM_RE.captures(line) {
            current = caps[1].to_string();
            continue;
        }
        let Some(caps) = LEVEL_RE.captures(line) else {
            continue;
        };
        if let Some(category) = LogCategory::for_message(&caps[2]) {
            found.push(CategorizedTerm {
                term: current.clone(),
                category,
            });
        }
    }
    found.into_iter().unique().collect()
}
