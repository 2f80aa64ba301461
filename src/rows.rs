use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::resolve::{LineageResult, Table};
use crate::zone::Zone;

/// Flat lineage row, the unit handed to exporters and loaders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageRow {
    pub atlas_term: String,
    pub clasificacion: String,
    pub origen: Option<String>,
    pub origen_zona: Option<Zone>,
    pub destino: Option<String>,
    pub destino_zona: Option<Zone>,
}

/// Row shape written to the CSV plan: zones re-prefixed onto names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub atlas_term: String,
    pub clasificacion: String,
    pub origen: String,
    pub destino: String,
}

fn zoned(name: &Option<String>, zone: &Option<Zone>) -> String {
    match (name, zone) {
        (Some(name), Some(zone)) => format!("{zone}.{name}"),
        (Some(name), None) => name.clone(),
        (None, _) => String::new(),
    }
}

impl From<&LineageRow> for ExportRow {
    fn from(row: &LineageRow) -> Self {
        Self {
            atlas_term: row.atlas_term.clone(),
            clasificacion: row.clasificacion.clone(),
            origen: zoned(&row.origen, &row.origen_zona),
            destino: zoned(&row.destino, &row.destino_zona),
        }
    }
}

/// Datamart tables keep their schema and file paths are kept whole.
/// Everything else is reduced to the last dotted part.
pub fn bare_name(table: &Table) -> String {
    let is_path = table.name.contains(['/', '\\']);
    if table.zone == Some(Zone::Datamart) || is_path {
        return table.name.clone();
    }
    table
        .name
        .rsplit('.')
        .next()
        .unwrap_or(&table.name)
        .to_string()
}

/// Cross product of each relation's sources and destinations. An empty
/// side contributes a single `None`.
pub fn flatten(term: &str, clasificacion: &str, lineage: &LineageResult) -> Vec<LineageRow> {
    let mut rows = Vec::new();
    for relation in &lineage.relations {
        let sources: Vec<Option<&Table>> = if relation.sources.is_empty() {
            vec![None]
        } else {
            relation.sources.iter().map(Some).collect()
        };
        let destinations: Vec<Option<&Table>> = if relation.destination.is_empty() {
            vec![None]
        } else {
            relation.destination.iter().map(Some).collect()
        };
        for src in &sources {
            for dst in &destinations {
                rows.push(LineageRow {
                    atlas_term: term.to_string(),
                    clasificacion: clasificacion.to_string(),
                    origen: src.map(bare_name),
                    origen_zona: src.and_then(|t| t.zone.clone()),
                    destino: dst.map(bare_name),
                    destino_zona: dst.and_then(|t| t.zone.clone()),
                });
            }
        }
    }
    rows
}

/// One classification block and what it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationInfo {
    pub nombre: String,
    pub tipo: String,
    pub attrs: Map<String, Value>,
    pub relations: LineageResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TermStatus {
    Ok,
    Empty,
    Failed,
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TermStatus::Ok => "ok",
            TermStatus::Empty => "empty",
            TermStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final outcome for one input record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermLineageResult {
    pub term: String,
    pub status: TermStatus,
    pub rows: Vec<LineageRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<ClassificationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TermLineageResult {
    /// `ok` when any row was produced, `empty` otherwise.
    pub fn resolved(
        term: impl Into<String>,
        rows: Vec<LineageRow>,
        classifications: Vec<ClassificationInfo>,
    ) -> Self {
        let status = if rows.is_empty() {
            TermStatus::Empty
        } else {
            TermStatus::Ok
        };
        Self {
            term: term.into(),
            status,
            rows,
            classifications,
            error: None,
        }
    }

    pub fn failed(term: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            term: term.into(),
            status: TermStatus::Failed,
            rows: Vec::new(),
            classifications: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.rows.iter().map(ExportRow::from).collect()
    }
}
