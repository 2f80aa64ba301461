//! Record-level entry point: one metadata record in, one
//! [`TermLineageResult`] out.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::context::{LineageContext, DEFAULT_TYPE_NAME};
use crate::resolve::{LineageResolver, PlaceholderValues};
use crate::rows::{flatten, ClassificationInfo, TermLineageResult};
use crate::zone::ZoneOrder;

/// Record key holding classification blocks. Never read as an attribute.
const CLASSIFICATIONS_KEY: &str = "classifications";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record for term {term} is not a JSON object (found {found})")]
    NotAMapping { term: String, found: &'static str },
    #[error("classification {index} of term {term} is not a JSON object")]
    InvalidClassification { term: String, index: usize },
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stateless between records; one engine can serve a whole batch.
#[derive(Debug, Clone, Default)]
pub struct LineageEngine {
    resolver: LineageResolver,
}

impl LineageEngine {
    pub fn new(order: Arc<ZoneOrder>, placeholders: PlaceholderValues) -> Self {
        Self {
            resolver: LineageResolver::new(order, placeholders),
        }
    }

    pub fn resolver(&self) -> &LineageResolver {
        &self.resolver
    }

    pub fn process_record(&self, term: &str, record: &Value) -> Result<TermLineageResult, RecordError> {
        let Value::Object(entity) = record else {
            return Err(RecordError::NotAMapping {
                term: term.to_string(),
                found: kind_of(record),
            });
        };

        match entity.get(CLASSIFICATIONS_KEY) {
            Some(Value::Array(items)) if !items.is_empty() => {
                debug!("Processing {} with {} classifications", term, items.len());
                let classifications = self.classifications(term, items)?;
                let rows = classifications
                    .iter()
                    .flat_map(|c| flatten(term, &c.nombre, &c.relations))
                    .collect();
                Ok(TermLineageResult::resolved(term, rows, classifications))
            }
            _ => {
                debug!("Processing {} from top-level attributes", term);
                let attrs: Map<String, Value> = entity
                    .iter()
                    .filter(|(key, _)| key.as_str() != CLASSIFICATIONS_KEY)
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                let ctx = LineageContext::from_attributes(DEFAULT_TYPE_NAME, &attrs);
                let lineage = self.resolver.resolve(&ctx);
                let rows = flatten(term, "", &lineage);
                Ok(TermLineageResult::resolved(term, rows, Vec::new()))
            }
        }
    }

    fn classifications(&self, term: &str, items: &[Value]) -> Result<Vec<ClassificationInfo>, RecordError> {
        let empty = Map::new();
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let Value::Object(classification) = item else {
                    return Err(RecordError::InvalidClassification {
                        term: term.to_string(),
                        index,
                    });
                };
                let type_name = ["typeName", "type"]
                    .iter()
                    .filter_map(|key| classification.get(*key).and_then(Value::as_str))
                    .find(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_TYPE_NAME);
                let attrs = match classification.get("attributes") {
                    Some(Value::Object(attrs)) => attrs,
                    _ => &empty,
                };
                let ctx = LineageContext::from_attributes(type_name, attrs);
                let relations = self.resolver.resolve(&ctx);
                Ok(ClassificationInfo {
                    nombre: ctx.type_name.clone(),
                    tipo: ctx.type_name,
                    attrs: ctx.attrs,
                    relations,
                })
            })
            .collect()
    }
}
