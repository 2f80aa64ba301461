use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::rows::LineageRow;
use crate::zone::Zone;

#[derive(Queryable, Selectable, Serialize, Debug)]
#[diesel(table_name = crate::schema::term_lineage)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TermLineage {
    pub id: i32,
    pub atlas_term: String,
    pub clasificacion: String,
    pub origen: Option<String>,
    pub origen_zona: Option<String>,
    pub destino: Option<String>,
    pub destino_zona: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, PartialEq, Eq)]
#[diesel(table_name = crate::schema::term_lineage)]
pub struct NewTermLineage {
    pub atlas_term: String,
    pub clasificacion: String,
    pub origen: Option<String>,
    pub origen_zona: Option<String>,
    pub destino: Option<String>,
    pub destino_zona: Option<String>,
}

impl From<&LineageRow> for NewTermLineage {
    fn from(row: &LineageRow) -> Self {
        Self {
            atlas_term: row.atlas_term.clone(),
            clasificacion: row.clasificacion.clone(),
            origen: row.origen.clone(),
            origen_zona: row.origen_zona.as_ref().map(Zone::to_string),
            destino: row.destino.clone(),
            destino_zona: row.destino_zona.as_ref().map(Zone::to_string),
        }
    }
}
