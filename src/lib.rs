//! Table-level lineage for data-lake metadata records.
//!
//! A record's attributes are bucketed into lineage hints ([`context`]), the
//! SQL they carry is sanitized and parsed ([`sanitize`], [`extract`]), every
//! table is placed in a lake zone ([`zone`]) and sources are matched to
//! destinations along the zone order ([`resolve`]). The result is flattened
//! into [`LineageRow`]s ([`rows`]).

pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod extract;
pub mod logcat;
pub mod logging;
pub mod models;
pub mod resolve;
pub mod rows;
pub mod sanitize;
pub mod schema;
pub mod zone;

pub use context::{collect_tables, LineageContext};
pub use engine::{LineageEngine, RecordError};
pub use extract::{extract_tables, ExtractedTables};
pub use logcat::{categorize_log, CategorizedTerm, LogCategory};
pub use resolve::{LineageRelation, LineageResolver, LineageResult, PlaceholderValues, Table};
pub use rows::{flatten, ClassificationInfo, ExportRow, LineageRow, TermLineageResult, TermStatus};
pub use sanitize::{restore, sanitize};
pub use zone::{canonicalize_table_pair, Zone, ZoneOrder};

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn export(result: &TermLineageResult) -> Vec<(String, String)> {
        result
            .export_rows()
            .into_iter()
            .map(|r| (r.origen, r.destino))
            .collect()
    }

    #[test]
    fn test_kudu_upsert_redirected_to_datamart_by_pre_delete() -> Result<()> {
        let record = json!({
            "classifications": [{
                "typeName": "Carga Kudu",
                "attributes": {
                    "Query Insertar Kudu": "UPSERT INTO ${ENTIDAD}_4con.$ENTIDAD_saldos_$SUBENTORNO SELECT * FROM 3ref.saldos",
                    "pre-query": "DELETE FROM ${AMB}_datamart_riesgo.bsc_saldos_pr WHERE fecha = '${FECHA}'"
                }
            }]
        });
        let result = LineageEngine::default().process_record("saldos_kudu", &record)?;
        assert_eq!(result.status, TermStatus::Ok);
        assert_eq!(
            export(&result),
            vec![(
                "Refinado.saldos".to_string(),
                "Datamart.riesgo.bsc_saldos_pr".to_string()
            )]
        );
        assert_eq!(result.rows[0].clasificacion, "Carga Kudu");
        Ok(())
    }

    #[test]
    fn test_multi_zone_ingestion_record() -> Result<()> {
        let record = json!({
            "Landing Archivo": "/sftp/in/movimientos.csv",
            "ING Tabla Raw": "1raw.movimientos",
            "ING Query Cur": "INSERT INTO 2cur.movimientos SELECT * FROM 1raw.movimientos WHERE fecha >= '${FECHA}'",
            "ING Query Ref": [
                "INSERT OVERWRITE TABLE 3ref.movimientos PARTITION (dt) SELECT m.* FROM 2cur.movimientos m",
                "-- comentario"
            ]
        });
        let result = LineageEngine::default().process_record("movimientos", &record)?;
        assert_eq!(
            export(&result),
            vec![
                ("Raw.movimientos".to_string(), "Curado.movimientos".to_string()),
                ("Curado.movimientos".to_string(), "Refinado.movimientos".to_string()),
                ("Landing./sftp/in/movimientos.csv".to_string(), "Raw.movimientos".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_every_statement_in_a_query_list_contributes() -> Result<()> {
        let record = json!({
            "ING Query Ref": [
                "INSERT INTO 3ref.a SELECT * FROM 2cur.a",
                "INSERT INTO 3ref.b SELECT * FROM 2cur.b"
            ]
        });
        let result = LineageEngine::default().process_record("t", &record)?;
        let pairs = export(&result);
        for expected in [("Curado.a", "Refinado.a"), ("Curado.b", "Refinado.b")] {
            assert!(
                pairs
                    .iter()
                    .any(|(o, d)| (o.as_str(), d.as_str()) == expected),
                "missing {expected:?} in {pairs:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_canonical_pairs_are_stable() {
        let (zone, name) = canonicalize_table_pair("3ref.customers", None);
        assert_eq!((zone.clone(), name.as_str()), (Some(Zone::Refinado), "customers"));
        let again = canonicalize_table_pair(&format!("{}.{}", Zone::Refinado, name), None);
        assert_eq!(again, (zone, name));
    }
}
