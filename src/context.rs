//! Buckets a record's key/value attributes into typed lineage hints.
//!
//! Each attribute goes through [`ATTRIBUTE_RULES`] in order and is handled by
//! the first rule that matches. The order encodes real precedence.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::extract::extract_tables;
use crate::zone::{
    canonicalize_table_pair, infer_from_table_name, infer_from_text, landing_tokens,
    normalize_token, Zone,
};

/// A raw value together with the zone it is believed to belong to.
pub type Hinted = (String, Option<Zone>);

pub const DEFAULT_TYPE_NAME: &str = "Clasificacion";

/// Accumulator for one record or one classification block. Lists only grow
/// while attributes are read; resolution reads them and never writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageContext {
    pub type_name: String,
    pub attrs: Map<String, Value>,
    pub explicit_src: Vec<Hinted>,
    pub explicit_dst: Vec<Hinted>,
    pub sql_queries: Vec<Hinted>,
    pub pre_delete: Vec<Hinted>,
    pub post_update: Vec<Hinted>,
    pub hbase_queries: Vec<Hinted>,
    pub hbase_dsts: Vec<Hinted>,
}

impl LineageContext {
    pub fn new(type_name: impl Into<String>, attrs: Map<String, Value>) -> Self {
        Self {
            type_name: type_name.into(),
            attrs,
            ..Self::default()
        }
    }

    /// Builds the context by classifying every attribute in presentation order.
    pub fn from_attributes(type_name: impl Into<String>, attrs: &Map<String, Value>) -> Self {
        let mut ctx = Self::new(type_name, attrs.clone());
        for (key, value) in attrs {
            ctx.add_attribute(key, value);
        }
        ctx
    }

    /// Classifies one key/value pair into at most one bucket.
    pub fn add_attribute(&mut self, key: &str, value: &Value) {
        let Some(attr) = Attribute::new(key, value) else {
            debug!("Skipping empty attribute {:?}", key);
            return;
        };
        match ATTRIBUTE_RULES.iter().find(|rule| (rule.matches)(&attr)) {
            Some(rule) => {
                debug!("Processing {} from key: {}", rule.name, attr.key);
                (rule.apply)(&attr, self);
            }
            None => debug!("No rule for key: {}", attr.key),
        }
    }
}

/// Text form of an attribute value. Lists are joined line by line.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => value.to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join("\n"),
    }
}

/// Per-item texts of a value: one entry per non-blank list item, or the
/// whole value's text.
pub fn value_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|text| !text.trim().is_empty())
            .collect(),
        _ => {
            let text = value_text(value);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}

/// One attribute as the rules see it.
pub struct Attribute<'a> {
    /// Lower-cased, trimmed key.
    pub key: String,
    pub value: &'a Value,
    pub text: String,
}

impl<'a> Attribute<'a> {
    fn new(key: &str, value: &'a Value) -> Option<Self> {
        let key = key.trim().to_lowercase();
        let text = value_text(value);
        if key.is_empty() || text.is_empty() {
            return None;
        }
        Some(Self { key, value, text })
    }
}

pub struct AttributeRule {
    pub name: &'static str,
    pub matches: fn(&Attribute) -> bool,
    pub apply: fn(&Attribute, &mut LineageContext),
}

static ING_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*ing[_ ]tabla[_ ]([a-z0-9_]+)\s*:?\s*$").expect("ing tabla regex")
});
static ING_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*ing[_ ]query[_ ]([a-z0-9_]+)\s*:?\s*$").expect("ing query regex")
});
static INSERT_QUERY_KEYS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)query.*insert(ar)?").expect("insert query regex"),
        Regex::new(r"(?i)insertkudu.*query").expect("insertkudu regex"),
    ]
});
static DESTINATION_KEYS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)tabla[_ ].*destino").expect("destino regex"),
        Regex::new(r"(?i)(^|[_ ])destino([_ ]|$)").expect("destino word regex"),
    ]
});
static SOURCE_KEYS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![Regex::new(r"(?i)tabla[_ ].*origen").expect("origen regex")]);
static SQL_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(select|from|join|insert)\b").expect("sql value regex"));
static SQL_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(select|insert|update|from|join)\b").expect("sql item regex")
});
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(",
        r"(/[^/\x00]+)+/?",
        r"|(\\\\[^\\/\x00]+\\[^\\/\x00]+(?:\\[^\\/\x00]+)*)",
        r"|(\.{1,2}[\\/].+|[^\\/\x00]+([\\/][^\\/\x00]+)+)",
        r")$"
    ))
    .expect("path regex")
});
static LIST_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\n;]+").expect("split regex"));
static ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+as\s+").expect("alias regex"));
static DATAMART_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\$\{?[a-z0-9_]+\}?_)*(datamart_[a-z0-9_]+)\.([a-z0-9_]+)")
        .expect("datamart reference regex")
});

pub fn looks_like_sql(text: &str) -> bool {
    SQL_VALUE_RE.is_match(text)
}

pub fn looks_like_path(text: &str) -> bool {
    PATH_RE.is_match(text)
}

/// Table names held by an attribute value: SQL items are parsed, anything
/// else is read as a `,`/`;`/newline separated list of names.
pub fn collect_tables(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut tables = Vec::new();
    for item in items {
        let text = value_text(item);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if SQL_ITEM_RE.is_match(text) {
            let extracted = extract_tables(text);
            tables.extend(extracted.sources);
            tables.extend(extracted.destination);
            continue;
        }
        for piece in LIST_SPLIT_RE.split(text) {
            let piece = piece.trim().replace(['`', '"'], "");
            let piece = ALIAS_RE.split(&piece).next().unwrap_or("");
            let name = piece.split(' ').next().unwrap_or("");
            if !name.is_empty() {
                tables.push(name.to_lowercase());
            }
        }
    }
    debug!("Tables found: {:?}", tables);
    tables
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatamartCapture {
    WholeMatch,
    TableOnly,
}

/// Pre/post queries: every table the statement touches, zoned by its own name.
fn override_tables(sql: &str, capture: DatamartCapture) -> Vec<Hinted> {
    let mut tables: Vec<String> = extract_tables(sql).sources.into_iter().collect();
    if tables.is_empty() {
        tables = DATAMART_REF_RE
            .captures_iter(sql)
            .map(|caps| match capture {
                DatamartCapture::WholeMatch => caps[0].to_string(),
                DatamartCapture::TableOnly => caps[2].to_string(),
            })
            .collect();
    }
    tables
        .iter()
        .filter_map(|t| {
            let (zone, name) = canonicalize_table_pair(t, infer_from_table_name(t).as_ref());
            (!name.is_empty()).then_some((name, zone))
        })
        .collect()
}

fn has_landing_token(key: &str) -> bool {
    landing_tokens().any(|token| key.contains(token))
}

fn zone_from_token(token: &str) -> Option<Zone> {
    normalize_token(token).or_else(|| infer_from_text(token))
}

/// Attribute rules in priority order. The first match wins.
pub static ATTRIBUTE_RULES: &[AttributeRule] = &[
    AttributeRule {
        name: "pre-query DELETE",
        matches: |a| a.key.contains("pre-query") && a.text.to_lowercase().contains("delete"),
        apply: |a, ctx| {
            for item in value_items(a.value) {
                ctx.pre_delete
                    .extend(override_tables(&item, DatamartCapture::WholeMatch));
            }
        },
    },
    AttributeRule {
        name: "post-query UPDATE",
        matches: |a| a.key.contains("post-query") && a.text.to_lowercase().contains("update"),
        apply: |a, ctx| {
            for item in value_items(a.value) {
                ctx.post_update
                    .extend(override_tables(&item, DatamartCapture::TableOnly));
            }
        },
    },
    AttributeRule {
        name: "HBase table",
        matches: |a| a.key.contains("inserthbase") && a.key.contains("tabla"),
        apply: |a, ctx| ctx.hbase_dsts.push((a.text.clone(), Some(Zone::Refinado))),
    },
    AttributeRule {
        name: "HBase query",
        matches: |a| a.key.contains("inserthbase") && a.key.contains("query"),
        apply: |a, ctx| {
            for query in value_items(a.value) {
                ctx.hbase_queries.push((query, None));
            }
        },
    },
    AttributeRule {
        name: "origin query",
        matches: |a| a.key.contains("origen") && a.key.contains("query"),
        apply: |a, ctx| {
            for query in value_items(a.value) {
                ctx.sql_queries.push((query, Some(Zone::Origen)));
            }
        },
    },
    AttributeRule {
        name: "landing file",
        matches: |a| has_landing_token(&a.key) && !a.key.contains("encoding"),
        apply: |a, ctx| {
            ctx.explicit_src.push((a.text.clone(), Some(Zone::Landing)));
            ctx.explicit_dst.push((a.text.clone(), Some(Zone::Landing)));
        },
    },
    AttributeRule {
        name: "ING table",
        matches: |a| ING_TABLE_RE.is_match(&a.key),
        apply: |a, ctx| {
            let zone = ING_TABLE_RE
                .captures(&a.key)
                .and_then(|caps| zone_from_token(&caps[1]));
            for table in collect_tables(a.value) {
                let (_, name) = canonicalize_table_pair(&table, zone.as_ref());
                if !name.is_empty() {
                    ctx.explicit_dst.push((name, zone.clone()));
                }
            }
        },
    },
    AttributeRule {
        name: "ING query",
        matches: |a| ING_QUERY_RE.is_match(&a.key),
        apply: |a, ctx| {
            let zone = ING_QUERY_RE
                .captures(&a.key)
                .and_then(|caps| zone_from_token(&caps[1]));
            for query in value_items(a.value) {
                ctx.sql_queries.push((query, zone.clone()));
            }
        },
    },
    AttributeRule {
        name: "INSERT query",
        matches: |a| INSERT_QUERY_KEYS.iter().any(|re| re.is_match(&a.key)),
        apply: |a, ctx| {
            let zone = infer_from_text(&a.key);
            for query in value_items(a.value) {
                ctx.sql_queries.push((query, zone.clone()));
            }
        },
    },
    AttributeRule {
        name: "destination",
        matches: |a| DESTINATION_KEYS.iter().any(|re| re.is_match(&a.key)),
        apply: |a, ctx| {
            let zone = infer_from_text(&a.key);
            for table in collect_tables(a.value) {
                ctx.explicit_dst.push((table, zone.clone()));
            }
        },
    },
    AttributeRule {
        name: "source",
        matches: |a| SOURCE_KEYS.iter().any(|re| re.is_match(&a.key)),
        apply: |a, ctx| {
            let zone = infer_from_text(&a.key);
            for table in collect_tables(a.value) {
                ctx.explicit_src.push((table, zone.clone()));
            }
        },
    },
    AttributeRule {
        name: "INSERT SQL",
        matches: |a| looks_like_sql(&a.text),
        apply: |a, ctx| {
            for table in collect_tables(a.value) {
                let zone = infer_from_table_name(&table);
                ctx.explicit_src.push((table, zone));
            }
        },
    },
    AttributeRule {
        name: "PATH",
        matches: |a| looks_like_path(&a.text),
        apply: |a, ctx| {
            ctx.explicit_src.push((a.text.clone(), Some(Zone::Landing)));
            ctx.explicit_dst.push((a.text.clone(), Some(Zone::Landing)));
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn build(attrs: Value) -> LineageContext {
        let Value::Object(map) = attrs else {
            panic!("test attributes must be an object")
        };
        LineageContext::from_attributes(DEFAULT_TYPE_NAME, &map)
    }

    fn rule_for(key: &str, value: &Value) -> Option<&'static str> {
        let attr = Attribute::new(key, value)?;
        ATTRIBUTE_RULES
            .iter()
            .find(|rule| (rule.matches)(&attr))
            .map(|rule| rule.name)
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!(3)), "3");
        assert_eq!(value_text(&json!(["a", "b"])), "a\nb");
    }

    #[test]
    fn test_value_items_split_lists() {
        assert_eq!(value_items(&json!(["a", " ", "b"])), vec!["a", "b"]);
        assert_eq!(value_items(&json!("a\nb")), vec!["a\nb"]);
        assert!(value_items(&json!(null)).is_empty());
    }

    #[test]
    fn test_query_lists_keep_every_statement() {
        let ctx = build(json!({
            "ING Query Ref": [
                "INSERT INTO 3ref.a SELECT * FROM 2cur.a",
                "INSERT INTO 3ref.b SELECT * FROM 2cur.b"
            ],
            "inserthbase query": ["SELECT * FROM 3ref.a", "SELECT * FROM 3ref.b"],
        }));
        assert_eq!(
            ctx.sql_queries,
            vec![
                ("INSERT INTO 3ref.a SELECT * FROM 2cur.a".to_string(), Some(Zone::Refinado)),
                ("INSERT INTO 3ref.b SELECT * FROM 2cur.b".to_string(), Some(Zone::Refinado)),
            ]
        );
        assert_eq!(ctx.hbase_queries.len(), 2);
    }

    #[test]
    fn test_rule_precedence() {
        let sql = json!("INSERT INTO 3ref.t SELECT * FROM 1raw.s");
        assert_eq!(rule_for("Pre-Query", &json!("DELETE FROM 4con.t")), Some("pre-query DELETE"));
        // pre-query without a DELETE falls through to the SQL value rule
        assert_eq!(rule_for("pre-query", &json!("SELECT 1 FROM x")), Some("INSERT SQL"));
        assert_eq!(rule_for("post-query", &json!("UPDATE 4con.t SET a = 1")), Some("post-query UPDATE"));
        assert_eq!(rule_for("InsertHBase Tabla", &json!("clientes")), Some("HBase table"));
        assert_eq!(rule_for("insertHBase query", &sql), Some("HBase query"));
        assert_eq!(rule_for("query origen", &sql), Some("origin query"));
        assert_eq!(rule_for("Landing Archivo", &json!("/data/in.csv")), Some("landing file"));
        assert_eq!(rule_for("ing_tabla_landing", &json!("t")), Some("landing file"));
        assert_eq!(rule_for("ING Tabla 3REF", &json!("t")), Some("ING table"));
        assert_eq!(rule_for("ing_query_raw:", &sql), Some("ING query"));
        assert_eq!(rule_for("Query Insertar Kudu", &sql), Some("INSERT query"));
        assert_eq!(rule_for("tabla_cur_destino", &json!("t")), Some("destination"));
        assert_eq!(rule_for("destino", &json!("t")), Some("destination"));
        assert_eq!(rule_for("tabla_origen_raw", &json!("t")), Some("source"));
        assert_eq!(rule_for("sentencia", &sql), Some("INSERT SQL"));
        assert_eq!(rule_for("ruta", &json!("\\\\server\\share\\in")), Some("PATH"));
        assert_eq!(rule_for("descripcion", &json!("texto libre")), None);
        assert_eq!(rule_for("", &sql), None);
        assert_eq!(rule_for("destino", &json!("")), None);
    }

    #[test]
    fn test_landing_encoding_key_is_not_a_file() {
        // "file" is a landing token, but encoding keys carry no table
        let ctx = build(json!({ "file encoding": "UTF-8" }));
        assert!(ctx.explicit_src.is_empty());
        assert!(ctx.explicit_dst.is_empty());
    }

    #[test]
    fn test_sql_and_hbase_buckets() {
        let ctx = build(json!({
            "ING Query Raw": "INSERT INTO 1raw.t SELECT * FROM x.y",
            "origen query": "SELECT * FROM erp.clientes",
            "insertkudu query": "UPSERT INTO 4con.t SELECT * FROM 3ref.t",
            "inserthbase tabla": "clientes_hb",
            "inserthbase query": "SELECT * FROM 3ref.clientes",
        }));
        assert_eq!(
            ctx.sql_queries,
            vec![
                ("INSERT INTO 1raw.t SELECT * FROM x.y".to_string(), Some(Zone::Raw)),
                ("SELECT * FROM erp.clientes".to_string(), Some(Zone::Origen)),
                ("UPSERT INTO 4con.t SELECT * FROM 3ref.t".to_string(), Some(Zone::Consumo)),
            ]
        );
        assert_eq!(ctx.hbase_dsts, vec![("clientes_hb".to_string(), Some(Zone::Refinado))]);
        assert_eq!(
            ctx.hbase_queries,
            vec![("SELECT * FROM 3ref.clientes".to_string(), None)]
        );
    }

    #[test]
    fn test_ing_table_canonicalizes_names() {
        let ctx = build(json!({ "ING Tabla 3ref": "3ref.clientes, 3ref.cuentas c" }));
        assert_eq!(
            ctx.explicit_dst,
            vec![
                ("clientes".to_string(), Some(Zone::Refinado)),
                ("cuentas".to_string(), Some(Zone::Refinado)),
            ]
        );
    }

    #[test]
    fn test_explicit_source_and_destination_lists() {
        let ctx = build(json!({
            "tabla_origen_raw": ["1raw.a", "1raw.b AS alias"],
            "tabla destino cur": "`2cur`.\"resumen\"",
        }));
        assert_eq!(
            ctx.explicit_src,
            vec![
                ("1raw.a".to_string(), Some(Zone::Raw)),
                ("1raw.b".to_string(), Some(Zone::Raw)),
            ]
        );
        assert_eq!(ctx.explicit_dst, vec![("2cur.resumen".to_string(), Some(Zone::Curado))]);
    }

    #[test]
    fn test_sql_value_tables_become_sources() {
        let ctx = build(json!({ "sentencia": "INSERT INTO 4con.r SELECT * FROM 3ref.s" }));
        assert_eq!(
            ctx.explicit_src,
            vec![
                ("3ref.s".to_string(), Some(Zone::Refinado)),
                ("4con.r".to_string(), Some(Zone::Consumo)),
            ]
        );
    }

    #[test]
    fn test_pre_and_post_overrides() {
        let ctx = build(json!({
            "pre-query": "DELETE FROM 1raw.clientes WHERE fecha = '${FECHA}'",
            "post-query": "UPDATE 4con.saldos SET x = 1 WHERE id IN (SELECT id FROM 3ref.bajas)",
        }));
        assert_eq!(ctx.pre_delete, vec![("clientes".to_string(), Some(Zone::Raw))]);
        // the UPDATE target is the write side; only the tables it reads override
        assert_eq!(ctx.post_update, vec![("bajas".to_string(), Some(Zone::Refinado))]);
    }

    #[test]
    fn test_override_tables_through_placeholders() {
        let ctx = build(json!({
            "pre-query": "DELETE FROM ${ENT}_datamart_riesgo.scores WHERE 1 = 1",
        }));
        assert_eq!(
            ctx.pre_delete,
            vec![("riesgo.scores".to_string(), Some(Zone::Datamart))]
        );
    }

    #[test]
    fn test_paths_and_unmatched_values() {
        let ctx = build(json!({
            "salida": "./out/data.csv",
            "comentario": "sin tablas",
            "activo": true,
        }));
        assert_eq!(ctx.explicit_src, vec![("./out/data.csv".to_string(), Some(Zone::Landing))]);
        assert_eq!(ctx.explicit_dst, ctx.explicit_src);
        assert!(ctx.sql_queries.is_empty());
    }

    #[test]
    fn test_collect_tables_plain_lists() {
        assert_eq!(
            collect_tables(&json!("db.a; db.b\n`db`.c x, ")),
            vec!["db.a".to_string(), "db.b".to_string(), "db.c".to_string()]
        );
        assert!(collect_tables(&json!(null)).is_empty());
    }
}
