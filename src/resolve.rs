//! Turns a [`LineageContext`] into directed source -> destination relations
//! across the zone hierarchy.

use itertools::Itertools;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::LineageContext;
use crate::extract::extract_tables;
use crate::zone::{canonicalize_table_pair, infer_from_table_name, Zone, ZoneOrder};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    pub zone: Option<Zone>,
}

impl Table {
    pub fn new(name: impl Into<String>, zone: Option<Zone>) -> Self {
        Self {
            name: name.into(),
            zone,
        }
    }

    /// Canonical table for a raw reference and an optional zone hint.
    pub fn canonical(raw: &str, hint: Option<&Zone>) -> Self {
        let (zone, name) = canonicalize_table_pair(raw, hint);
        Self { name, zone }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.zone {
            Some(zone) => match self.name.split('.').collect::<Vec<_>>().as_slice() {
                [_, table] => write!(f, "{zone}.{table}"),
                _ => write!(f, "{zone}.{}", self.name),
            },
            None => f.write_str(&self.name),
        }
    }
}

/// One directed edge group. `destination` holds a single table in practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageRelation {
    pub sources: Vec<Table>,
    pub destination: Vec<Table>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineageResult {
    pub relations: Vec<LineageRelation>,
}

impl LineageResult {
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Known values for the `$ENTIDAD` and `$SUBENTORNO` placeholders that
/// appear in table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderValues {
    pub entidades: Vec<String>,
    pub subentornos: Vec<String>,
}

impl Default for PlaceholderValues {
    fn default() -> Self {
        Self {
            entidades: ["bsc", "bsj", "ber", "bsf"].map(String::from).to_vec(),
            subentornos: ["pr", "de"].map(String::from).to_vec(),
        }
    }
}

fn strip_schema(name: &str) -> &str {
    name.split_once('.').map_or(name, |(_, table)| table)
}

fn alternation(values: &[String]) -> String {
    format!("({})", values.iter().map(|v| regex::escape(v)).join("|"))
}

impl PlaceholderValues {
    fn pattern_for(&self, name: &str) -> Option<Regex> {
        let escaped = regex::escape(&strip_schema(name).to_lowercase())
            .replace(r"\$entidad", &alternation(&self.entidades))
            .replace(r"\$subentorno", &alternation(&self.subentornos));
        Regex::new(&format!("(?i)^{escaped}$")).ok()
    }

    /// Name equality with the schema stripped, where a placeholder on either
    /// side stands for any of its known values.
    pub fn tables_equal(&self, a: &str, b: &str) -> bool {
        let matches = |pattern: &str, other: &str| {
            self.pattern_for(pattern)
                .is_some_and(|re| re.is_match(strip_schema(other)))
        };
        matches(a, b) || matches(b, a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverrideKind {
    PreDelete,
    PostUpdate,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideKind::PreDelete => f.write_str("pre"),
            OverrideKind::PostUpdate => f.write_str("post"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Source(usize),
    Destination(usize),
}

/// Canonical tables gathered from a context, before zone ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTables {
    pub sources: Vec<Table>,
    pub destinations: Vec<Table>,
    pub hbase_sources: Vec<Table>,
    pub hbase_destinations: Vec<Table>,
}

impl ResolvedTables {
    fn table(&self, slot: Slot) -> &Table {
        match slot {
            Slot::Source(i) => &self.sources[i],
            Slot::Destination(i) => &self.destinations[i],
        }
    }

    fn table_mut(&mut self, slot: Slot) -> &mut Table {
        match slot {
            Slot::Source(i) => &mut self.sources[i],
            Slot::Destination(i) => &mut self.destinations[i],
        }
    }

    fn consumo_slots(&self) -> Vec<Slot> {
        let is_consumo = |t: &Table| t.zone == Some(Zone::Consumo);
        let sources = self
            .sources
            .iter()
            .positions(is_consumo)
            .map(Slot::Source);
        let destinations = self
            .destinations
            .iter()
            .positions(is_consumo)
            .map(Slot::Destination);
        sources.chain(destinations).collect()
    }

    fn log_counts(&self) {
        let by_zone = |tables: &[Table]| {
            tables
                .iter()
                .counts_by(|t| t.zone.as_ref().map_or("None", Zone::as_str).to_string())
        };
        debug!(
            "Sources by zone: {:?}. Total sources: {}",
            by_zone(&self.sources),
            self.sources.len()
        );
        debug!(
            "Destinations by zone: {:?}. Total destinations: {}",
            by_zone(&self.destinations),
            self.destinations.len()
        );
    }
}

/// Matches sources to destinations using the injected zone order.
#[derive(Debug, Clone)]
pub struct LineageResolver {
    order: Arc<ZoneOrder>,
    placeholders: PlaceholderValues,
}

impl Default for LineageResolver {
    fn default() -> Self {
        Self::new(Arc::new(ZoneOrder::default()), PlaceholderValues::default())
    }
}

impl LineageResolver {
    pub fn new(order: Arc<ZoneOrder>, placeholders: PlaceholderValues) -> Self {
        Self {
            order,
            placeholders,
        }
    }

    pub fn order(&self) -> &ZoneOrder {
        &self.order
    }

    /// Runs every bucket of the context through extraction and
    /// canonicalization, then applies the pre/post query overrides.
    pub fn collect(&self, ctx: &LineageContext) -> ResolvedTables {
        let mut tables = ResolvedTables::default();

        for (sql, hint) in &ctx.sql_queries {
            let extracted = extract_tables(sql);
            for source in &extracted.sources {
                let zone = infer_from_table_name(source).or_else(|| hint.clone());
                let table = Table::canonical(source, zone.as_ref());
                debug!(
                    "Extracted from SQL: source={}, zone={:?}, default_zone={:?}",
                    source, table.zone, hint
                );
                tables.sources.push(table);
            }
            if let Some(dest) = &extracted.destination {
                let zone = infer_from_table_name(dest).or_else(|| hint.clone());
                tables.destinations.push(Table::canonical(dest, zone.as_ref()));
            }
        }

        for (sql, _) in &ctx.hbase_queries {
            for source in extract_tables(sql).sources {
                tables
                    .hbase_sources
                    .push(Table::canonical(&source, Some(&Zone::HBase)));
            }
        }
        for (dest, hint) in &ctx.hbase_dsts {
            tables
                .hbase_destinations
                .push(Table::canonical(dest, hint.as_ref()));
        }

        for (raw, hint) in &ctx.explicit_src {
            let table = Table::canonical(raw, hint.as_ref());
            debug!("Added explicit source: {:?}", table);
            tables.sources.push(table);
        }
        for (raw, hint) in &ctx.explicit_dst {
            let table = Table::canonical(raw, hint.as_ref());
            debug!("Added explicit destination: {:?}", table);
            tables.destinations.push(table);
        }

        self.apply_overrides(ctx, &mut tables);
        tables.log_counts();
        tables
    }

    fn apply_overrides(&self, ctx: &LineageContext, tables: &mut ResolvedTables) {
        let consumo = tables.consumo_slots();
        let overrides = ctx
            .pre_delete
            .iter()
            .map(|o| (o, OverrideKind::PreDelete))
            .chain(ctx.post_update.iter().map(|o| (o, OverrideKind::PostUpdate)));

        for ((name, zone), kind) in overrides {
            let hit = consumo
                .iter()
                .copied()
                .find(|slot| self.placeholders.tables_equal(name, &tables.table(*slot).name));
            match (hit, kind) {
                (Some(slot), _) => {
                    let table = tables.table_mut(slot);
                    debug!(
                        "Overriding zone for table {} to {:?} based on {}-query.",
                        table.name, zone, kind
                    );
                    if zone.is_some() {
                        table.zone = zone.clone();
                    }
                    if !name.is_empty() {
                        table.name = name.clone();
                    }
                }
                (None, OverrideKind::PostUpdate) => {
                    debug!(
                        "Adding new destination table {} with zone {:?} from post-update.",
                        name, zone
                    );
                    tables.destinations.push(Table::new(name.clone(), zone.clone()));
                }
                (None, OverrideKind::PreDelete) => {
                    warn!("No tables found matching pre-delete table {} to override zone.", name);
                }
            }
        }
    }

    /// Ranked sources grouped by zone position. Sources without a ranked
    /// zone are reported and left out.
    pub fn sources_by_zone(&self, sources: &[Table]) -> BTreeMap<usize, Vec<Table>> {
        let mut by_zone: BTreeMap<usize, Vec<Table>> = BTreeMap::new();
        for table in sources {
            match self.order.rank(table.zone.as_ref()) {
                Some(idx) => by_zone.entry(idx).or_default().push(table.clone()),
                None => warn!(
                    "Source table {} has unknown zone '{}', skipping.",
                    table.name,
                    table.zone.as_ref().map_or("None", Zone::as_str)
                ),
            }
        }
        debug!(
            "Sources grouped by zone index count: {:?}",
            by_zone.iter().map(|(k, v)| (k, v.len())).collect::<BTreeMap<_, _>>()
        );
        by_zone
    }

    /// Pairs each destination with the sources of the nearest occupied lower
    /// zone, plus same-zone sources where allowed.
    pub fn order_tables(&self, sources: &[Table], destinations: &[Table]) -> Vec<LineageRelation> {
        if sources.iter().any(|t| t.name.eq_ignore_ascii_case("flowfile")) {
            warn!("Flowfile found as a source. This is not supported.");
        }

        let by_zone = self.sources_by_zone(sources);
        let datamart_idx = self.order.index_of(&Zone::Datamart);
        let landing_idx = self.order.index_of(&Zone::Landing);

        let dest_zones: HashSet<&Zone> = destinations.iter().filter_map(|d| d.zone.as_ref()).collect();
        let allow_same_zone = destinations.len() == 1 || dest_zones.len() == 1;

        let mut relations = Vec::new();
        for dest in destinations {
            let Some(dest_idx) = self.order.rank(dest.zone.as_ref()) else {
                warn!(
                    "Destination table {} has unknown zone '{}', skipping.",
                    dest.name,
                    dest.zone.as_ref().map_or("None", Zone::as_str)
                );
                continue;
            };
            let is_datamart = Some(dest_idx) == datamart_idx;
            let same_zone = by_zone.get(&dest_idx);

            let mut matched: Vec<Table> = Vec::new();
            if is_datamart {
                matched.extend(same_zone.into_iter().flatten().cloned());
            }
            if let Some((_, lower)) = by_zone.range(..dest_idx).next_back() {
                matched.extend(lower.iter().cloned());
            }
            // Datamart already took its own zone above
            if allow_same_zone && !is_datamart && Some(dest_idx) != landing_idx {
                matched.extend(same_zone.into_iter().flatten().cloned());
            }

            if matched.is_empty() {
                debug!("No sources matched destination {}", dest);
                continue;
            }
            relations.push(LineageRelation {
                sources: matched,
                destination: vec![dest.clone()],
            });
        }

        let used: BTreeSet<&Zone> = relations
            .iter()
            .flat_map(|r| &r.sources)
            .filter_map(|t| t.zone.as_ref())
            .collect();
        let seen: BTreeSet<&Zone> = sources.iter().filter_map(|t| t.zone.as_ref()).collect();
        for zone in seen.difference(&used) {
            warn!("Zone {} detected in a source but not used in any relation", zone);
        }

        relations
    }

    /// Full resolution of one context. HBase tables are ordered on their own
    /// and their relations follow the main ones.
    pub fn resolve(&self, ctx: &LineageContext) -> LineageResult {
        debug!("Resolving lineage for {}", ctx.type_name);
        let tables = self.collect(ctx);
        let mut relations = self.order_tables(&tables.sources, &tables.destinations);
        relations.extend(self.order_tables(&tables.hbase_sources, &tables.hbase_destinations));
        debug!(
            "Resolved lineage relations: {}",
            relations
                .iter()
                .map(|r| format!(
                    "[{}] -> [{}]",
                    r.sources.iter().join(", "),
                    r.destination.iter().join(", ")
                ))
                .join("; ")
        );
        LineageResult { relations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t(name: &str, zone: Zone) -> Table {
        Table::new(name, Some(zone))
    }

    fn ctx() -> LineageContext {
        LineageContext::new("Clasificacion", serde_json::Map::new())
    }

    #[test]
    fn test_table_display() {
        assert_eq!(t("clientes", Zone::Raw).to_string(), "Raw.clientes");
        assert_eq!(t("riesgo.scores", Zone::Datamart).to_string(), "Datamart.scores");
        assert_eq!(Table::new("suelta", None).to_string(), "suelta");
        assert_eq!(t("/in/a.b.csv", Zone::Landing).to_string(), "Landing./in/a.b.csv");
    }

    #[test]
    fn test_tables_equal_with_placeholders() {
        let values = PlaceholderValues::default();
        assert!(values.tables_equal("4con.clientes", "clientes"));
        assert!(values.tables_equal("$entidad_saldos_$subentorno", "x.bsj_saldos_pr"));
        assert!(values.tables_equal("BSC_SALDOS_DE", "$ENTIDAD_saldos_$SUBENTORNO"));
        assert!(!values.tables_equal("$entidad_saldos", "xyz_saldos"));
        assert!(!values.tables_equal("clientes", "clientes_hist"));
    }

    #[test]
    fn test_end_to_end_sql_query() {
        let mut ctx = ctx();
        ctx.sql_queries.push((
            "INSERT INTO 4con.resumen SELECT * FROM 1raw.eventos".to_string(),
            None,
        ));
        let result = LineageResolver::default().resolve(&ctx);
        assert_eq!(
            result.relations,
            vec![LineageRelation {
                sources: vec![t("eventos", Zone::Raw)],
                destination: vec![t("resumen", Zone::Consumo)],
            }]
        );
    }

    #[test]
    fn test_source_without_destination_is_kept_but_unpaired() {
        let mut ctx = ctx();
        ctx.explicit_src
            .push(("/data/landing/in.csv".to_string(), Some(Zone::Landing)));
        let resolver = LineageResolver::default();
        let tables = resolver.collect(&ctx);
        assert!(resolver.resolve(&ctx).is_empty());

        let by_zone = resolver.sources_by_zone(&tables.sources);
        let landing = resolver.order().index_of(&Zone::Landing).unwrap();
        assert_eq!(
            by_zone.get(&landing),
            Some(&vec![t("/data/landing/in.csv", Zone::Landing)])
        );
    }

    #[test]
    fn test_pre_delete_overrides_consumo_zone() {
        let mut ctx = ctx();
        ctx.explicit_src
            .push(("clientes".to_string(), Some(Zone::Consumo)));
        ctx.pre_delete.push(("clientes".to_string(), Some(Zone::Raw)));
        let resolver = LineageResolver::default();
        let tables = resolver.collect(&ctx);
        assert_eq!(tables.sources, vec![t("clientes", Zone::Raw)]);

        let by_zone = resolver.sources_by_zone(&tables.sources);
        let consumo = resolver.order().index_of(&Zone::Consumo).unwrap();
        assert!(by_zone.get(&consumo).is_none());
    }

    #[test]
    fn test_unmatched_overrides() {
        let mut ctx = ctx();
        ctx.explicit_src.push(("1raw.a".to_string(), None));
        ctx.pre_delete.push(("fantasma".to_string(), Some(Zone::Raw)));
        ctx.post_update
            .push(("riesgo.scores".to_string(), Some(Zone::Datamart)));
        let tables = LineageResolver::default().collect(&ctx);
        assert_eq!(tables.sources, vec![t("a", Zone::Raw)]);
        assert_eq!(tables.destinations, vec![t("riesgo.scores", Zone::Datamart)]);
    }

    #[test]
    fn test_unranked_destination_yields_nothing() {
        let resolver = LineageResolver::default();
        let sources = vec![t("a", Zone::Raw)];
        assert!(resolver
            .order_tables(&sources, &[Table::new("b", None)])
            .is_empty());
        assert!(resolver
            .order_tables(&sources, &[t("b", Zone::Sftp)])
            .is_empty());
    }

    #[test]
    fn test_nearest_lower_zone_only() {
        let resolver = LineageResolver::default();
        let sources = vec![
            t("a", Zone::Landing),
            t("b", Zone::Raw),
            t("c", Zone::Raw),
        ];
        let relations = resolver.order_tables(&sources, &[t("d", Zone::Refinado)]);
        assert_eq!(
            relations,
            vec![LineageRelation {
                sources: vec![t("b", Zone::Raw), t("c", Zone::Raw)],
                destination: vec![t("d", Zone::Refinado)],
            }]
        );
    }

    #[test]
    fn test_same_zone_fallback() {
        let resolver = LineageResolver::default();
        let sources = vec![t("a", Zone::Curado)];

        // single destination: same zone allowed
        let relations = resolver.order_tables(&sources, &[t("b", Zone::Curado)]);
        assert_eq!(relations.len(), 1);

        // destinations across zones: no same-zone fallback
        let relations =
            resolver.order_tables(&sources, &[t("b", Zone::Curado), t("c", Zone::Refinado)]);
        assert_eq!(
            relations,
            vec![LineageRelation {
                sources: vec![t("a", Zone::Curado)],
                destination: vec![t("c", Zone::Refinado)],
            }]
        );

        // Landing never pairs with itself
        let landing = vec![t("/in/x.csv", Zone::Landing)];
        assert!(resolver
            .order_tables(&landing, &[t("/in/x.csv", Zone::Landing)])
            .is_empty());
    }

    #[test]
    fn test_datamart_takes_own_zone_and_nearest_lower() {
        let resolver = LineageResolver::default();
        let sources = vec![
            t("ventas.base", Zone::Datamart),
            t("saldos", Zone::Consumo),
            t("eventos", Zone::Raw),
        ];
        let relations = resolver.order_tables(
            &sources,
            &[t("ventas.resumen", Zone::Datamart), t("x", Zone::Refinado)],
        );
        assert_eq!(
            relations,
            vec![
                LineageRelation {
                    sources: vec![t("ventas.base", Zone::Datamart), t("saldos", Zone::Consumo)],
                    destination: vec![t("ventas.resumen", Zone::Datamart)],
                },
                LineageRelation {
                    sources: vec![t("eventos", Zone::Raw)],
                    destination: vec![t("x", Zone::Refinado)],
                },
            ]
        );
    }

    #[test]
    fn test_hbase_relations_follow_main_ones() {
        let mut ctx = ctx();
        ctx.sql_queries.push((
            "INSERT INTO 3ref.clientes SELECT * FROM 2cur.clientes".to_string(),
            None,
        ));
        ctx.hbase_queries
            .push(("SELECT * FROM 3ref.clientes".to_string(), None));
        ctx.hbase_dsts
            .push(("clientes_hb".to_string(), Some(Zone::Refinado)));
        let result = LineageResolver::default().resolve(&ctx);
        assert_eq!(
            result.relations,
            vec![
                LineageRelation {
                    sources: vec![t("clientes", Zone::Curado)],
                    destination: vec![t("clientes", Zone::Refinado)],
                },
                LineageRelation {
                    sources: vec![t("clientes", Zone::Refinado)],
                    destination: vec![t("clientes_hb", Zone::Refinado)],
                },
            ]
        );
    }
}
