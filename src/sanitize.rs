//! Rewrites pipeline template expressions and vendor syntax into SQL that the
//! structured parser accepts.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Prefix given to every neutralized `${NAME}` / `$NAME` token.
pub const PLACEHOLDER_PREFIX: &str = "var_";

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));
static LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)--.*$").expect("line comment regex"));
// innermost template only, so nested expressions resolve inside-out
static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]+)\}").expect("template regex"));
static NON_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("non ident regex"));
static BRACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[{}]").expect("brace regex"));
static INSERT_STATEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$INSERT_STATEMENT").expect("insert statement regex"));
static UPSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUPSERT\s+INTO\b").expect("upsert regex"));
static SELECT_TOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+TOP\s+\d+\b").expect("select top regex"));
static PARTITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPARTITION\s*\([^)]*\)").expect("partition regex"));
static COMPUTE_STATS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOMPUTE\s+STATS\b[^;]*;?").expect("compute stats regex"));
static INVALIDATE_METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bINVALIDATE\s+METADATA\b[^;]*;?").expect("invalidate metadata regex")
});
static OPERATOR_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\b\w+(?:\.\w+)*)\s+(var_\w+)\s+(CAST\b|SELECT\b|\(|'|"|\d)"#)
        .expect("operator var regex")
});
static SPACED_GE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+=").expect("spaced ge regex"));
static SPACED_LE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s+=").expect("spaced le regex"));
static SPACED_NE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\s+=").expect("spaced ne regex"));

/// Words after which a `var_` token is an identifier, never an operator.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "from", "join", "into", "set", "update", "select", "insert", "on", "table", "by", "values",
    "inner", "outer", "left", "right", "cross", "full", "delete", "create", "alter", "drop",
    "where", "having", "group", "order", "limit", "union", "except", "intersect", "as", "merge",
    "upsert", "using", "and", "or", "not", "in", "between", "like", "is", "case", "when", "then",
    "else", "end",
];

/// `${ENTORNO:substring(0,2)}` becomes `var_ENTORNO`.
fn template_to_placeholder(caps: &Captures) -> String {
    let content = &caps[1];
    let name = content
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or("");
    format!("{PLACEHOLDER_PREFIX}{}", NON_IDENT_RE.replace_all(name, "_"))
}

fn replace_templates(sql: String) -> String {
    let mut current = sql;
    loop {
        let next = match TEMPLATE_RE.replace_all(&current, template_to_placeholder) {
            Cow::Borrowed(_) => None,
            Cow::Owned(next) => Some(next),
        };
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
}

fn fix_operator_placeholders(sql: &str) -> String {
    OPERATOR_VAR_RE
        .replace_all(sql, |caps: &Captures| {
            let preceding = &caps[1];
            if STRUCTURAL_KEYWORDS.contains(&preceding.to_lowercase().as_str()) {
                caps[0].to_string()
            } else {
                format!("{preceding} = {}", &caps[3])
            }
        })
        .into_owned()
}

/// Turns raw pipeline SQL into parser-friendly SQL. Never fails: every step is
/// a textual rewrite, so a step that finds nothing leaves the text as it was.
pub fn sanitize(raw_sql: &str) -> String {
    let sql = BLOCK_COMMENT_RE.replace_all(raw_sql, " ");
    let sql = LINE_COMMENT_RE.replace_all(&sql, "").into_owned();

    let sql = replace_templates(sql);
    let sql = BRACE_RE.replace_all(&sql, "");

    let sql = INSERT_STATEMENT_RE.replace_all(&sql, " ");
    let sql = sql.replace('$', PLACEHOLDER_PREFIX);

    let sql = UPSERT_RE.replace_all(&sql, "INSERT INTO");
    let sql = SELECT_TOP_RE.replace_all(&sql, "SELECT");
    let sql = PARTITION_RE.replace_all(&sql, "");
    let sql = COMPUTE_STATS_RE.replace_all(&sql, "");
    let sql = INVALIDATE_METADATA_RE.replace_all(&sql, "");

    let sql = fix_operator_placeholders(&sql);

    let sql = SPACED_GE_RE.replace_all(&sql, ">=");
    let sql = SPACED_LE_RE.replace_all(&sql, "<=");
    SPACED_NE_RE.replace_all(&sql, "!=").into_owned()
}

/// Reverses the placeholder prefix for user-facing names (`var_FOO` -> `$FOO`).
pub fn restore(name: &str) -> String {
    name.replace(PLACEHOLDER_PREFIX, "$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_patterns_compile() {
        for re in [
            &BLOCK_COMMENT_RE,
            &LINE_COMMENT_RE,
            &TEMPLATE_RE,
            &NON_IDENT_RE,
            &BRACE_RE,
            &INSERT_STATEMENT_RE,
            &UPSERT_RE,
            &SELECT_TOP_RE,
            &PARTITION_RE,
            &COMPUTE_STATS_RE,
            &INVALIDATE_METADATA_RE,
            &OPERATOR_VAR_RE,
            &SPACED_GE_RE,
            &SPACED_LE_RE,
            &SPACED_NE_RE,
        ] {
            LazyLock::force(re);
        }
    }

    #[test]
    fn test_restore_placeholder() {
        assert_eq!(restore("var_FOO"), "$FOO");
        assert_eq!(restore("var_ENT_1raw.tabla"), "$ENT_1raw.tabla");
        assert_eq!(restore(""), "");
    }

    #[test]
    fn test_strips_comments() {
        let sql = "SELECT a /* bloque\n comentario */ FROM t -- final\nWHERE b = 1";
        assert_eq!(sanitize(sql), "SELECT a   FROM t \nWHERE b = 1");
    }

    #[test]
    fn test_templates_become_placeholders() {
        assert_eq!(
            sanitize("INSERT INTO ${ENTORNO}_3ref.t SELECT * FROM ${DB:toLower()}.s"),
            "INSERT INTO var_ENTORNO_3ref.t SELECT * FROM var_DB.s"
        );
    }

    #[test]
    fn test_nested_templates_resolve_inside_out() {
        // inner `${X}` first, then `${var_X_suffix}`
        assert_eq!(sanitize("FROM ${${X}_suffix}.t"), "FROM var_var_X_suffix.t");
        assert_eq!(sanitize("FROM ${a-b.c}.t"), "FROM var_a_b_c.t");
    }

    #[test]
    fn test_orphan_braces_and_bare_dollars() {
        assert_eq!(sanitize("SELECT * FROM $ESQUEMA.t}"), "SELECT * FROM var_ESQUEMA.t");
        assert_eq!(sanitize("$INSERT_STATEMENT SELECT 1"), "  SELECT 1");
    }

    #[test]
    fn test_vendor_syntax_normalized() {
        assert_eq!(
            sanitize("UPSERT INTO db.t SELECT TOP 10 a FROM db.s"),
            "INSERT INTO db.t SELECT a FROM db.s"
        );
        assert_eq!(
            sanitize("INSERT OVERWRITE TABLE db.t PARTITION (dt='2024') SELECT a FROM db.s"),
            "INSERT OVERWRITE TABLE db.t  SELECT a FROM db.s"
        );
        assert_eq!(
            sanitize("INSERT INTO db.t SELECT a FROM db.s; COMPUTE STATS db.t; INVALIDATE METADATA db.t"),
            "INSERT INTO db.t SELECT a FROM db.s;  "
        );
    }

    #[test]
    fn test_placeholder_in_operator_position() {
        assert_eq!(
            sanitize("SELECT * FROM t WHERE fecha ${Filtro} CAST('2024' AS DATE)"),
            "SELECT * FROM t WHERE fecha = CAST('2024' AS DATE)"
        );
        assert_eq!(
            sanitize("SELECT * FROM t WHERE id $OP 5"),
            "SELECT * FROM t WHERE id = 5"
        );
    }

    #[test]
    fn test_placeholder_after_keyword_untouched() {
        assert_eq!(
            sanitize("SELECT * FROM ${TABLA} (SELECT 1)"),
            "SELECT * FROM var_TABLA (SELECT 1)"
        );
    }

    #[test]
    fn test_spaced_comparisons_collapse() {
        assert_eq!(
            sanitize("WHERE a > = 1 AND b < = 2 AND c ! = 3"),
            "WHERE a >= 1 AND b <= 2 AND c != 3"
        );
    }
}
