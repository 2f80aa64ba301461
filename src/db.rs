use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

use crate::models::{NewTermLineage, TermLineage};
use crate::rows::LineageRow;
use crate::schema::term_lineage;

/// Create database connection pool with configurable size
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool, r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().max_size(max_size).build(manager)
}

/// Replace every stored row of `term` with `rows` in a single transaction.
/// Returns the number of rows inserted.
pub fn replace_term_lineage(
    conn: &mut PgConnection,
    term: &str,
    rows: &[LineageRow],
) -> Result<usize, diesel::result::Error> {
    let new_rows: Vec<NewTermLineage> = rows.iter().map(NewTermLineage::from).collect();

    conn.transaction(|conn| {
        diesel::delete(term_lineage::table.filter(term_lineage::atlas_term.eq(term)))
            .execute(conn)?;
        if new_rows.is_empty() {
            return Ok(0);
        }
        diesel::insert_into(term_lineage::table)
            .values(&new_rows)
            .execute(conn)
    })
}

/// Remove all stored lineage rows.
pub fn delete_all_lineage(conn: &mut PgConnection) -> Result<usize, diesel::result::Error> {
    diesel::delete(term_lineage::table).execute(conn)
}

/// Stored rows of one term, in insertion order.
pub fn load_term_lineage(
    conn: &mut PgConnection,
    term: &str,
) -> Result<Vec<TermLineage>, diesel::result::Error> {
    term_lineage::table
        .filter(term_lineage::atlas_term.eq(term))
        .order(term_lineage::id.asc())
        .select(TermLineage::as_select())
        .load(conn)
}
