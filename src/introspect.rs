//! Read-only catalog queries.
//!
//! Everything here inspects `sqlite_master` or `pragma_table_info` and never
//! modifies the database. Operations use these checks to decide whether a
//! directive has already been applied.

use rusqlite::{Connection, OptionalExtension};

use crate::error::EvolveError;

/// A column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// An index definition as stored in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub sql: String,
}

/// Quote an identifier for interpolation into DDL/DML.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, EvolveError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// False when either the table or the column is absent.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, EvolveError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Declared type of a column, `None` if the column does not exist.
/// Columns declared without a type report an empty string.
pub fn column_type(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<Option<String>, EvolveError> {
    let decl_type = conn
        .query_row(
            "SELECT type FROM pragma_table_info(?1) WHERE name = ?2",
            [table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(decl_type)
}

pub fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, EvolveError> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;

    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get(2)?,
                primary_key: row.get::<_, i64>(3)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}

/// Explicitly created indexes on `table`. Automatic indexes backing UNIQUE
/// and PRIMARY KEY constraints carry no SQL and are not returned.
pub fn indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>, EvolveError> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
         ORDER BY name",
    )?;

    let indexes = stmt
        .query_map([table], |row| {
            Ok(IndexInfo {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(indexes)
}

/// Names of explicitly created indexes on `table` that use `column` as a key.
pub fn indexes_on_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<Vec<String>, EvolveError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT il.name
         FROM pragma_index_list(?1) AS il
         JOIN pragma_index_xinfo(il.name) AS ix
         WHERE il.origin = 'c' AND ix.name = ?2
         ORDER BY il.name",
    )?;

    let names = stmt
        .query_map([table, column], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(names)
}

pub fn index_exists(conn: &Connection, index: &str) -> Result<bool, EvolveError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
        [index],
        |row| row.get(0),
    )?;
    Ok(exists)
}
