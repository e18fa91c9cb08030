use log::{debug, info, warn};
use rusqlite::params;
use rusqlite::types::Value;

use crate::directive::{ColumnCopy, ColumnDrop, ColumnRename, FieldAdd, FieldRename, Transform};
use crate::error::EvolveError;
use crate::introspect::{self, quote_ident};
use crate::metadata::{self, IR_MODEL, IR_MODEL_DATA, IR_MODEL_FIELDS};
use crate::session::Session;

/// Rename columns in place; a directive without a new name drops the column.
///
/// Never fails because the old column is already gone: a previous run is
/// assumed to have handled it.
pub fn rename_columns(session: &mut Session<'_>, renames: &[ColumnRename]) -> Result<(), EvolveError> {
    for rename in renames {
        let table = rename.table.as_str();
        let old = rename.old.as_str();

        let Some(new) = rename.new.as_deref() else {
            drop_column(session, table, old)?;
            continue;
        };

        let has_old = session.column_exists(table, old)?;
        let has_new = session.column_exists(table, new)?;

        match (has_old, has_new) {
            (true, false) => {
                info!("Renaming column {}.{} to {}", table, old, new);
                session.logged_query(
                    &format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        quote_ident(table),
                        quote_ident(old),
                        quote_ident(new)
                    ),
                    params![],
                )?;
            }
            (false, true) => debug!("Column {}.{} already renamed to {}", table, old, new),
            (true, true) => warn!(
                "Both {}.{} and {}.{} exist; leaving both in place",
                table, old, table, new
            ),
            (false, false) => warn!(
                "Neither {}.{} nor {}.{} exists; nothing to rename",
                table, old, table, new
            ),
        }
    }
    Ok(())
}

/// Drop columns, tolerating ones that are already gone.
pub fn drop_columns(session: &mut Session<'_>, drops: &[ColumnDrop]) -> Result<(), EvolveError> {
    for drop in drops {
        drop_column(session, &drop.table, &drop.column)?;
    }
    Ok(())
}

fn drop_column(session: &mut Session<'_>, table: &str, column: &str) -> Result<(), EvolveError> {
    if !session.column_exists(table, column)? {
        debug!("Column {}.{} already absent", table, column);
        return Ok(());
    }

    // SQLite refuses to drop a column that an index still uses
    for index in introspect::indexes_on_column(session.connection(), table, column)? {
        debug!("Dropping index {} on {}.{}", index, table, column);
        session.logged_query(&format!("DROP INDEX {}", quote_ident(&index)), params![])?;
    }

    info!("Dropping column {}.{}", table, column);
    session.logged_query(
        &format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ),
        params![],
    )?;
    Ok(())
}

/// Copy every row's source value into a new destination column.
///
/// An existing destination means the copy already ran; it is left untouched
/// even if later steps have rewritten the source since.
pub fn copy_columns(session: &mut Session<'_>, copies: &[ColumnCopy]) -> Result<(), EvolveError> {
    for copy in copies {
        let table = copy.table.as_str();
        let source = copy.source.as_str();

        let dest = match &copy.dest {
            Some(dest) => dest.clone(),
            None => session.legacy_name(source),
        };

        if session.column_exists(table, &dest)? {
            debug!("Column {}.{} already copied to {}", table, source, dest);
            continue;
        }

        let source_type = introspect::column_type(session.connection(), table, source)?
            .ok_or_else(|| {
                EvolveError::PreconditionFailed(format!(
                    "cannot copy from {}.{}: column does not exist",
                    table, source
                ))
            })?;

        let sql_type = copy.sql_type.as_deref().unwrap_or(&source_type);
        session.logged_query(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                quote_ident(&dest),
                sql_type
            )
            .trim_end()
            .to_owned(),
            params![],
        )?;

        let rows = match &copy.transform {
            Transform::Identity => session.logged_query(
                &format!(
                    "UPDATE {} SET {} = {}",
                    quote_ident(table),
                    quote_ident(&dest),
                    quote_ident(source)
                ),
                params![],
            )?,
            Transform::Sql(expr) => session.logged_query(
                &format!(
                    "UPDATE {} SET {} = {}",
                    quote_ident(table),
                    quote_ident(&dest),
                    expr.replace("{}", &quote_ident(source))
                ),
                params![],
            )?,
            Transform::Rust(f) => copy_row_wise(session, table, source, &dest, *f)?,
        };

        info!("Copied {} rows from {}.{} to {}", rows, table, source, dest);
    }
    Ok(())
}

fn copy_row_wise(
    session: &mut Session<'_>,
    table: &str,
    source: &str,
    dest: &str,
    f: fn(Value) -> Value,
) -> Result<usize, EvolveError> {
    let conn = session.connection();

    let values: Vec<(i64, Value)> = conn
        .prepare(&format!(
            "SELECT rowid, {} FROM {}",
            quote_ident(source),
            quote_ident(table)
        ))?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let update_sql = format!(
        "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
        quote_ident(table),
        quote_ident(dest)
    );
    let mut update = conn.prepare(&update_sql)?;

    let mut rows = 0;
    for (rowid, value) in values {
        rows += update.execute(params![f(value), rowid])?;
    }
    drop(update);

    session.record(&update_sql, rows);
    Ok(rows)
}

/// Rename model fields: the column itself, the field's registry row and the
/// field's XML-ID.
pub fn rename_fields(session: &mut Session<'_>, renames: &[FieldRename]) -> Result<(), EvolveError> {
    metadata::require_tables(session, &[IR_MODEL_FIELDS, IR_MODEL_DATA])?;

    for rename in renames {
        rename_columns(
            session,
            &[ColumnRename::rename(&rename.table, &rename.old, &rename.new)],
        )?;

        session.logged_query(
            "UPDATE ir_model_fields SET name = ?1 WHERE name = ?2 AND model = ?3",
            params![rename.new, rename.old, rename.model],
        )?;

        session.logged_query(
            "UPDATE ir_model_data SET name = ?1
             WHERE name = ?2 AND model = 'ir.model.fields'
             AND NOT EXISTS (SELECT 1 FROM ir_model_data d2 WHERE d2.module = ir_model_data.module AND d2.name = ?1)",
            params![
                metadata::field_xmlid_name(&rename.model, &rename.new),
                metadata::field_xmlid_name(&rename.model, &rename.old)
            ],
        )?;
    }
    Ok(())
}

/// Pre-create fields introduced by a newer release: the column when missing,
/// then the registry row and its XML-ID when missing.
pub fn add_fields(session: &mut Session<'_>, fields: &[FieldAdd]) -> Result<(), EvolveError> {
    metadata::require_tables(session, &[IR_MODEL, IR_MODEL_FIELDS, IR_MODEL_DATA])?;

    for field in fields {
        if !session.table_exists(&field.table)? {
            return Err(EvolveError::PreconditionFailed(format!(
                "cannot add field {} to missing table {}",
                field.field, field.table
            )));
        }

        let conn = session.connection();
        let model_id: i64 = conn
            .query_row(
                "SELECT id FROM ir_model WHERE model = ?1",
                [&field.model],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => EvolveError::PreconditionFailed(format!(
                    "model '{}' is not registered",
                    field.model
                )),
                other => other.into(),
            })?;

        if session.column_exists(&field.table, &field.field)? {
            debug!("Column {}.{} already exists", field.table, field.field);
        } else {
            info!("Adding column {}.{}", field.table, field.field);
            session.logged_query(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(&field.table),
                    quote_ident(&field.field),
                    field.column_type()
                ),
                params![],
            )?;
        }

        let field_registered: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM ir_model_fields WHERE model = ?1 AND name = ?2)",
            [&field.model, &field.field],
            |row| row.get(0),
        )?;
        if field_registered {
            debug!("Field {}.{} already registered", field.model, field.field);
            continue;
        }

        session.logged_query(
            "INSERT INTO ir_model_fields (name, model, model_id, ttype, state)
             VALUES (?1, ?2, ?3, ?4, 'base')",
            params![field.field, field.model, model_id, field.field_type.as_ref()],
        )?;
        let field_id = session.connection().last_insert_rowid();

        session.logged_query(
            "INSERT OR IGNORE INTO ir_model_data (module, name, model, res_id, noupdate)
             VALUES (?1, ?2, 'ir.model.fields', ?3, 1)",
            params![
                field.module,
                metadata::field_xmlid_name(&field.model, &field.field),
                field_id
            ],
        )?;
    }
    Ok(())
}
