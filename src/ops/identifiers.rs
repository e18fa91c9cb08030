use log::{debug, info, warn};
use rusqlite::{params, OptionalExtension};

use crate::directive::{ModelRename, XmlIdRename};
use crate::error::EvolveError;
use crate::introspect::quote_ident;
use crate::metadata::{self, IR_MODEL, IR_MODEL_DATA, IR_MODEL_FIELDS, MODEL_REFERENCES};
use crate::session::Session;

/// Rewrite a model's logical name wherever the registry stores it.
///
/// Physical tables are not touched: pair this with `rename_tables` in
/// whichever order the upgrade step requires.
pub fn rename_models(session: &mut Session<'_>, renames: &[ModelRename]) -> Result<(), EvolveError> {
    metadata::require_tables(session, &[IR_MODEL, IR_MODEL_FIELDS, IR_MODEL_DATA])?;

    for rename in renames {
        let (old, new) = (rename.old.as_str(), rename.new.as_str());

        let rows = session.logged_query(
            "UPDATE ir_model SET model = ?1 WHERE model = ?2",
            params![new, old],
        )?;
        if rows == 0 {
            debug!("Model {} not registered (already renamed?)", old);
        } else {
            info!("Renamed model {} to {}", old, new);
        }

        session.logged_query(
            "UPDATE ir_model_fields SET model = ?1 WHERE model = ?2",
            params![new, old],
        )?;
        session.logged_query(
            "UPDATE ir_model_fields SET relation = ?1 WHERE relation = ?2",
            params![new, old],
        )?;
        session.logged_query(
            "UPDATE ir_model_data SET model = ?1 WHERE model = ?2",
            params![new, old],
        )?;
        session.logged_query(
            "UPDATE ir_model_data SET name = ?1
             WHERE name = ?2 AND model = 'ir.model'
             AND NOT EXISTS (SELECT 1 FROM ir_model_data d2 WHERE d2.module = ir_model_data.module AND d2.name = ?1)",
            params![
                metadata::model_xmlid_name(new),
                metadata::model_xmlid_name(old)
            ],
        )?;

        for (table, column) in MODEL_REFERENCES {
            if session.column_exists(table, column)? {
                session.logged_query(
                    &format!(
                        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                        quote_ident(table),
                        quote_ident(column),
                        quote_ident(column)
                    ),
                    params![new, old],
                )?;
            }
        }
    }
    Ok(())
}

/// Move XML-IDs to a new `module.name`.
///
/// When the target already exists the UNIQUE constraint on
/// `ir_model_data (module, name)` fails the statement, unless `allow_merge`
/// is set, in which case the old record is removed and the target kept.
pub fn rename_xmlids(
    session: &mut Session<'_>,
    renames: &[XmlIdRename],
    allow_merge: bool,
) -> Result<(), EvolveError> {
    metadata::require_tables(session, &[IR_MODEL_DATA])?;

    for rename in renames {
        let conn = session.connection();
        let old_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM ir_model_data WHERE module = ?1 AND name = ?2",
                [&rename.old.module, &rename.old.name],
                |row| row.get(0),
            )
            .optional()?;

        let Some(old_id) = old_id else {
            debug!("XML-ID {} not found (already renamed?)", rename.old);
            continue;
        };

        let target_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM ir_model_data WHERE module = ?1 AND name = ?2)",
            [&rename.new.module, &rename.new.name],
            |row| row.get(0),
        )?;

        if target_exists && allow_merge {
            warn!(
                "XML-ID {} already exists; removing {} in its favour",
                rename.new, rename.old
            );
            session.logged_query("DELETE FROM ir_model_data WHERE id = ?1", params![old_id])?;
            continue;
        }

        info!("Renaming XML-ID {} to {}", rename.old, rename.new);
        session.logged_query(
            "UPDATE ir_model_data SET module = ?1, name = ?2 WHERE id = ?3",
            params![rename.new.module, rename.new.name, old_id],
        )?;
    }
    Ok(())
}
