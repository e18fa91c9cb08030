use log::{debug, info};
use rusqlite::{params, OptionalExtension};

use crate::directive::ModuleRename;
use crate::error::EvolveError;
use crate::metadata::{
    self, INSTALLED_STATES, IR_MODEL_CONSTRAINT, IR_MODEL_DATA, IR_MODEL_RELATION, IR_MODULE,
    IR_MODULE_DEPENDENCY, IR_TRANSLATION,
};
use crate::session::Session;

pub fn is_module_installed(session: &Session<'_>, module: &str) -> Result<bool, EvolveError> {
    let installed: bool = session.connection().query_row(
        "SELECT EXISTS(SELECT 1 FROM ir_module_module WHERE name = ?1 AND state IN (?2, ?3))",
        params![module, INSTALLED_STATES[0], INSTALLED_STATES[1]],
        |row| row.get(0),
    )?;
    Ok(installed)
}

/// Rename module registrations, or merge them into an existing module.
///
/// In rename mode the module row, its own XML-ID, the XML-IDs it owns and
/// the dependency rows naming it are all renamed. XML-IDs that would collide
/// with one the target module already owns are kept under a
/// `<name>_openupgrade_<id>` name so the application's update process can
/// clean them up.
///
/// In merge mode the target module survives: the old module's XML-IDs and
/// dependents are moved onto it, its install state is carried over when the
/// target is uninstalled, and the old registration is deleted. A merge into
/// a module that is not registered yet degrades to a rename.
pub fn update_module_names(
    session: &mut Session<'_>,
    renames: &[ModuleRename],
    merge_modules: bool,
) -> Result<(), EvolveError> {
    metadata::require_tables(session, &[IR_MODULE, IR_MODULE_DEPENDENCY, IR_MODEL_DATA])?;

    for rename in renames {
        let (old, new) = (rename.old.as_str(), rename.new.as_str());
        let old_id = module_id(session, old)?;
        let merge = merge_modules && module_id(session, new)?.is_some();

        if merge_modules && !merge {
            debug!("Module {} is not registered; renaming {} instead of merging", new, old);
        }

        if merge {
            if let Some(old_id) = old_id {
                info!("Merging module {} into {}", old, new);
                for table in [IR_MODEL_CONSTRAINT, IR_MODEL_RELATION] {
                    if session.table_exists(table)? {
                        session.logged_query(
                            &format!("DELETE FROM {} WHERE module = ?1", table),
                            params![old_id],
                        )?;
                    }
                }
            }
        } else {
            let rows = session.logged_query(
                "UPDATE ir_module_module SET name = ?1 WHERE name = ?2",
                params![new, old],
            )?;
            if rows > 0 {
                info!("Renamed module {} to {}", old, new);
            } else {
                debug!("Module {} not registered (already renamed?)", old);
            }
            session.logged_query(
                "UPDATE ir_model_data SET name = ?1
                 WHERE name = ?2 AND module = 'base' AND model = 'ir.module.module'
                 AND NOT EXISTS (SELECT 1 FROM ir_model_data d2 WHERE d2.module = 'base' AND d2.name = ?1)",
                params![
                    metadata::module_xmlid_name(new),
                    metadata::module_xmlid_name(old)
                ],
            )?;
        }

        // Move owned XML-IDs unless the target module already has that name
        session.logged_query(
            "UPDATE ir_model_data SET module = ?1
             WHERE module = ?2 AND name NOT IN (SELECT name FROM ir_model_data WHERE module = ?1)",
            params![new, old],
        )?;
        session.logged_query(
            "UPDATE ir_model_data SET name = name || '_openupgrade_' || id, module = ?1
             WHERE module = ?2",
            params![new, old],
        )?;
        session.logged_query(
            "UPDATE ir_module_module_dependency SET name = ?1 WHERE name = ?2",
            params![new, old],
        )?;
        if session.column_exists(IR_TRANSLATION, "module")? {
            session.logged_query(
                "UPDATE ir_translation SET module = ?1 WHERE module = ?2",
                params![new, old],
            )?;
        }

        if merge {
            if let Some(old_id) = old_id {
                session.logged_query(
                    "UPDATE ir_module_module
                     SET state = src.state, latest_version = src.latest_version
                     FROM (SELECT state, latest_version FROM ir_module_module WHERE id = ?2) AS src
                     WHERE ir_module_module.name = ?1 AND ir_module_module.state = 'uninstalled'",
                    params![new, old_id],
                )?;
                session.logged_query(
                    "DELETE FROM ir_module_module_dependency WHERE module_id = ?1",
                    params![old_id],
                )?;
                session.logged_query("DELETE FROM ir_module_module WHERE id = ?1", params![old_id])?;
                session.logged_query(
                    "DELETE FROM ir_model_data WHERE model = 'ir.module.module' AND res_id = ?1",
                    params![old_id],
                )?;
            }
        }
    }
    Ok(())
}

fn module_id(session: &Session<'_>, name: &str) -> Result<Option<i64>, EvolveError> {
    let id = session
        .connection()
        .query_row(
            "SELECT id FROM ir_module_module WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}
