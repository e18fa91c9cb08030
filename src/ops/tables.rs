use log::{debug, info, warn};
use rusqlite::params;

use crate::directive::TableRename;
use crate::error::EvolveError;
use crate::introspect::{self, quote_ident};
use crate::session::Session;

/// Rename tables when the old table exists and the new name is free.
///
/// SQLite rewrites references in indexes, triggers and views, but index
/// names stay as they were. Indexes named after the old table (`<old>_...`)
/// are recreated under the new prefix so a later rename directive for the
/// same index name does not collide.
pub fn rename_tables(session: &mut Session<'_>, renames: &[TableRename]) -> Result<(), EvolveError> {
    for rename in renames {
        let old = rename.old.as_str();
        let new = rename.new.as_str();

        let has_old = session.table_exists(old)?;
        let has_new = session.table_exists(new)?;

        match (has_old, has_new) {
            (true, false) => {
                info!("Renaming table {} to {}", old, new);
                session.logged_query(
                    &format!(
                        "ALTER TABLE {} RENAME TO {}",
                        quote_ident(old),
                        quote_ident(new)
                    ),
                    params![],
                )?;
                rename_indexes(session, old, new)?;
            }
            (false, true) => debug!("Table {} already renamed to {}", old, new),
            (true, true) => warn!("Table {} already exists; not renaming {}", new, old),
            (false, false) => warn!("Neither table {} nor {} exists; nothing to rename", old, new),
        }
    }
    Ok(())
}

fn rename_indexes(session: &mut Session<'_>, old: &str, new: &str) -> Result<(), EvolveError> {
    let prefix = format!("{}_", old);

    for index in introspect::indexes(session.connection(), new)? {
        let Some(suffix) = index.name.strip_prefix(&prefix) else {
            continue;
        };

        let new_name = format!("{}_{}", new, suffix);
        if introspect::index_exists(session.connection(), &new_name)? {
            warn!(
                "Index {} already exists; keeping {} as is",
                new_name, index.name
            );
            continue;
        }

        debug!("Recreating index {} as {}", index.name, new_name);
        let new_sql = index.sql.replacen(&index.name, &new_name, 1);
        session.logged_query(
            &format!("DROP INDEX {}", quote_ident(&index.name)),
            params![],
        )?;
        session.logged_query(&new_sql, params![])?;
    }
    Ok(())
}
