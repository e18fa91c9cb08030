//! Idempotent schema and metadata operations.
//!
//! Every operation inspects the current catalog before acting: a change that
//! is already in place is logged at debug level and skipped. Anything else
//! that goes wrong is returned unmodified so the caller's transaction aborts.

mod columns;
mod identifiers;
mod modules;
mod tables;
mod values;

pub use columns::{add_fields, copy_columns, drop_columns, rename_columns, rename_fields};
pub use identifiers::{rename_models, rename_xmlids};
pub use modules::{is_module_installed, update_module_names};
pub use tables::rename_tables;
pub use values::map_values;

use rusqlite::params;

use crate::directive::Directive;
use crate::error::EvolveError;
use crate::session::Session;

/// Apply one directive by dispatching to its operation.
pub fn apply(session: &mut Session<'_>, directive: &Directive) -> Result<(), EvolveError> {
    match directive {
        Directive::RenameColumns { renames } => rename_columns(session, renames),
        Directive::RenameTables { renames } => rename_tables(session, renames),
        Directive::RenameModels { renames } => rename_models(session, renames),
        Directive::RenameXmlids {
            renames,
            allow_merge,
        } => rename_xmlids(session, renames, *allow_merge),
        Directive::CopyColumns { copies } => copy_columns(session, copies),
        Directive::DropColumns { drops } => drop_columns(session, drops),
        Directive::MapValues { mappings } => {
            for mapping in mappings {
                map_values(session, mapping)?;
            }
            Ok(())
        }
        Directive::UpdateModuleNames { renames, merge } => {
            update_module_names(session, renames, *merge)
        }
        Directive::RenameFields { renames } => rename_fields(session, renames),
        Directive::AddFields { fields } => add_fields(session, fields),
        Directive::Sql { statement } => {
            session.logged_query(statement, params![])?;
            Ok(())
        }
    }
}
