//! Host application metadata registry.
//!
//! Logical identifiers (model names, XML-IDs, module names) live as rows in
//! these tables rather than as schema objects. The identifier operations in
//! [`crate::ops`] rewrite them; this module knows their names and can create
//! an empty registry.

use crate::error::EvolveError;
use crate::session::Session;

pub const IR_MODEL: &str = "ir_model";
pub const IR_MODEL_FIELDS: &str = "ir_model_fields";
pub const IR_MODEL_DATA: &str = "ir_model_data";
pub const IR_MODULE: &str = "ir_module_module";
pub const IR_MODULE_DEPENDENCY: &str = "ir_module_module_dependency";
pub const IR_MODEL_CONSTRAINT: &str = "ir_model_constraint";
pub const IR_MODEL_RELATION: &str = "ir_model_relation";
pub const IR_TRANSLATION: &str = "ir_translation";

/// Tables outside the registry that carry a model name in a column.
/// Each is updated only when present.
pub const MODEL_REFERENCES: [(&str, &str); 3] = [
    ("ir_attachment", "res_model"),
    ("mail_message", "model"),
    ("mail_followers", "res_model"),
];

/// Module states that count as installed.
pub const INSTALLED_STATES: [&str; 2] = ["installed", "to upgrade"];

pub const CREATE_REGISTRY_SQL: &str = r#"
-- Modules known to the application and their install state
CREATE TABLE IF NOT EXISTS ir_module_module (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'uninstalled',  -- uninstalled, installed, to upgrade, to remove, to install
    latest_version TEXT,
    demo BOOLEAN NOT NULL DEFAULT 0
);

-- One row per (dependent module, dependency name)
CREATE TABLE IF NOT EXISTS ir_module_module_dependency (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_id INTEGER NOT NULL REFERENCES ir_module_module (id) ON DELETE CASCADE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ir_model (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model TEXT NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE IF NOT EXISTS ir_model_fields (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    model TEXT NOT NULL,
    model_id INTEGER REFERENCES ir_model (id) ON DELETE CASCADE,
    relation TEXT,                              -- Target model of relational fields
    ttype TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'base',
    UNIQUE (model, name)
);

-- XML-IDs: (module, name) -> (model, res_id)
CREATE TABLE IF NOT EXISTS ir_model_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module TEXT NOT NULL,
    name TEXT NOT NULL,
    model TEXT NOT NULL,
    res_id INTEGER,
    noupdate BOOLEAN NOT NULL DEFAULT 0,
    UNIQUE (module, name)
);

CREATE TABLE IF NOT EXISTS ir_model_constraint (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module INTEGER NOT NULL REFERENCES ir_module_module (id),
    model INTEGER NOT NULL REFERENCES ir_model (id),
    type TEXT NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ir_model_relation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module INTEGER NOT NULL REFERENCES ir_module_module (id),
    model INTEGER NOT NULL REFERENCES ir_model (id),
    name TEXT NOT NULL
);
"#;

/// Create any missing registry tables.
pub fn ensure_registry(conn: &rusqlite::Connection) -> Result<(), EvolveError> {
    conn.execute_batch(CREATE_REGISTRY_SQL)?;
    Ok(())
}

/// Fail with `PreconditionFailed` unless every named table exists.
pub fn require_tables(session: &Session<'_>, tables: &[&str]) -> Result<(), EvolveError> {
    for table in tables {
        if !session.table_exists(table)? {
            return Err(EvolveError::PreconditionFailed(format!(
                "metadata table '{}' does not exist",
                table
            )));
        }
    }
    Ok(())
}

/// XML-ID name of a model record, e.g. `model_res_partner`.
pub fn model_xmlid_name(model: &str) -> String {
    format!("model_{}", model.replace('.', "_"))
}

/// XML-ID name of a field record, e.g. `field_res_partner__barcode`.
pub fn field_xmlid_name(model: &str, field: &str) -> String {
    format!("field_{}__{}", model.replace('.', "_"), field)
}

/// XML-ID name of a module record, stored under module `base`.
pub fn module_xmlid_name(module: &str) -> String {
    format!("module_{}", module)
}
