//! Typed directive records and upgrade plans.
//!
//! A plan is data: an ordered list of directives that the operations in
//! [`crate::ops`] interpret. Plans can be built in Rust or loaded from TOML:
//!
//! ```toml
//! name = "base"
//! version = "7.0"
//!
//! [[directive]]
//! kind = "rename_columns"
//! renames = [
//!     { table = "res_users", old = "date", new = "login_date" },
//!     { table = "res_users", old = "user_email" },
//! ]
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::EvolveError;
use crate::session::Session;

/// Rust code run after a plan's directives and before its post-SQL.
pub type PlanFn = fn(&mut Session<'_>) -> Result<(), EvolveError>;

/// Rename `old` to `new` on `table`. `new = None` drops `old`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRename {
    pub table: String,
    pub old: String,
    #[serde(default)]
    pub new: Option<String>,
}

impl ColumnRename {
    pub fn rename(table: &str, old: &str, new: &str) -> Self {
        Self {
            table: table.to_owned(),
            old: old.to_owned(),
            new: Some(new.to_owned()),
        }
    }

    pub fn drop(table: &str, column: &str) -> Self {
        Self {
            table: table.to_owned(),
            old: column.to_owned(),
            new: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRename {
    pub old: String,
    pub new: String,
}

impl TableRename {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRename {
    pub old: String,
    pub new: String,
}

impl ModelRename {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }
}

/// A fully qualified XML identifier, `module.name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XmlId {
    pub module: String,
    pub name: String,
}

impl FromStr for XmlId {
    type Err = EvolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((module, name)) if is_identifier(module) && is_identifier(name) => Ok(XmlId {
                module: module.to_owned(),
                name: name.to_owned(),
            }),
            _ => Err(EvolveError::InvalidDirective(format!(
                "'{}' is not a qualified XML-ID (expected module.name)",
                s
            ))),
        }
    }
}

impl TryFrom<String> for XmlId {
    type Error = EvolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<XmlId> for String {
    fn from(value: XmlId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for XmlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlIdRename {
    pub old: XmlId,
    pub new: XmlId,
}

impl XmlIdRename {
    pub fn new(old: &str, new: &str) -> Result<Self, EvolveError> {
        Ok(Self {
            old: old.parse()?,
            new: new.parse()?,
        })
    }
}

/// How `copy_columns` derives destination values from the source column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    Identity,
    /// SQL expression in which `{}` stands for the quoted source column,
    /// e.g. `lower({})`.
    Sql(String),
    /// Row-wise function over the source value. Only available to plans
    /// built in code.
    #[serde(skip)]
    Rust(fn(Value) -> Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnCopy {
    pub table: String,
    pub source: String,
    /// Destination column; `None` copies to the legacy name of `source`.
    #[serde(default)]
    pub dest: Option<String>,
    /// Declared type for a newly added destination; `None` reuses the
    /// source column's declared type.
    #[serde(default)]
    pub sql_type: Option<String>,
    #[serde(default)]
    pub transform: Transform,
}

impl ColumnCopy {
    pub fn new(table: &str, source: &str, dest: Option<&str>) -> Self {
        Self {
            table: table.to_owned(),
            source: source.to_owned(),
            dest: dest.map(str::to_owned),
            sql_type: None,
            transform: Transform::Identity,
        }
    }

    pub fn with_type(mut self, sql_type: &str) -> Self {
        self.sql_type = Some(sql_type.to_owned());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDrop {
    pub table: String,
    pub column: String,
}

impl ColumnDrop {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_owned(),
            column: column.to_owned(),
        }
    }
}

/// A literal on either side of a value mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappedValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for MappedValue {
    fn from(value: &str) -> Self {
        MappedValue::Text(value.to_owned())
    }
}

impl From<i64> for MappedValue {
    fn from(value: i64) -> Self {
        MappedValue::Integer(value)
    }
}

impl fmt::Display for MappedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappedValue::Boolean(b) => write!(f, "{}", b),
            MappedValue::Integer(i) => write!(f, "{}", i),
            MappedValue::Real(r) => write!(f, "{}", r),
            MappedValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl ToSql for MappedValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            MappedValue::Boolean(b) => b.to_sql(),
            MappedValue::Integer(i) => i.to_sql(),
            MappedValue::Real(r) => r.to_sql(),
            MappedValue::Text(s) => s.to_sql(),
        }
    }
}

/// Discrete substitution over `column`. Matching is done against `source`
/// (or the legacy name of `column` when `legacy_source` is set), defaulting
/// to `column` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMapping {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub legacy_source: bool,
    pub pairs: Vec<(MappedValue, MappedValue)>,
}

impl ValueMapping {
    pub fn new<V: Into<MappedValue>>(table: &str, column: &str, pairs: Vec<(V, V)>) -> Self {
        Self {
            table: table.to_owned(),
            column: column.to_owned(),
            source: None,
            legacy_source: false,
            pairs: pairs.into_iter().map(|(a, b)| (a.into(), b.into())).collect(),
        }
    }

    pub fn from_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_owned());
        self
    }

    pub fn from_legacy(mut self) -> Self {
        self.legacy_source = true;
        self
    }

    /// The mapping with keys and values swapped.
    pub fn reversed(&self) -> Self {
        Self {
            pairs: self
                .pairs
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRename {
    pub old: String,
    pub new: String,
}

impl ModuleRename {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }
}

/// Rename a model field: its column plus its metadata rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub model: String,
    pub table: String,
    pub old: String,
    pub new: String,
}

impl FieldRename {
    pub fn new(model: &str, table: &str, old: &str, new: &str) -> Self {
        Self {
            model: model.to_owned(),
            table: table.to_owned(),
            old: old.to_owned(),
            new: new.to_owned(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Char,
    Text,
    Html,
    Selection,
    Integer,
    Float,
    Monetary,
    Boolean,
    Date,
    Datetime,
    Binary,
    Many2one,
}

impl FieldType {
    /// Column type used when the directive does not specify one.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::Boolean | FieldType::Many2one => "INTEGER",
            FieldType::Float | FieldType::Monetary => "REAL",
            FieldType::Binary => "BLOB",
            FieldType::Char
            | FieldType::Text
            | FieldType::Html
            | FieldType::Selection
            | FieldType::Date
            | FieldType::Datetime => "TEXT",
        }
    }
}

/// Pre-create a field that a newer release introduces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAdd {
    pub field: String,
    pub model: String,
    pub table: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub sql_type: Option<String>,
    pub module: String,
}

impl FieldAdd {
    pub fn new(field: &str, model: &str, table: &str, field_type: FieldType, module: &str) -> Self {
        Self {
            field: field.to_owned(),
            model: model.to_owned(),
            table: table.to_owned(),
            field_type,
            sql_type: None,
            module: module.to_owned(),
        }
    }

    pub fn column_type(&self) -> &str {
        self.sql_type
            .as_deref()
            .unwrap_or_else(|| self.field_type.sql_type())
    }
}

#[derive(Debug, Clone, AsRefStr, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Directive {
    RenameColumns {
        renames: Vec<ColumnRename>,
    },
    RenameTables {
        renames: Vec<TableRename>,
    },
    RenameModels {
        renames: Vec<ModelRename>,
    },
    RenameXmlids {
        renames: Vec<XmlIdRename>,
        #[serde(default)]
        allow_merge: bool,
    },
    CopyColumns {
        copies: Vec<ColumnCopy>,
    },
    DropColumns {
        drops: Vec<ColumnDrop>,
    },
    MapValues {
        mappings: Vec<ValueMapping>,
    },
    UpdateModuleNames {
        renames: Vec<ModuleRename>,
        #[serde(default)]
        merge: bool,
    },
    RenameFields {
        renames: Vec<FieldRename>,
    },
    AddFields {
        fields: Vec<FieldAdd>,
    },
    /// A single raw statement, executed through `logged_query`.
    Sql {
        statement: String,
    },
}

impl Directive {
    /// Structural checks that need no database access.
    pub fn validate(&self) -> Result<(), EvolveError> {
        match self {
            Directive::RenameColumns { renames } => {
                for r in renames {
                    check_identifier("table", &r.table)?;
                    check_identifier("column", &r.old)?;
                    if let Some(new) = &r.new {
                        check_identifier("column", new)?;
                    }
                }
            }
            Directive::RenameTables { renames } => {
                for r in renames {
                    check_identifier("table", &r.old)?;
                    check_identifier("table", &r.new)?;
                }
            }
            Directive::RenameModels { renames } => {
                for r in renames {
                    check_model(&r.old)?;
                    check_model(&r.new)?;
                }
            }
            // XML-IDs are checked when parsed
            Directive::RenameXmlids { .. } => {}
            Directive::CopyColumns { copies } => {
                for c in copies {
                    check_identifier("table", &c.table)?;
                    check_identifier("column", &c.source)?;
                    if let Some(dest) = &c.dest {
                        check_identifier("column", dest)?;
                    }
                    if let Some(sql_type) = &c.sql_type {
                        check_sql_type(sql_type)?;
                    }
                    if let Transform::Sql(expr) = &c.transform {
                        if !expr.contains("{}") {
                            return Err(EvolveError::InvalidDirective(format!(
                                "copy transform '{}' does not reference the source column with {{}}",
                                expr
                            )));
                        }
                    }
                }
            }
            Directive::DropColumns { drops } => {
                for d in drops {
                    check_identifier("table", &d.table)?;
                    check_identifier("column", &d.column)?;
                }
            }
            Directive::MapValues { mappings } => {
                for m in mappings {
                    check_identifier("table", &m.table)?;
                    check_identifier("column", &m.column)?;
                    if let Some(source) = &m.source {
                        check_identifier("column", source)?;
                        if m.legacy_source {
                            return Err(EvolveError::InvalidDirective(format!(
                                "mapping on {}.{} sets both source and legacy_source",
                                m.table, m.column
                            )));
                        }
                    }
                    if m.pairs.is_empty() {
                        return Err(EvolveError::InvalidDirective(format!(
                            "mapping on {}.{} has no pairs",
                            m.table, m.column
                        )));
                    }
                }
            }
            Directive::UpdateModuleNames { renames, .. } => {
                for r in renames {
                    check_identifier("module", &r.old)?;
                    check_identifier("module", &r.new)?;
                }
            }
            Directive::RenameFields { renames } => {
                for r in renames {
                    check_model(&r.model)?;
                    check_identifier("table", &r.table)?;
                    check_identifier("field", &r.old)?;
                    check_identifier("field", &r.new)?;
                }
            }
            Directive::AddFields { fields } => {
                for f in fields {
                    check_identifier("field", &f.field)?;
                    check_model(&f.model)?;
                    check_identifier("table", &f.table)?;
                    check_identifier("module", &f.module)?;
                    if let Some(sql_type) = &f.sql_type {
                        check_sql_type(sql_type)?;
                    }
                }
            }
            Directive::Sql { statement } => {
                if statement.trim().is_empty() {
                    return Err(EvolveError::InvalidDirective(
                        "empty sql statement".to_owned(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One upgrade step: pre-SQL, directives, optional Rust code, post-SQL.
/// Each SQL entry must be a single statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub pre_sql: Vec<String>,
    #[serde(default, rename = "directive")]
    pub directives: Vec<Directive>,
    #[serde(default)]
    pub post_sql: Vec<String>,
    #[serde(skip)]
    pub code: Option<PlanFn>,
}

impl UpgradePlan {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn from_toml(text: &str) -> Result<Self, EvolveError> {
        let plan: UpgradePlan = toml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> Result<Self, EvolveError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), EvolveError> {
        if self.name.trim().is_empty() {
            return Err(EvolveError::InvalidDirective(
                "plan has no name".to_owned(),
            ));
        }
        for directive in &self.directives {
            directive.validate()?;
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(what: &str, s: &str) -> Result<(), EvolveError> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(EvolveError::InvalidDirective(format!(
            "invalid {} name '{}'",
            what, s
        )))
    }
}

/// Column types are spliced into DDL: allow names like `VARCHAR(64)` or
/// `NUMERIC(10, 2)` and nothing else.
fn check_sql_type(s: &str) -> Result<(), EvolveError> {
    let valid = s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','));
    if valid {
        Ok(())
    } else {
        Err(EvolveError::InvalidDirective(format!(
            "invalid column type '{}'",
            s
        )))
    }
}

fn check_model(s: &str) -> Result<(), EvolveError> {
    if s.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(EvolveError::InvalidDirective(format!(
            "invalid model name '{}'",
            s
        )))
    }
}
