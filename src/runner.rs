use log::{info, Level};
use logging_timer::timer;
use rusqlite::{params, Connection};

use crate::directive::UpgradePlan;
use crate::error::EvolveError;
use crate::ops;
use crate::session::{LoggedStatement, Session};

/// Run one upgrade plan inside a single transaction.
///
/// Phases run in order: pre-SQL, directives, the plan's Rust code, post-SQL.
/// On any error the transaction is dropped uncommitted, which rolls back
/// everything the plan executed, and the error is returned as is.
pub fn run_plan(
    conn: &mut Connection,
    plan: &UpgradePlan,
    legacy_prefix: &str,
) -> Result<Vec<LoggedStatement>, EvolveError> {
    let _tmr = timer!(Level::Info; "run_plan", "{}", plan.name);
    plan.validate()?;

    let tx = conn.transaction()?;
    let journal = {
        let mut session = Session::new(&tx, legacy_prefix);
        apply_plan(&mut session, plan)?;
        session.into_journal()
    };
    tx.commit()?;

    info!(
        "Upgrade plan '{}' applied ({} statements)",
        plan.name,
        journal.len()
    );
    Ok(journal)
}

/// Apply a plan's phases through an existing session without touching the
/// transaction boundary.
pub fn apply_plan(session: &mut Session<'_>, plan: &UpgradePlan) -> Result<(), EvolveError> {
    info!(
        "Applying upgrade plan '{}'{}",
        plan.name,
        plan.version
            .as_deref()
            .map(|v| format!(" for version {}", v))
            .unwrap_or_default()
    );

    for sql in &plan.pre_sql {
        session.logged_query(sql, params![])?;
    }

    for directive in &plan.directives {
        session.logged_step(directive.as_ref(), |s| ops::apply(s, directive))?;
    }

    if let Some(code) = plan.code {
        session.logged_step("code", code)?;
    }

    for sql in &plan.post_sql {
        session.logged_query(sql, params![])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::legacy_prefix_from_version;
    use crate::directive::{
        ColumnCopy, ColumnRename, Directive, ModelRename, TableRename, ValueMapping, XmlIdRename,
    };
    use crate::introspect;
    use crate::metadata;
    use crate::ops::testing::snapshot;
    use pretty_assertions::assert_eq;

    fn base_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        metadata::ensure_registry(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE res_users (id INTEGER PRIMARY KEY, login TEXT, date TEXT, user_email TEXT);
             CREATE TABLE res_partner_category_rel (partner_id INTEGER, category_id INTEGER);
             INSERT INTO res_users (login, date, user_email) VALUES ('admin', '2012-01-01', 'a@b.c');
             INSERT INTO ir_module_module (name, state, demo) VALUES ('base', 'installed', 1);
             INSERT INTO ir_model (model) VALUES ('ir.actions.url');
             INSERT INTO ir_model_data (module, name, model, res_id) VALUES ('base', 'VEB', 'res.currency', 1);",
        )
        .unwrap();
        conn
    }

    fn plan() -> UpgradePlan {
        UpgradePlan {
            name: "base".to_owned(),
            version: Some("7.0".to_owned()),
            pre_sql: vec!["UPDATE ir_module_module SET demo = 0".to_owned()],
            post_sql: vec!["UPDATE ir_module_module SET latest_version = '7.0.1.3' WHERE name = 'base'".to_owned()],
            ..Default::default()
        }
        .directive(Directive::RenameColumns {
            renames: vec![
                ColumnRename::rename("res_users", "date", "login_date"),
                ColumnRename::drop("res_users", "user_email"),
            ],
        })
        .directive(Directive::RenameTables {
            renames: vec![TableRename::new(
                "res_partner_category_rel",
                "res_partner_res_partner_category_rel",
            )],
        })
        .directive(Directive::RenameXmlids {
            renames: vec![XmlIdRename::new("base.VEB", "base.VUB").unwrap()],
            allow_merge: false,
        })
        .directive(Directive::RenameModels {
            renames: vec![ModelRename::new("ir.actions.url", "ir.actions.act_url")],
        })
    }

    #[test]
    fn test_run_plan_commits() {
        let mut conn = base_db();
        let journal = run_plan(&mut conn, &plan(), "openupgrade_legacy_7_0").unwrap();
        assert!(!journal.is_empty());
        assert!(journal.iter().all(|s| s.error.is_none()));

        let (demo, version): (bool, String) = conn
            .query_row(
                "SELECT demo, latest_version FROM ir_module_module WHERE name = 'base'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!demo);
        assert_eq!(version, "7.0.1.3");
        assert!(crate::introspect::column_exists(&conn, "res_users", "login_date").unwrap());
    }

    #[test]
    fn test_run_plan_twice_matches_once() {
        let mut conn = base_db();
        run_plan(&mut conn, &plan(), "legacy").unwrap();
        let once = snapshot(&conn);
        run_plan(&mut conn, &plan(), "legacy").unwrap();
        assert_eq!(once, snapshot(&conn));
    }

    fn failing_code(session: &mut Session<'_>) -> Result<(), EvolveError> {
        session.logged_query("INSERT INTO no_such_table VALUES (1)", params![])?;
        Ok(())
    }

    #[test]
    fn test_failure_rolls_back_whole_plan() {
        let mut conn = base_db();
        let before = snapshot(&conn);

        let mut failing = plan();
        failing.code = Some(failing_code);
        let err = run_plan(&mut conn, &failing, "legacy").unwrap_err();
        assert!(matches!(err, EvolveError::DatabaseError(_)));

        // Renames that ran before the failure are gone too
        assert_eq!(before, snapshot(&conn));
    }

    #[test]
    fn test_invalid_plan_runs_nothing() {
        let mut conn = base_db();
        let before = snapshot(&conn);
        let bad = plan().directive(Directive::RenameTables {
            renames: vec![TableRename::new("res users", "res_users2")],
        });
        let err = run_plan(&mut conn, &bad, "legacy").unwrap_err();
        assert!(matches!(err, EvolveError::InvalidDirective(_)));
        assert_eq!(before, snapshot(&conn));
    }

    fn partner_types(conn: &Connection) -> Vec<(String, String)> {
        conn.prepare("SELECT type, openupgrade_legacy_9_0_type FROM res_partner ORDER BY id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_copy_then_map_keeps_legacy_values_on_rerun() {
        let mut conn = base_db();
        conn.execute_batch(
            "CREATE TABLE res_partner (id INTEGER PRIMARY KEY, type TEXT);
             INSERT INTO res_partner (type) VALUES ('default'), ('invoice');",
        )
        .unwrap();

        let plan = UpgradePlan::new("base")
            .directive(Directive::CopyColumns {
                copies: vec![ColumnCopy::new("res_partner", "type", None)],
            })
            .directive(Directive::MapValues {
                mappings: vec![ValueMapping::new(
                    "res_partner",
                    "type",
                    vec![("default", "contact")],
                )
                .from_legacy()],
            });

        run_plan(&mut conn, &plan, "openupgrade_legacy_9_0").unwrap();
        let once = snapshot(&conn);
        run_plan(&mut conn, &plan, "openupgrade_legacy_9_0").unwrap();

        assert_eq!(once, snapshot(&conn));
        assert_eq!(
            partner_types(&conn),
            vec![
                ("contact".to_owned(), "default".to_owned()),
                ("invoice".to_owned(), "invoice".to_owned())
            ]
        );
    }

    fn release_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        metadata::ensure_registry(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE ir_actions_todo (id INTEGER PRIMARY KEY, action_id INTEGER, state TEXT);
             CREATE INDEX ir_actions_todo_action_id_index ON ir_actions_todo (action_id);
             CREATE TABLE res_users (id INTEGER PRIMARY KEY, login TEXT, date TEXT, user_email TEXT);
             CREATE TABLE res_company (id INTEGER PRIMARY KEY, name TEXT, logo BLOB);
             CREATE TABLE ir_attachment (id INTEGER PRIMARY KEY, name TEXT, datas BLOB, res_model TEXT);
             CREATE TABLE res_partner_category_rel (partner_id INTEGER, category_id INTEGER);
             CREATE INDEX res_partner_category_rel_partner_id_index ON res_partner_category_rel (partner_id);
             CREATE TABLE ir_actions (id INTEGER PRIMARY KEY, name TEXT, help TEXT);
             CREATE TABLE ir_ui_view (id INTEGER PRIMARY KEY, name TEXT, arch TEXT);
             CREATE TABLE res_partner (id INTEGER PRIMARY KEY, name TEXT, type TEXT, ean13 TEXT);
             CREATE TABLE res_partner_bank (id INTEGER PRIMARY KEY, acc_number TEXT, bank INTEGER);
             CREATE TABLE res_currency_rate (id INTEGER PRIMARY KEY, rate REAL);

             INSERT INTO ir_module_module (name, state, demo) VALUES ('base', 'installed', 1);
             INSERT INTO ir_model (model, name) VALUES
                ('ir.actions.url', 'URL Action'),
                ('res.partner', 'Contact'),
                ('res.partner.bank', 'Bank Account'),
                ('res.currency.rate', 'Currency Rate');
             INSERT INTO ir_model_fields (name, model, model_id, ttype) VALUES
                ('ean13', 'res.partner', 2, 'char'),
                ('bank', 'res.partner.bank', 3, 'many2one');
             INSERT INTO ir_model_data (module, name, model, res_id, noupdate) VALUES
                ('base', 'VEB', 'res.currency', 1, 0),
                ('base', 'group_public', 'res.groups', 1, 1),
                ('base', 'group_portal', 'res.groups', 2, 1),
                ('base', 'field_res_partner__ean13', 'ir.model.fields', 1, 0);

             INSERT INTO ir_actions_todo (action_id, state) VALUES (1, 'open');
             INSERT INTO res_users (login, date, user_email) VALUES ('admin', '2012-01-01', 'admin@example.com');
             INSERT INTO res_company (name, logo) VALUES ('Acme', x'89504e47');
             INSERT INTO ir_attachment (name, datas, res_model) VALUES ('menu.png', x'00', 'ir.actions.url');
             INSERT INTO res_partner_category_rel (partner_id, category_id) VALUES (1, 1);
             INSERT INTO ir_actions (name, help) VALUES ('Contacts', '<p>Create a contact</p>');
             INSERT INTO ir_ui_view (name, arch) VALUES ('res.partner.form', '<form/>');
             INSERT INTO res_partner (name, type, ean13) VALUES
                ('Acme', 'default', '4006381333931'),
                ('Acme, Billing', 'invoice', NULL);
             INSERT INTO res_partner_bank (acc_number, bank) VALUES ('BE71096123456769', 1);
             INSERT INTO res_currency_rate (rate) VALUES (1.0);",
        )
        .unwrap();
        conn
    }

    fn bundled_plans() -> Vec<UpgradePlan> {
        [
            include_str!("../plans/base_7_0.toml"),
            include_str!("../plans/base_9_0.toml"),
        ]
        .into_iter()
        .map(|text| UpgradePlan::from_toml(text).unwrap())
        .collect()
    }

    fn run_bundled(conn: &mut Connection, plans: &[UpgradePlan]) {
        for plan in plans {
            let prefix = legacy_prefix_from_version(plan.version.as_deref().unwrap()).unwrap();
            run_plan(conn, plan, &prefix).unwrap();
        }
    }

    #[test]
    fn test_bundled_plans_apply_and_rerun() {
        let mut conn = release_db();
        let plans = bundled_plans();

        run_bundled(&mut conn, &plans);
        let once = snapshot(&conn);
        run_bundled(&mut conn, &plans);
        assert_eq!(once, snapshot(&conn));

        // 7.0
        assert!(!introspect::column_exists(&conn, "ir_actions_todo", "action_id").unwrap());
        assert!(introspect::column_exists(&conn, "res_users", "login_date").unwrap());
        assert!(!introspect::column_exists(&conn, "res_users", "user_email").unwrap());
        assert!(introspect::column_exists(&conn, "ir_attachment", "db_datas").unwrap());
        assert!(introspect::index_exists(
            &conn,
            "res_partner_res_partner_category_rel_partner_id_index"
        )
        .unwrap());
        let attachment_model: String = conn
            .query_row("SELECT res_model FROM ir_attachment", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attachment_model, "ir.actions.act_url");

        // 9.0
        assert_eq!(
            partner_types(&conn),
            vec![
                ("contact".to_owned(), "default".to_owned()),
                ("invoice".to_owned(), "invoice".to_owned())
            ]
        );
        assert!(introspect::column_exists(&conn, "ir_actions", "openupgrade_legacy_9_0_help").unwrap());
        assert!(introspect::column_exists(&conn, "ir_ui_view", "arch_db").unwrap());
        assert!(introspect::column_exists(&conn, "res_partner", "barcode").unwrap());
        assert!(introspect::column_exists(&conn, "res_partner_bank", "bank_id").unwrap());
        assert!(introspect::column_exists(&conn, "res_currency_rate", "company_id").unwrap());

        let registered: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ir_model_fields
                 WHERE (model = 'res.partner' AND name = 'barcode')
                    OR (model = 'res.currency.rate' AND name = 'company_id')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(registered, 2);

        let noupdate: i64 = conn
            .query_row(
                "SELECT SUM(noupdate) FROM ir_model_data WHERE name IN ('group_public', 'group_portal')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(noupdate, 0);
    }
}
