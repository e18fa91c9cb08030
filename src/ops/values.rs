use log::{info, warn};
use rusqlite::params;

use crate::directive::ValueMapping;
use crate::error::EvolveError;
use crate::introspect::quote_ident;
use crate::session::Session;

/// Rewrite discrete values of a column, one `UPDATE` per pair.
///
/// Rows whose source value matches no key are left alone. Keys and values
/// are expected to be disjoint; an overlap makes the result depend on pair
/// order, so it is reported but not rejected.
pub fn map_values(session: &mut Session<'_>, mapping: &ValueMapping) -> Result<(), EvolveError> {
    let table = mapping.table.as_str();
    let column = mapping.column.as_str();
    let source = match (&mapping.source, mapping.legacy_source) {
        (Some(source), _) => source.clone(),
        (None, true) => session.legacy_name(column),
        (None, false) => column.to_owned(),
    };

    for required in [column, source.as_str()] {
        if !session.column_exists(table, required)? {
            return Err(EvolveError::PreconditionFailed(format!(
                "cannot map values on {}.{}: column does not exist",
                table, required
            )));
        }
    }

    if source == column {
        for (i, (_, new_value)) in mapping.pairs.iter().enumerate() {
            if mapping.pairs[i + 1..].iter().any(|(key, _)| key == new_value) {
                warn!(
                    "Mapping on {}.{} writes {} which a later pair maps again",
                    table, column, new_value
                );
            }
        }
    }

    let sql = format!(
        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
        quote_ident(table),
        quote_ident(column),
        quote_ident(&source)
    );

    let mut total = 0;
    for (old_value, new_value) in &mapping.pairs {
        total += session.logged_query(&sql, params![new_value, old_value])?;
    }

    info!(
        "Mapped {} rows of {}.{} from {}",
        total, table, column, source
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::MappedValue;
    use crate::ops::testing::snapshot;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rusqlite::Connection;

    fn partner_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE res_partner (id INTEGER PRIMARY KEY, type TEXT, openupgrade_legacy_9_0_type TEXT);
             INSERT INTO res_partner (type, openupgrade_legacy_9_0_type) VALUES
                ('default', 'default'),
                ('invoice', 'invoice'),
                (NULL, NULL),
                ('default', 'default');",
        )
        .unwrap();
        conn
    }

    fn types(conn: &Connection) -> Vec<Option<String>> {
        conn.prepare("SELECT type FROM res_partner ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_map_values_in_place() {
        let conn = partner_db();
        let mut session = Session::new(&conn, "openupgrade_legacy_9_0");
        map_values(
            &mut session,
            &ValueMapping::new("res_partner", "type", vec![("default", "contact")]),
        )
        .unwrap();

        assert_eq!(
            types(&conn),
            vec![
                Some("contact".to_owned()),
                Some("invoice".to_owned()),
                None,
                Some("contact".to_owned())
            ]
        );
        assert_eq!(session.journal()[0].rows, Some(2));

        let once = snapshot(&conn);
        map_values(
            &mut session,
            &ValueMapping::new("res_partner", "type", vec![("default", "contact")]),
        )
        .unwrap();
        assert_eq!(once, snapshot(&conn));
    }

    #[test]
    fn test_map_values_from_legacy_column() {
        let conn = partner_db();
        conn.execute_batch("UPDATE res_partner SET type = NULL").unwrap();

        let mut session = Session::new(&conn, "openupgrade_legacy_9_0");
        let mapping = ValueMapping::new(
            "res_partner",
            "type",
            vec![("default", "contact"), ("invoice", "invoice")],
        )
        .from_legacy();
        map_values(&mut session, &mapping).unwrap();

        assert_eq!(
            types(&conn),
            vec![
                Some("contact".to_owned()),
                Some("invoice".to_owned()),
                None,
                Some("contact".to_owned())
            ]
        );
    }

    #[test]
    fn test_map_values_requires_columns() {
        let conn = partner_db();
        let mut session = Session::new(&conn, "legacy");
        let mapping = ValueMapping::new("res_partner", "type", vec![("a", "b")]).from_source("kind");
        let err = map_values(&mut session, &mapping).unwrap_err();
        assert!(matches!(err, EvolveError::PreconditionFailed(_)));
    }

    #[test]
    fn test_map_integer_values() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ir_values (id INTEGER PRIMARY KEY, value INTEGER);
             INSERT INTO ir_values (value) VALUES (1), (2), (3);",
        )
        .unwrap();
        let mut session = Session::new(&conn, "legacy");
        map_values(
            &mut session,
            &ValueMapping::new("ir_values", "value", vec![(1_i64, 10_i64), (2, 11)]),
        )
        .unwrap();

        let values: Vec<i64> = conn
            .prepare("SELECT value FROM ir_values ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![10, 11, 3]);
    }

    proptest! {
        #[test]
        fn prop_map_touches_only_keys_and_reverses(values in prop::collection::vec(0i64..8, 0..40)) {
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER)").unwrap();
            for v in &values {
                conn.execute("INSERT INTO t (v) VALUES (?1)", [v]).unwrap();
            }

            // Keys 0..3, values 100..103: disjoint
            let mapping = ValueMapping {
                table: "t".to_owned(),
                column: "v".to_owned(),
                source: None,
                legacy_source: false,
                pairs: (0..3).map(|k| (MappedValue::Integer(k), MappedValue::Integer(k + 100))).collect(),
            };

            let read = |conn: &Connection| -> Vec<i64> {
                conn.prepare("SELECT v FROM t ORDER BY id").unwrap()
                    .query_map([], |row| row.get(0)).unwrap()
                    .collect::<Result<_, _>>().unwrap()
            };

            let mut session = Session::new(&conn, "legacy");
            map_values(&mut session, &mapping).unwrap();

            let expected: Vec<i64> = values.iter().map(|v| if *v < 3 { v + 100 } else { *v }).collect();
            prop_assert_eq!(read(&conn), expected);

            map_values(&mut session, &mapping.reversed()).unwrap();
            prop_assert_eq!(read(&conn), values);
        }
    }
}
