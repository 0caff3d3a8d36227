#![allow(clippy::unwrap_used)]

//! Partial-key startup validation against scripted catalog replies.

use relais_core::db::{
    validate_partial_key, DbRow, DbValue, COLUMN_TYPE_SQL, PARTITION_COLUMNS_SQL,
    SEQUENCE_DEFAULT_SQL,
};
use relais_test_utils::MockDb;

fn one_text_row(column: &str, value: Option<&str>) -> Vec<DbRow> {
    vec![DbRow::new(
        vec![column.to_string()],
        vec![value.map_or(DbValue::Null, |v| DbValue::Text(v.to_string()))],
    )]
}

fn with_default_expr(db: &MockDb, expr: Option<&'static str>) {
    db.on_query(SEQUENCE_DEFAULT_SQL, move |_| {
        Ok(one_text_row("default_expr", expr))
    });
}

fn with_column_type(db: &MockDb, typname: &'static str) {
    db.on_query(COLUMN_TYPE_SQL, move |_| {
        Ok(one_text_row("typname", Some(typname)))
    });
}

fn with_partition_columns(db: &MockDb, columns: &'static [&'static str]) {
    db.on_query(PARTITION_COLUMNS_SQL, move |_| {
        Ok(columns
            .iter()
            .flat_map(|&c| one_text_row("attname", Some(c)))
            .collect())
    });
}

#[tokio::test]
async fn sequence_backed_key_with_partition_columns_is_valid() {
    let db = MockDb::new();
    with_default_expr(&db, Some("nextval('orders_id_seq'::regclass)"));
    with_partition_columns(&db, &["created_at"]);

    let report = validate_partial_key(&db, "orders", "id", &["created_at"])
        .await
        .unwrap();
    assert!(report.valid, "{}", report.reason);
    assert!(report.reason.contains("SEQUENCE"));
}

#[tokio::test]
async fn uuid_key_is_valid_without_a_sequence_default() {
    let db = MockDb::new();
    with_default_expr(&db, None);
    with_column_type(&db, "uuid");
    with_partition_columns(&db, &[]);

    let report = validate_partial_key(&db, "orders", "id", &[]).await.unwrap();
    assert!(report.valid, "{}", report.reason);
    assert!(report.reason.contains("UUID"));
}

#[tokio::test]
async fn non_unique_key_is_rejected() {
    let db = MockDb::new();
    with_default_expr(&db, None);
    with_column_type(&db, "int8");

    let report = validate_partial_key(&db, "orders", "id", &["created_at"])
        .await
        .unwrap();
    assert!(!report.valid);
    assert!(report.reason.contains("neither"));
}

#[tokio::test]
async fn missing_partition_column_is_rejected() {
    let db = MockDb::new();
    with_default_expr(&db, Some("nextval('orders_id_seq'::regclass)"));
    with_partition_columns(&db, &["region"]);

    let report = validate_partial_key(&db, "orders", "id", &["created_at"])
        .await
        .unwrap();
    assert!(!report.valid);
    assert!(report.reason.contains("created_at"));
    assert!(report.reason.contains("not a partition column"));
}

#[tokio::test]
async fn catalog_query_failures_propagate() {
    // No handlers registered: the first catalog query errors.
    let db = MockDb::new();
    let err = validate_partial_key(&db, "orders", "id", &[]).await.unwrap_err();
    assert_eq!(err.error_code(), "db_query");
}
