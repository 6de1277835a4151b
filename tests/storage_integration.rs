use edgecore::storage::StorageEngine;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn append_and_fetch_round_trip(pool: PgPool) {
    let storage = StorageEngine::new(pool);

    let inserted = storage
        .append_readings(&json!({
            "readings": [
                {
                    "asset_code": "sensor1",
                    "user_ts": "2024-01-02 03:04:05.123456+00:00",
                    "read_key": null,
                    "reading": {"temperature": 21.5},
                },
                {
                    "asset_code": "sensor2",
                    "user_ts": "2024-01-02 03:05:00.000000+00:00",
                    "read_key": "abc",
                    "reading": {"humidity": 55},
                },
            ]
        }))
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let fetched = storage.fetch_readings(0, 10).await.unwrap();
    assert_eq!(fetched.rows.len(), 2);
    assert_eq!(fetched.rows[0]["asset_code"], "sensor1");
    assert!(fetched.rows[0]["user_ts"].as_str().unwrap().starts_with("2024-01-02"));
}

#[sqlx::test(migrations = "./migrations")]
async fn append_skips_invalid_rows_but_commits_the_rest(pool: PgPool) {
    let storage = StorageEngine::new(pool);

    let inserted = storage
        .append_readings(&json!({
            "readings": [
                {"user_ts": "2024-01-02 03:04:05+00:00", "reading": {}},
                {"asset_code": "ok", "user_ts": "not-a-timestamp", "reading": {}},
                {"asset_code": "ok", "user_ts": "2024-01-02 03:04:05+00:00", "reading": {"x": 1}},
            ]
        }))
        .await
        .unwrap();
    assert_eq!(inserted, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn aggregate_on_readings(pool: PgPool) {
    let storage = StorageEngine::new(pool);
    storage
        .append_readings(&json!({
            "readings": [
                {"asset_code": "a", "user_ts": "2024-01-02 03:04:05+00:00", "reading": {"v": 1}},
                {"asset_code": "a", "user_ts": "2024-01-02 03:05:05+00:00", "reading": {"v": 2}},
            ]
        }))
        .await
        .unwrap();

    let result = storage
        .retrieve_readings(&json!({"aggregate": {"operation": "count", "column": "*"}}))
        .await
        .unwrap();
    assert_eq!(result.rows[0]["count_*"], 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn bad_in_clause_is_rejected(pool: PgPool) {
    let storage = StorageEngine::new(pool);
    let err = storage
        .retrieve_readings(&json!({"where": {"column": "asset_code", "condition": "in", "value": []}}))
        .await
        .unwrap_err();
    assert!(matches!(err, edgecore::storage::StorageError::Schema(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn purge_oldest_two_hours_keeps_unsent(pool: PgPool) {
    let storage = StorageEngine::new(pool);
    // ids 1,2 are old and below sent_id=3; ids 3..5 are fresh ("now()" passes
    // through as a function call per the dialect's literalisation rule).
    storage
        .append_readings(&json!({
            "readings": [
                {"asset_code": "old", "user_ts": "2000-01-01 00:00:00.000000+00:00", "reading": {"v": 1}},
                {"asset_code": "old", "user_ts": "2000-01-01 00:00:00.000000+00:00", "reading": {"v": 2}},
                {"asset_code": "new", "user_ts": "now()", "reading": {"v": 3}},
                {"asset_code": "new", "user_ts": "now()", "reading": {"v": 4}},
                {"asset_code": "new", "user_ts": "now()", "reading": {"v": 5}},
            ]
        }))
        .await
        .unwrap();

    let result = storage.purge_readings(2, 1, 3).await.unwrap();
    assert_eq!(result["removed"], 2);
    assert_eq!(result["unsentPurged"], 0);
    assert_eq!(result["unsentRetained"], 2);
    assert_eq!(result["readings"], 3);
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_without_where_is_rejected(pool: PgPool) {
    let storage = StorageEngine::new(pool);
    let err = storage.delete("readings", &json!({})).await.unwrap_err();
    assert!(matches!(err, edgecore::storage::StorageError::MissingWhere));
}

#[sqlx::test(migrations = "./migrations")]
async fn insert_and_update_asset_statistics(pool: PgPool) {
    let storage = StorageEngine::new(pool);
    storage
        .insert("asset_statistics", &json!({"asset_code": "s1", "count": 0, "previous_value": 0}))
        .await
        .unwrap();

    storage
        .update(
            "asset_statistics",
            &json!({
                "expressions": [{"column": "count", "operator": "+", "value": 5}],
                "where": {"column": "asset_code", "condition": "=", "value": "s1"},
            }),
        )
        .await
        .unwrap();

    let result = storage
        .retrieve("asset_statistics", &json!({"where": {"column": "asset_code", "condition": "=", "value": "s1"}}))
        .await
        .unwrap();
    assert_eq!(result.rows[0]["count"], 5);
}
