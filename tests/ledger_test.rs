//! Ledger: enqueue, primary uniqueness, reads.
//!
//! Requires Postgres: each test gets a fresh database from `DATABASE_URL`.

use claimsweep::db::Db;
use claimsweep::db::claim::{ClaimAttempt, PrimaryErrorPolicy};
use claimsweep::error::Error;
use claimsweep::model::{Kind, NewRequest, RequestFilter, RequestId, Status};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn connects_and_migrates(pool: PgPool) {
    let db = Db::from_pool(pool);
    assert!(db.health_check().await.is_ok());
    // Migrations are idempotent.
    db.migrate().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn enqueue_assigns_increasing_ids(pool: PgPool) {
    let db = Db::from_pool(pool);

    let a = db.enqueue(NewRequest::primary("sheet-a")).await.unwrap();
    let b = db.enqueue(NewRequest::dependent("sheet-a")).await.unwrap();
    let c = db.enqueue(NewRequest::primary("sheet-b")).await.unwrap();
    assert!(a < b && b < c, "{a} {b} {c}");

    let request = db.get_request(b).await.unwrap();
    assert_eq!(request.status, Status::New);
    assert_eq!(request.kind, Kind::Dependent);
    assert_eq!(request.target_id, "sheet-a");
    assert!(request.claim_owner.is_none());
    assert!(request.settled_at.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn enqueue_stores_payload(pool: PgPool) {
    let db = Db::from_pool(pool);

    let id = db
        .enqueue(NewRequest::dependent("sheet-a").payload(json!({"cell": "B2", "value": 7})))
        .await
        .unwrap();

    let request = db.get_request(id).await.unwrap();
    assert_eq!(request.payload, json!({"cell": "B2", "value": 7}));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn second_open_primary_is_rejected(pool: PgPool) {
    let db = Db::from_pool(pool);

    db.enqueue(NewRequest::primary("sheet-a")).await.unwrap();
    let err = db.enqueue(NewRequest::primary("sheet-a")).await.unwrap_err();
    assert!(
        matches!(err, Error::DuplicatePrimary { ref target_id } if target_id == "sheet-a"),
        "expected DuplicatePrimary, got {err:?}"
    );

    // Other targets and dependents are unaffected.
    db.enqueue(NewRequest::primary("sheet-b")).await.unwrap();
    db.enqueue(NewRequest::dependent("sheet-a")).await.unwrap();
    db.enqueue(NewRequest::dependent("sheet-a")).await.unwrap();

    let primaries = db
        .list_requests(
            &RequestFilter {
                kind: Some(Kind::Primary),
                target_id: Some("sheet-a".to_string()),
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(primaries.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn new_primary_allowed_once_previous_settles(pool: PgPool) {
    let db = Db::from_pool(pool);

    let first = db.enqueue(NewRequest::primary("sheet-a")).await.unwrap();
    let ClaimAttempt::Claimed(claim) = db
        .try_claim(RequestId::MIN, PrimaryErrorPolicy::default())
        .await
        .unwrap()
    else {
        panic!("expected a claim");
    };
    claim
        .settle(Status::Error, Some("sheet service down"))
        .await
        .unwrap();

    let second = db.enqueue(NewRequest::primary("sheet-a")).await.unwrap();
    assert!(second > first);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn get_missing_request_is_not_found(pool: PgPool) {
    let db = Db::from_pool(pool);
    let err = db.get_request(RequestId(999)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore] // Requires running Postgres
async fn list_and_count_filter_by_status(pool: PgPool) {
    let db = Db::from_pool(pool);

    let p = db.enqueue(NewRequest::primary("sheet-a")).await.unwrap();
    db.enqueue(NewRequest::primary("sheet-b")).await.unwrap();
    db.enqueue(NewRequest::dependent("sheet-b")).await.unwrap();

    let ClaimAttempt::Claimed(claim) = db
        .try_claim(RequestId::MIN, PrimaryErrorPolicy::default())
        .await
        .unwrap()
    else {
        panic!("expected a claim");
    };
    assert_eq!(claim.scanned(), p);
    claim.settle(Status::Complete, None).await.unwrap();

    let complete = db
        .list_requests(
            &RequestFilter {
                status: Some(Status::Complete),
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].id, p);

    let all = db.list_requests(&RequestFilter::default(), 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));

    let counts = db.count_by_status().await.unwrap();
    assert!(counts.contains(&(Status::Complete, 1)));
    assert!(counts.contains(&(Status::New, 2)));
}
