mod common;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::from_fn,
    routing::post,
    Json, Router,
};
use serde_json::{json, Map, Value};
use solo_sdk::{
    root_transaction, AppError, AppState, ConfigError, Database, Db, Session, Settings, TxState,
};
use tower::ServiceExt;

fn title(t: &str) -> Map<String, Value> {
    let Value::Object(map) = json!({ "title": t }) else { unreachable!() };
    map
}

async fn post_count(session: &mut Session) -> u64 {
    let q = session.select("Post").unwrap();
    session.count(&q).await.unwrap()
}

#[tokio::test]
async fn nested_rollback_keeps_the_outer_work() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let root = s.begin(false).await.unwrap();
    assert_eq!(root.state(), TxState::Root);
    s.create("Post", title("kept")).await.unwrap();

    let nested = s.begin(true).await.unwrap();
    assert_eq!(nested.state(), TxState::Nested);
    s.create("Post", title("discarded")).await.unwrap();
    assert_eq!(s.depth(), 2);
    assert!(!s.end(&nested, true).await.unwrap());

    assert!(s.end(&root, false).await.unwrap());
    assert!(!s.in_transaction());
    assert_eq!(post_count(&mut s).await, 1);
    s.close().await.unwrap();
}

#[tokio::test]
async fn flat_scope_inside_a_savepoint_is_refused() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let root = s.begin(false).await.unwrap();
    let reused = s.begin(false).await.unwrap();
    assert_eq!(reused.state(), TxState::Reused);
    assert!(s.end(&reused, false).await.unwrap());
    assert_eq!(s.depth(), 1);

    let nested = s.begin(true).await.unwrap();
    let err = s.begin(false).await.unwrap_err();
    assert!(matches!(err, AppError::Config(ConfigError::NestedTransaction)));

    s.end(&nested, false).await.unwrap();
    s.end(&root, false).await.unwrap();
    s.close().await.unwrap();
}

#[tokio::test]
async fn reused_scope_failure_rolls_back_the_shared_transaction() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let root = s.begin(false).await.unwrap();
    s.create("Post", title("lost")).await.unwrap();
    let reused = s.begin(false).await.unwrap();
    s.end(&reused, true).await.unwrap();
    assert!(!s.in_transaction());

    // The outer scope finds its frame gone and only logs.
    assert!(!s.end(&root, false).await.unwrap());
    assert_eq!(post_count(&mut s).await, 0);
    s.close().await.unwrap();
}

#[tokio::test]
async fn guard_finish_returns_the_original_error() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let mut tx = s.transaction(false).await.unwrap();
    tx.create("Post", title("rolled back")).await.unwrap();
    let result: Result<(), AppError> = Err(AppError::BadRequest("boom".into()));
    let err = tx.finish(result).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref m) if m == "boom"));
    assert_eq!(post_count(&mut s).await, 0);

    {
        let mut tx = s.transaction(false).await.unwrap();
        tx.create("Post", title("dropped")).await.unwrap();
    }
    // An unfinished guard rolls back before the next statement.
    assert_eq!(post_count(&mut s).await, 0);
    assert!(!s.in_transaction());

    let mut tx = s.transaction(false).await.unwrap();
    tx.create("Post", title("committed")).await.unwrap();
    assert!(tx.commit().await.unwrap());
    assert_eq!(post_count(&mut s).await, 1);
    s.close().await.unwrap();
}

#[tokio::test]
async fn force_commit_survives_a_later_rollback() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let mut tx = s.transaction(false).await.unwrap();
    tx.create("Post", title("saved")).await.unwrap();
    tx.force_commit().await.unwrap();
    tx.create("Post", title("undone")).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(post_count(&mut s).await, 1);
    s.close().await.unwrap();
}

#[tokio::test]
async fn dropped_inner_guard_is_not_committed_by_the_outer_scope() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let mut root = s.transaction(false).await.unwrap();
    {
        let mut inner = root.transaction(true).await.unwrap();
        inner.create("Post", title("abandoned")).await.unwrap();
    }
    assert!(root.commit().await.unwrap());

    assert!(!s.in_transaction());
    assert_eq!(post_count(&mut s).await, 0);
    s.close().await.unwrap();
}

#[tokio::test]
async fn nested_force_rollback_then_outer_commit() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let root = s.begin(false).await.unwrap();
    s.create("Post", title("outer")).await.unwrap();
    let mut nested = s.begin(true).await.unwrap();
    s.create("Post", title("undone")).await.unwrap();
    s.force_rollback(&mut nested).await.unwrap();
    assert_eq!(nested.state(), TxState::Nested);
    assert_eq!(s.depth(), 2);
    s.create("Post", title("after")).await.unwrap();
    assert!(s.end(&nested, false).await.unwrap());
    assert!(s.end(&root, false).await.unwrap());

    let q = s.select("Post").unwrap();
    let titles: Vec<String> = s
        .all(&q)
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.get_str("title").map(str::to_string))
        .collect();
    assert_eq!(titles, vec!["outer", "after"]);
    s.close().await.unwrap();
}

#[tokio::test]
async fn reused_force_commit_closes_the_outer_handle() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let root = s.begin(false).await.unwrap();
    s.create("Post", title("first")).await.unwrap();
    let mut reused = s.begin(false).await.unwrap();
    assert_eq!(reused.state(), TxState::Reused);
    s.force_commit(&mut reused).await.unwrap();
    // The shared transaction is gone; the reused scope now owns a fresh root.
    assert_eq!(reused.state(), TxState::Root);
    s.create("Post", title("second")).await.unwrap();
    assert!(s.end(&reused, false).await.unwrap());

    assert!(!s.end(&root, false).await.unwrap());
    assert_eq!(post_count(&mut s).await, 2);
    s.close().await.unwrap();
}

#[tokio::test]
async fn find_or_create_and_upsert() {
    let (db, _dir) = common::database().await;
    let mut s = db.session().await.unwrap();

    let a = s.find_or_create("Tag", json_map(json!({"name": "x"})), &["name"]).await.unwrap();
    let b = s.find_or_create("Tag", json_map(json!({"name": "x"})), &["name"]).await.unwrap();
    assert_eq!(a.get("id"), b.get("id"));

    let id = a.get("id").cloned().unwrap();
    let updated = s
        .upsert("Tag", json_map(json!({"id": id.clone(), "name": "y"})), &[])
        .await
        .unwrap();
    assert_eq!(updated.get_str("name"), Some("y"));

    let err = s.upsert("Tag", json_map(json!({"name": "z"})), &[]).await.unwrap_err();
    assert!(matches!(err, AppError::Config(ConfigError::UpsertKey(_))));
    s.close().await.unwrap();
}

fn json_map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

async fn commit_then_fail(mut db: Db) -> Result<Json<Value>, AppError> {
    db.create("Post", title("committed early")).await?;
    db.force_commit_root().await?;
    db.create("Post", title("rolled back")).await?;
    Err(AppError::Validation("nope".into()))
}

async fn create_ok(mut db: Db, State(_state): State<AppState>) -> Result<Json<Value>, AppError> {
    let record = db.create("Post", title("ok")).await?;
    Ok(Json(json!({ "id": record.get("id") })))
}

fn router(db: Database) -> Router {
    Router::new()
        .route("/fail", post(commit_then_fail))
        .route("/ok", post(create_ok))
        .layer(from_fn(root_transaction))
        .with_state(AppState::new(db))
}

#[tokio::test]
async fn request_transaction_follows_the_response_status() {
    let (db, _dir) = common::database().await;
    let app = router(db.clone());

    let req = Request::builder().method("POST").uri("/fail").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let req = Request::builder().method("POST").uri("/ok").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let mut s = db.session().await.unwrap();
    let q = s.select("Post").unwrap();
    let titles: Vec<String> = s
        .all(&q)
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.get_str("title").map(str::to_string))
        .collect();
    assert_eq!(titles, vec!["committed early", "ok"]);
    s.close().await.unwrap();
}

#[tokio::test]
async fn testing_override_lets_flat_scopes_join_a_savepoint() {
    let dir = tempfile::tempdir().unwrap();
    let registry = common::registry();
    let settings = Settings {
        allow_nesting_root_transaction: true,
        ..common::settings(&dir)
    };
    let db = Database::connect(settings, registry.clone()).await.unwrap();
    solo_sdk::create_all(db.pool(), &registry).await.unwrap();

    let mut s = db.session().await.unwrap();
    let root = s.begin(false).await.unwrap();
    let nested = s.begin(true).await.unwrap();
    let joined = s.begin(false).await.unwrap();
    assert_eq!(joined.state(), TxState::Reused);
    s.end(&joined, false).await.unwrap();
    s.end(&nested, false).await.unwrap();
    s.end(&root, false).await.unwrap();
    s.close().await.unwrap();
}
