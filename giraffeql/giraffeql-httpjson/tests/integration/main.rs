use std::sync::Arc;

use axum::body::Body;
use giraffeql_core::{Config, GiraffeEngine, system::ArcSystemApi};
use giraffeql_httpjson::{
    create_httpjson_router,
    identity::{Anonymous, TrustedHeaders, USER_ID_HEADER},
};
use giraffeql_store_pg::{PgDataStore, client::SqlError};
use giraffeql_test_utils::{FakeSql, example_registry, unimock::Unimock};
use http::{Request, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use test_log::test;
use tower::ServiceExt;

fn router(sql: &FakeSql, config: Config, trusted: bool) -> axum::Router {
    let system: ArcSystemApi = Arc::new(Unimock::new(()));
    let registry = example_registry();
    let store = PgDataStore::new(
        registry.clone(),
        Arc::new(sql.clone()),
        system,
        config.clone(),
    );
    let engine = GiraffeEngine::builder(registry, Arc::new(store))
        .config(config)
        .build()
        .unwrap();

    if trusted {
        create_httpjson_router(Arc::new(engine), Arc::new(TrustedHeaders))
    } else {
        create_httpjson_router(Arc::new(engine), Arc::new(Anonymous))
    }
}

fn post(body: Value) -> Request<Body> {
    Request::post("/")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status, serde_json::from_slice(&body).unwrap())
}

#[test(tokio::test)]
async fn get_record() {
    let sql = FakeSql::new().returning([json!({ "c0": "u1", "c1": "Ann" })]);

    let (status, body) = send(
        router(&sql, Config::default(), false),
        post(json!({
            "getUser": { "name": true, "__args": { "id": "u1" } }
        })),
    )
    .await;

    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!({ "data": { "getUser": { "name": "Ann" } } }), body);
}

#[test(tokio::test)]
async fn denied_create_runs_no_sql() {
    let sql = FakeSql::new();

    let (status, body) = send(
        router(&sql, Config::default(), false),
        post(json!({
            "createPost": { "id": true, "__args": { "title": "hello" } }
        })),
    )
    .await;

    assert_eq!(StatusCode::FORBIDDEN, status);
    assert_eq!("PermissionsError", body["error"]["type"]);
    assert_eq!(403, body["error"]["statusCode"]);
    assert_eq!("createPost", body["error"]["fieldPath"]);
    assert!(sql.log().is_empty());
}

#[test(tokio::test)]
async fn identity_comes_from_trusted_headers() {
    let sql = FakeSql::new();
    let request = Request::post("/")
        .header(CONTENT_TYPE, "application/json")
        .header(USER_ID_HEADER, "u1")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "createPost": { "id": true, "__args": { "nope": 1 } }
            }))
            .unwrap(),
        ))
        .unwrap();

    let (status, body) = send(router(&sql, Config::default(), true), request).await;

    // past the permission gate, stopped by argument validation
    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("ArgsError", body["error"]["type"]);
    assert_eq!(vec!["BEGIN", "ROLLBACK"], sql.log());
}

#[test(tokio::test)]
async fn first_error_discards_all_data() {
    let sql = FakeSql::new()
        .returning([json!({ "c0": "u1", "c1": "Ann" })])
        .returning([]);

    let (status, body) = send(
        router(&sql, Config::default(), false),
        post(json!({
            "getUser": { "name": true, "__args": { "id": "u1" } },
            "getPost": { "title": true, "__args": { "id": "p1" } }
        })),
    )
    .await;

    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(
        json!({
            "error": {
                "message": "`post` not found",
                "fieldPath": "getPost",
                "type": "ItemNotFoundError",
                "statusCode": 404
            }
        }),
        body
    );
}

#[test(tokio::test)]
async fn unexpected_errors_are_masked() {
    let request = || {
        post(json!({
            "getUser": { "name": true, "__args": { "id": "u1" } }
        }))
    };

    let sql = FakeSql::new().failing(SqlError::new("relation \"user\" does not exist"));
    let (status, body) = send(router(&sql, Config::default(), false), request()).await;

    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
    assert_eq!("GenericError", body["error"]["type"]);
    assert_eq!("An unexpected error occurred", body["error"]["message"]);

    let sql = FakeSql::new().failing(SqlError::new("relation \"user\" does not exist"));
    let dev_mode = Config {
        dev_mode: true,
        ..Default::default()
    };
    let (_, body) = send(router(&sql, dev_mode, false), request()).await;

    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("relation \"user\" does not exist")
    );
}

#[test(tokio::test)]
async fn malformed_body() {
    let request = Request::post("/")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{"))
        .unwrap();

    let (status, body) = send(router(&FakeSql::new(), Config::default(), false), request).await;

    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("ArgsError", body["error"]["type"]);
}

#[test(tokio::test)]
async fn unknown_operation() {
    let (status, body) = send(
        router(&FakeSql::new(), Config::default(), false),
        post(json!({ "getUnicorn": true })),
    )
    .await;

    assert_eq!(StatusCode::BAD_REQUEST, status);
    assert_eq!("InvalidFieldError", body["error"]["type"]);
}
