use std::sync::{Arc, Mutex};

use giraffeql_core::{
    DomainResult, GiraffeEngine, JsonMap, Session,
    data_store::{DataStoreAPI, Edge, Paginator},
    engine::{OperationCtx, RootOperation, with_permission},
    filter::WhereExpr,
    permission::{OperationKey, allow_all, logged_in},
    query_args::{ListArgs, Page, PaginationArgs},
    registry::{FieldDef, Registry, SqlType, TypeDef},
    selection::{PaginatorSelection, Selection},
    service::ServiceDef,
    session::Identity,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn object(value: Value) -> JsonMap {
    value.as_object().cloned().unwrap()
}

#[async_trait::async_trait]
impl DataStoreAPI for RecordingStore {
    async fn get(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        _session: &Session,
    ) -> DomainResult<JsonMap> {
        self.record(format!("get {typename} {}", Value::Object(lookup.clone())));
        Ok(selection.project(object(json!({ "id": "u1", "name": "a" }))))
    }

    async fn get_multiple(
        &self,
        typename: &str,
        args: &ListArgs,
        selection: &Selection,
        _session: &Session,
    ) -> DomainResult<Vec<JsonMap>> {
        self.record(format!("getMultiple {typename} limit={}", args.limit));
        Ok(vec![selection.project(object(json!({ "name": "a" })))])
    }

    async fn get_by_ids(
        &self,
        typename: &str,
        ids: &[Value],
        _selection: &Selection,
        _session: &Session,
    ) -> DomainResult<Vec<JsonMap>> {
        self.record(format!("getByIds {typename} {}", ids.len()));
        Ok(vec![])
    }

    async fn get_paginator(
        &self,
        typename: &str,
        args: &PaginationArgs,
        _selection: &PaginatorSelection,
        _session: &Session,
    ) -> DomainResult<Paginator> {
        self.record(format!("paginator {typename} count={}", args.page.count()));
        assert!(matches!(args.page, Page::First { .. }));
        Ok(Paginator {
            total: Some(1),
            start_cursor: Some("c".into()),
            end_cursor: Some("c".into()),
            edges: vec![Edge {
                node: object(json!({ "name": "a" })),
                cursor: "c".into(),
            }],
        })
    }

    async fn count(
        &self,
        typename: &str,
        _filter: Option<&WhereExpr>,
        _session: &Session,
    ) -> DomainResult<u64> {
        self.record(format!("count {typename}"));
        Ok(0)
    }

    async fn create(
        &self,
        typename: &str,
        args: &JsonMap,
        selection: &Selection,
        _session: &Session,
    ) -> DomainResult<JsonMap> {
        self.record(format!("create {typename} {}", Value::Object(args.clone())));
        Ok(selection.project(args.clone()))
    }

    async fn update(
        &self,
        typename: &str,
        lookup: &JsonMap,
        fields: &JsonMap,
        selection: &Selection,
        _session: &Session,
    ) -> DomainResult<JsonMap> {
        self.record(format!(
            "update {typename} {} {}",
            Value::Object(lookup.clone()),
            Value::Object(fields.clone())
        ));
        Ok(selection.project(fields.clone()))
    }

    async fn delete(
        &self,
        typename: &str,
        lookup: &JsonMap,
        _selection: &Selection,
        _session: &Session,
    ) -> DomainResult<JsonMap> {
        self.record(format!("delete {typename} {}", Value::Object(lookup.clone())));
        Ok(JsonMap::new())
    }
}

fn registry() -> Arc<Registry> {
    let mut builder = Registry::builder();
    builder.register(
        TypeDef::new("user")
            .field("name", FieldDef::scalar(SqlType::Text))
            .field("email", FieldDef::scalar(SqlType::Text).unique("email")),
    );
    builder.register(TypeDef::new("post").field("title", FieldDef::scalar(SqlType::Text)));
    builder.register_service(
        ServiceDef::new("user")
            .allow(OperationKey::Get, allow_all())
            .allow(OperationKey::GetMultiple, allow_all())
            .allow_by_default(logged_in()),
    );
    builder.register_service(ServiceDef::new("post"));
    builder.finalize().unwrap()
}

fn engine(store: Arc<RecordingStore>) -> GiraffeEngine {
    GiraffeEngine::builder(registry(), store).build().unwrap()
}

fn identity() -> Identity {
    Identity {
        id: json!("u1"),
        role: None,
        permissions: vec![],
        is_api_key: false,
    }
}

#[test]
fn standard_root_operations() {
    let engine = engine(Default::default());

    assert_eq!(
        vec![
            "getUser",
            "getMultipleUser",
            "getUserPaginator",
            "createUser",
            "updateUser",
            "deleteUser",
            "getPost",
            "getMultiplePost",
            "getPostPaginator",
            "createPost",
            "updatePost",
            "deletePost",
        ],
        engine.operation_names().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn request_runs_operations_in_order() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());
    let session = engine.new_session(Some(identity()));

    let output = engine
        .execute_request(
            &json!({
                "createUser": { "__args": { "name": "b" }, "name": true },
                "getUser": { "__args": { "id": "u1" }, "name": true },
                "getMultipleUser": { "name": true }
            }),
            &session,
        )
        .await
        .unwrap();

    assert_eq!(
        json!({
            "createUser": { "name": "b" },
            "getUser": { "name": "a" },
            "getMultipleUser": [{ "name": "a" }]
        }),
        Value::Object(output)
    );
    assert_eq!(
        vec![
            r#"create user {"name":"b"}"#.to_string(),
            r#"get user {"id":"u1"}"#.to_string(),
            "getMultiple user limit=20".to_string(),
        ],
        store.calls()
    );
}

#[tokio::test]
async fn denied_operation_never_reaches_the_store() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());

    let error = engine
        .execute_request(
            &json!({
                "getUser": { "__args": { "id": "u1" }, "id": true },
                "createUser": { "__args": { "name": "b" }, "id": true },
                "deleteUser": { "__args": { "id": "u1" }, "id": true }
            }),
            &Session::anonymous(),
        )
        .await
        .unwrap_err();

    assert_eq!("PermissionsError", error.kind().type_name());
    assert_eq!(
        Some("createUser".to_string()),
        error.to_client(false).field_path
    );
    assert_eq!(vec![r#"get user {"id":"u1"}"#.to_string()], store.calls());
}

#[tokio::test]
async fn services_without_rules_are_closed() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());
    let session = engine.new_session(Some(identity()));

    let error = engine
        .execute("getMultiplePost", &json!({ "title": true }), &session)
        .await
        .unwrap_err();
    assert_eq!("InitializationError", error.kind().type_name());
    assert_eq!("no access rule for post/getMultiple", error.kind().message());
    assert!(store.calls().is_empty());

    let session = Session::anonymous().with_identity(Identity {
        permissions: vec!["post/*".into()],
        ..identity()
    });
    engine
        .execute("getMultiplePost", &json!({ "title": true }), &session)
        .await
        .unwrap();
    assert_eq!(vec!["getMultiple post limit=20".to_string()], store.calls());
}

#[tokio::test]
async fn invalid_selection_is_rejected_before_the_store() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());

    let error = engine
        .execute(
            "getUser",
            &json!({ "__args": { "id": "u1" }, "nickname": true }),
            &Session::anonymous(),
        )
        .await
        .unwrap_err();

    assert_eq!("InvalidFieldError", error.kind().type_name());
    assert_eq!(
        Some("getUser.nickname".to_string()),
        error.to_client(false).field_path
    );
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn denied_callers_do_not_see_selection_errors() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());

    let error = engine
        .execute(
            "createUser",
            &json!({ "__args": { "name": "a" }, "nickname": true }),
            &Session::anonymous(),
        )
        .await
        .unwrap_err();

    assert_eq!("PermissionsError", error.kind().type_name());
    assert!(store.calls().is_empty());
}

#[test]
fn operation_names_are_upper_camel_case() {
    let mut builder = Registry::builder();
    builder.register(
        TypeDef::new("blogPost").field("publishedAt", FieldDef::scalar(SqlType::DateTime)),
    );
    builder.register_service(ServiceDef::new("blogPost").allow_by_default(allow_all()));
    let registry = builder.finalize().unwrap();

    assert_eq!(
        "published_at",
        registry
            .type_def("blogPost")
            .unwrap()
            .get_field("publishedAt")
            .unwrap()
            .sql()
            .unwrap()
            .column
            .as_str()
    );

    let engine = GiraffeEngine::builder(registry, Arc::new(RecordingStore::default()))
        .build()
        .unwrap();
    assert_eq!(
        vec![
            "getBlogPost",
            "getMultipleBlogPost",
            "getBlogPostPaginator",
            "createBlogPost",
            "updateBlogPost",
            "deleteBlogPost",
        ],
        engine.operation_names().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn unknown_root_operation() {
    let engine = engine(Default::default());
    let error = engine
        .execute("getComment", &json!(true), &Session::anonymous())
        .await
        .unwrap_err();

    assert_eq!("InvalidFieldError", error.kind().type_name());
}

#[tokio::test]
async fn update_requires_item_and_fields() {
    let store = Arc::new(RecordingStore::default());
    let engine = engine(store.clone());
    let session = engine.new_session(Some(identity()));

    let error = engine
        .execute(
            "updateUser",
            &json!({ "__args": { "id": "u1", "name": "c" }, "name": true }),
            &session,
        )
        .await
        .unwrap_err();
    assert_eq!("ArgsError", error.kind().type_name());

    let output = engine
        .execute(
            "updateUser",
            &json!({
                "__args": { "item": { "email": "a@b" }, "fields": { "name": "c" } },
                "name": true
            }),
            &session,
        )
        .await
        .unwrap();
    assert_eq!(json!({ "name": "c" }), output);
    assert_eq!(
        vec![r#"update user {"email":"a@b"} {"name":"c"}"#.to_string()],
        store.calls()
    );
}

#[tokio::test]
async fn paginator_renders_selected_parts() {
    let engine = engine(Default::default());

    let output = engine
        .execute(
            "getUserPaginator",
            &json!({
                "__args": { "first": 1 },
                "paginatorInfo": { "count": true, "endCursor": true },
                "edges": { "node": { "name": true } }
            }),
            &Session::anonymous(),
        )
        .await
        .unwrap();

    assert_eq!(
        json!({
            "paginatorInfo": { "count": 1, "endCursor": "c" },
            "edges": [{ "node": { "name": "a" } }]
        }),
        output
    );
}

struct CountUsers;

#[async_trait::async_trait]
impl RootOperation for CountUsers {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let count = ctx.store.count("user", None, ctx.session).await?;
        Ok(Value::from(count))
    }
}

#[tokio::test]
async fn custom_operations_share_the_permission_gate() {
    let store = Arc::new(RecordingStore::default());
    let engine = GiraffeEngine::builder(registry(), store.clone())
        .operation(
            "countUsers",
            with_permission("user", OperationKey::Create, Arc::new(CountUsers)),
        )
        .build()
        .unwrap();

    assert!(
        engine
            .execute("countUsers", &json!(true), &Session::anonymous())
            .await
            .is_err()
    );

    let session = engine.new_session(Some(identity()));
    assert_eq!(
        json!(0),
        engine
            .execute("countUsers", &json!(true), &session)
            .await
            .unwrap()
    );
    assert_eq!(vec!["count user".to_string()], store.calls());
}

#[test]
fn duplicate_custom_operation_fails_to_build() {
    let result = GiraffeEngine::builder(registry(), Arc::new(RecordingStore::default()))
        .operation(
            "getUser",
            with_permission("user", OperationKey::Get, Arc::new(CountUsers)),
        )
        .build();

    assert!(result.is_err());
}
