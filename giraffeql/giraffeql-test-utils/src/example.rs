//! A small social schema shared by the tests of every crate.

use std::sync::Arc;

use async_trait::async_trait;
use giraffeql_core::{
    DomainResult, JsonMap,
    permission::{OperationKey, allow_all, logged_in},
    registry::{
        FieldDef, FieldType, JoinPredicate, LinkReference, Registry, SqlType, TypeDef,
    },
    resolver::{FieldResolver, ResolveCtx},
    service::{SearchMode, ServiceDef},
    session::CURRENT_USER_ID_PARAM,
};
use serde_json::Value;

/// `name`, followed by the age in parentheses when known
pub struct DisplayName;

#[async_trait]
impl FieldResolver for DisplayName {
    async fn resolve(
        &self,
        _ctx: &ResolveCtx<'_>,
        parent: &JsonMap,
        _args: Option<&Value>,
    ) -> DomainResult<Value> {
        let name = parent.get("name").and_then(Value::as_str).unwrap_or_default();

        Ok(Value::String(match parent.get("age").and_then(Value::as_i64) {
            Some(age) => format!("{name} ({age})"),
            None => name.to_string(),
        }))
    }
}

/// The id stored in `reviewer`, whether or not the reviewer itself is selected
pub struct ReviewerId;

#[async_trait]
impl FieldResolver for ReviewerId {
    async fn resolve(
        &self,
        _ctx: &ResolveCtx<'_>,
        parent: &JsonMap,
        _args: Option<&Value>,
    ) -> DomainResult<Value> {
        Ok(parent.get("reviewer").cloned().unwrap_or(Value::Null))
    }
}

/// Types:
///
/// - `user`: `name`, `email` (unique, stored lowercase), `age`, `tags`, `displayName`,
///   `currentUserFollowLink`, timestamps and `createdBy`
/// - `post`: `title`, `score`, `reviewer` (batch loaded user), `reviewerId`,
///   `watchers` (batch loaded users), timestamps and `createdBy`
/// - `folder`: a tree through `parent`
/// - `userUserFollowLink`: `user` follows `target`
///
/// Every operation on every type is allowed, except that creating posts requires a
/// logged in identity.
pub fn example_registry() -> Arc<Registry> {
    let mut builder = Registry::builder();

    builder.register(
        TypeDef::new("user")
            .field("name", FieldDef::scalar(SqlType::Text).required())
            .field(
                "email",
                FieldDef::scalar(SqlType::Text)
                    .unique("email")
                    .getter("lower({column})")
                    .setter("lower({value})"),
            )
            .field("age", FieldDef::scalar(SqlType::Integer))
            .field("tags", FieldDef::scalar(SqlType::Json))
            .field(
                "displayName",
                FieldDef::computed(
                    FieldType::Scalar(SqlType::Text),
                    Arc::new(DisplayName),
                    ["name", "age"],
                ),
            )
            .field(
                "currentUserFollowLink",
                FieldDef::special_join(
                    "userUserFollowLink",
                    [
                        JoinPredicate::ParentColumn {
                            column: "target".into(),
                            parent_column: "id".into(),
                        },
                        JoinPredicate::SessionParam {
                            column: "user".into(),
                            param: CURRENT_USER_ID_PARAM.into(),
                        },
                    ],
                ),
            )
            .timestamps()
            .created_by("user"),
    );

    builder.register(
        TypeDef::new("post")
            .field("title", FieldDef::scalar(SqlType::Text).required())
            .field("score", FieldDef::scalar(SqlType::Decimal))
            .field("reviewer", FieldDef::record_loader("user"))
            .field(
                "reviewerId",
                FieldDef::computed(
                    FieldType::Scalar(SqlType::Text),
                    Arc::new(ReviewerId),
                    ["reviewer"],
                ),
            )
            .field("watchers", FieldDef::record_loader("user").array())
            .timestamps()
            .created_by("user"),
    );

    builder.register(
        TypeDef::new("folder")
            .field("name", FieldDef::scalar(SqlType::Text).required())
            .field("parent", FieldDef::join("folder")),
    );

    builder.register(TypeDef::link(
        "userUserFollowLink",
        [
            LinkReference::new("user", "user"),
            LinkReference::new("target", "user"),
        ],
    ));

    builder.register_service(
        ServiceDef::new("user")
            .allow_by_default(allow_all())
            .search("name", SearchMode::Regex)
            .search("email", SearchMode::Exact)
            .dependent("userUserFollowLink", "user")
            .dependent("userUserFollowLink", "target")
            .track_changes(),
    );
    builder.register_service(
        ServiceDef::new("post")
            .allow_by_default(allow_all())
            .allow(OperationKey::Create, logged_in())
            .search("title", SearchMode::Regex),
    );
    builder.register_service(
        ServiceDef::new("folder")
            .allow_by_default(allow_all())
            .recursive_dependent("parent"),
    );
    builder.register_service(ServiceDef::new("userUserFollowLink").allow_by_default(allow_all()));

    builder.finalize().expect("example registry is valid")
}
