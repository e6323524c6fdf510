//! The demo schema served by the binary.
//!
//! Tables are expected to exist already, one per type with snake_case columns.

use std::sync::Arc;

use async_trait::async_trait;
use giraffeql_core::{
    DomainError, DomainResult, JsonMap,
    filter::WhereExpr,
    permission::{OperationKey, allow_all, logged_in, role_in},
    registry::{
        FieldDef, FieldType, ID_FIELD, JoinPredicate, LinkReference, Registry, SqlType, TypeDef,
    },
    resolver::{FieldResolver, ResolveCtx},
    service::{SearchMode, ServiceDef},
    session::CURRENT_USER_ID_PARAM,
};
use serde_json::{Value, json};

const FOLLOW_LINK: &str = "userUserFollowLink";

/// Number of users following the parent user
struct FollowerCount;

#[async_trait]
impl FieldResolver for FollowerCount {
    async fn resolve(
        &self,
        ctx: &ResolveCtx<'_>,
        parent: &JsonMap,
        _args: Option<&Value>,
    ) -> DomainResult<Value> {
        let id = parent
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| DomainError::internal("followerCount without parent id"))?;
        let filter = WhereExpr::eq("target", id);

        let count = ctx.store.count(FOLLOW_LINK, Some(&filter), ctx.session).await?;
        Ok(Value::from(count))
    }
}

pub fn demo_registry() -> DomainResult<Arc<Registry>> {
    let mut builder = Registry::builder();

    builder.register(
        TypeDef::new("user")
            .field("name", FieldDef::scalar(SqlType::Text).required())
            .field(
                "email",
                FieldDef::scalar(SqlType::Text)
                    .required()
                    .unique("email")
                    .getter("lower({column})")
                    .setter("lower({value})")
                    .nest_hidden(),
            )
            .field(
                "role",
                FieldDef::scalar(SqlType::Text)
                    .required()
                    .default_value(json!("member"))
                    .not_updateable(),
            )
            .field(
                "isActive",
                FieldDef::scalar(SqlType::Boolean)
                    .required()
                    .default_value(json!(true)),
            )
            .field(
                "followerCount",
                FieldDef::computed(
                    FieldType::Scalar(SqlType::Integer),
                    Arc::new(FollowerCount),
                    [ID_FIELD],
                ),
            )
            .field(
                "currentUserFollowLink",
                FieldDef::special_join(
                    FOLLOW_LINK,
                    [
                        JoinPredicate::ParentColumn {
                            column: "target".into(),
                            parent_column: ID_FIELD.into(),
                        },
                        JoinPredicate::SessionParam {
                            column: "user".into(),
                            param: CURRENT_USER_ID_PARAM.into(),
                        },
                    ],
                ),
            )
            .timestamps(),
    );

    builder.register(
        TypeDef::new("post")
            .field("title", FieldDef::scalar(SqlType::Text).required())
            .field("body", FieldDef::scalar(SqlType::Text))
            .field("score", FieldDef::scalar(SqlType::Decimal))
            .field(
                "published",
                FieldDef::scalar(SqlType::Boolean)
                    .required()
                    .default_value(json!(false)),
            )
            .field("tags", FieldDef::scalar(SqlType::Json))
            .field("folder", FieldDef::join("folder"))
            .field("reviewer", FieldDef::record_loader("user"))
            .timestamps()
            .created_by("user"),
    );

    builder.register(
        TypeDef::new("folder")
            .serial_id()
            .field("name", FieldDef::scalar(SqlType::Text).required())
            .field("parent", FieldDef::join("folder"))
            .timestamps()
            .created_by("user"),
    );

    builder.register(TypeDef::link(
        FOLLOW_LINK,
        [
            LinkReference::new("user", "user"),
            LinkReference::new("target", "user"),
        ],
    ));

    builder.register_service(
        ServiceDef::new("user")
            .allow(OperationKey::Get, allow_all())
            .allow(OperationKey::GetMultiple, allow_all())
            .allow_by_default(role_in(&["admin"]))
            .search("name", SearchMode::Regex)
            .search("email", SearchMode::Exact)
            .dependent(FOLLOW_LINK, "user")
            .dependent(FOLLOW_LINK, "target")
            .dependent("post", "createdBy")
            .track_changes(),
    );
    builder.register_service(
        ServiceDef::new("post")
            .allow(OperationKey::Get, allow_all())
            .allow(OperationKey::GetMultiple, allow_all())
            .allow(OperationKey::Delete, role_in(&["admin"]))
            .allow_by_default(logged_in())
            .search("title", SearchMode::Regex),
    );
    builder.register_service(
        ServiceDef::new("folder")
            .allow_by_default(logged_in())
            .dependent("post", "folder")
            .recursive_dependent("parent"),
    );
    builder.register_service(ServiceDef::new(FOLLOW_LINK).allow_by_default(logged_in()));

    builder.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_registry_is_valid() {
        let registry = demo_registry().unwrap();

        assert_eq!(4, registry.services().count());
        assert!(
            registry
                .type_def("user")
                .unwrap()
                .unique_keys()
                .iter()
                .any(|key| key.name == "email")
        );
    }
}
