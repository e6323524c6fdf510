//! The permission gate in front of every root operation.

use std::{fmt::Debug, sync::Arc};

use fnv::FnvHashMap;
use serde_json::Value;

use crate::{DomainError, DomainResult, session::Session};

/// Grants every operation on every type
pub const WILDCARD_PERMISSION: &str = "*/*";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKey {
    Get,
    GetMultiple,
    Create,
    Update,
    Delete,
}

impl OperationKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::GetMultiple => "getMultiple",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// What an access rule gets to look at.
pub struct AccessCtx<'a> {
    pub session: &'a Session,
    pub typename: &'a str,
    pub operation: OperationKey,
    /// The `__args` of the root operation
    pub args: &'a Value,
    /// The raw query of the root operation
    pub query: &'a Value,
}

#[async_trait::async_trait]
pub trait AccessRule: Send + Sync {
    async fn allow(&self, ctx: &AccessCtx<'_>) -> DomainResult<bool>;
}

struct AllowAll;

#[async_trait::async_trait]
impl AccessRule for AllowAll {
    async fn allow(&self, _ctx: &AccessCtx<'_>) -> DomainResult<bool> {
        Ok(true)
    }
}

struct DenyAll;

#[async_trait::async_trait]
impl AccessRule for DenyAll {
    async fn allow(&self, _ctx: &AccessCtx<'_>) -> DomainResult<bool> {
        Ok(false)
    }
}

struct LoggedIn;

#[async_trait::async_trait]
impl AccessRule for LoggedIn {
    async fn allow(&self, ctx: &AccessCtx<'_>) -> DomainResult<bool> {
        Ok(ctx.session.identity().is_some())
    }
}

struct RoleIn(Vec<String>);

#[async_trait::async_trait]
impl AccessRule for RoleIn {
    async fn allow(&self, ctx: &AccessCtx<'_>) -> DomainResult<bool> {
        Ok(ctx
            .session
            .identity()
            .and_then(|identity| identity.role.as_deref())
            .is_some_and(|role| self.0.iter().any(|allowed| allowed == role)))
    }
}

pub fn allow_all() -> Arc<dyn AccessRule> {
    Arc::new(AllowAll)
}

pub fn deny_all() -> Arc<dyn AccessRule> {
    Arc::new(DenyAll)
}

pub fn logged_in() -> Arc<dyn AccessRule> {
    Arc::new(LoggedIn)
}

pub fn role_in(roles: &[&str]) -> Arc<dyn AccessRule> {
    Arc::new(RoleIn(roles.iter().map(|role| role.to_string()).collect()))
}

/// Access rules per operation, with an optional fallback rule.
///
/// An operation without a rule and without a fallback is denied.
#[derive(Clone, Default)]
pub struct AccessControlMap {
    rules: FnvHashMap<OperationKey, Arc<dyn AccessRule>>,
    fallback: Option<Arc<dyn AccessRule>>,
}

impl AccessControlMap {
    pub fn insert(&mut self, operation: OperationKey, rule: Arc<dyn AccessRule>) {
        self.rules.insert(operation, rule);
    }

    pub fn set_fallback(&mut self, rule: Arc<dyn AccessRule>) {
        self.fallback = Some(rule);
    }

    fn rule(&self, operation: OperationKey) -> Option<&Arc<dyn AccessRule>> {
        self.rules.get(&operation).or(self.fallback.as_ref())
    }
}

impl Debug for AccessControlMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlMap")
            .field("operations", &self.rules.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Check whether the session may perform the operation.
///
/// Granted permissions are checked first (`*/*`, `{type}/*`, `{type}/{operation}`),
/// then the access rule of the operation. Rule errors are reported as permission errors.
pub async fn check_permission(access: &AccessControlMap, ctx: &AccessCtx<'_>) -> DomainResult<()> {
    if let Some(identity) = ctx.session.identity() {
        let type_wildcard = format!("{}/*", ctx.typename);
        let operation = format!("{}/{}", ctx.typename, ctx.operation.as_str());

        if identity.has_permission(WILDCARD_PERMISSION)
            || identity.has_permission(&type_wildcard)
            || identity.has_permission(&operation)
        {
            return Ok(());
        }
    }

    let Some(rule) = access.rule(ctx.operation) else {
        return Err(DomainError::initialization(format!(
            "no access rule for {}/{}",
            ctx.typename,
            ctx.operation.as_str()
        )));
    };

    match rule.allow(ctx).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(insufficient_permissions()),
        Err(error) => Err(DomainError::permissions(error.kind().message())),
    }
}

fn insufficient_permissions() -> DomainError {
    DomainError::permissions("Insufficient permissions")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::Identity;

    fn ctx<'a>(session: &'a Session, operation: OperationKey, null: &'a Value) -> AccessCtx<'a> {
        AccessCtx {
            session,
            typename: "user",
            operation,
            args: null,
            query: null,
        }
    }

    fn session_with(permissions: &[&str], role: Option<&str>) -> Session {
        Session::anonymous().with_identity(Identity {
            id: json!("u1"),
            role: role.map(Into::into),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            is_api_key: false,
        })
    }

    #[tokio::test]
    async fn missing_rule_is_a_configuration_error() {
        let null = Value::Null;
        let session = session_with(&[], None);
        let error = check_permission(
            &AccessControlMap::default(),
            &ctx(&session, OperationKey::Get, &null),
        )
        .await
        .unwrap_err();

        assert_eq!("InitializationError", error.kind().type_name());
        assert_eq!("no access rule for user/get", error.kind().message());

        let session = session_with(&["user/get"], None);
        check_permission(
            &AccessControlMap::default(),
            &ctx(&session, OperationKey::Get, &null),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn granted_permissions_bypass_rules() {
        let null = Value::Null;
        let mut access = AccessControlMap::default();
        access.set_fallback(deny_all());

        for permission in ["*/*", "user/*", "user/create"] {
            let session = session_with(&[permission], None);
            check_permission(&access, &ctx(&session, OperationKey::Create, &null))
                .await
                .unwrap();
        }

        let session = session_with(&["user/get", "post/*"], None);
        assert!(
            check_permission(&access, &ctx(&session, OperationKey::Create, &null))
                .await
                .is_err()
        );
    }

    struct OwnersOnly;

    #[async_trait::async_trait]
    impl AccessRule for OwnersOnly {
        async fn allow(&self, _ctx: &AccessCtx<'_>) -> DomainResult<bool> {
            Err(DomainError::args("only owners may delete"))
        }
    }

    #[tokio::test]
    async fn rule_errors_become_permission_errors() {
        let null = Value::Null;
        let mut access = AccessControlMap::default();
        access.insert(OperationKey::Delete, Arc::new(OwnersOnly));
        access.set_fallback(role_in(&["admin"]));

        let session = session_with(&[], Some("admin"));
        check_permission(&access, &ctx(&session, OperationKey::Update, &null))
            .await
            .unwrap();

        let error = check_permission(&access, &ctx(&session, OperationKey::Delete, &null))
            .await
            .unwrap_err();
        assert_eq!(
            DomainError::permissions("only owners may delete"),
            error
        );
    }
}
