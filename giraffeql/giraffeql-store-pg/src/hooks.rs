use async_trait::async_trait;
use giraffeql_core::{DomainResult, JsonMap, Session, data_store::DataStoreAPI};
use serde_json::Value;

use crate::client::SqlClient;

/// What a mutation hook gets to work with.
///
/// `store` and `client` are bound to the mutation's transaction, so anything a hook
/// writes commits or rolls back together with the mutation.
pub struct HookCtx<'a> {
    pub typename: &'a str,
    pub id: &'a Value,
    /// The arguments of the mutation
    pub args: &'a JsonMap,
    pub store: &'a dyn DataStoreAPI,
    pub client: &'a dyn SqlClient,
    pub session: &'a Session,
}

/// Per-type side effects of create, update and delete.
///
/// A hook error aborts the mutation.
#[async_trait]
pub trait MutationHooks: Send + Sync {
    async fn after_create(&self, _ctx: &HookCtx<'_>) -> DomainResult<()> {
        Ok(())
    }

    /// `changes` is only computed for services tracking changes.
    async fn after_update(
        &self,
        _ctx: &HookCtx<'_>,
        _changes: Option<&JsonMap>,
    ) -> DomainResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _ctx: &HookCtx<'_>) -> DomainResult<()> {
        Ok(())
    }
}
