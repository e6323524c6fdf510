//! Application supplied resolution of computed and batch-loaded fields.

use serde_json::Value;

use crate::{
    DomainError, DomainResult, JsonMap,
    data_store::DataStoreAPI,
    registry::{FieldDef, TypeDef},
    selection::Selection,
    session::Session,
};

/// What a resolver or loader gets to work with.
pub struct ResolveCtx<'a> {
    pub store: &'a dyn DataStoreAPI,
    pub session: &'a Session,
    /// The type owning the field being resolved
    pub owner: &'a TypeDef,
    pub field: &'a FieldDef,
}

/// Computes a field value from its parent row.
///
/// The parent row contains at least the field's declared required fields.
#[async_trait::async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(
        &self,
        ctx: &ResolveCtx<'_>,
        parent: &JsonMap,
        args: Option<&Value>,
    ) -> DomainResult<Value>;
}

/// Loads the records referenced by a dataloader field, for many parent rows at once.
#[async_trait::async_trait]
pub trait BatchLoader: Send + Sync {
    /// Load the records with the given ids. Every returned record must include its `id`.
    /// Ids without a record are left out.
    async fn load(
        &self,
        ctx: &ResolveCtx<'_>,
        ids: &[Value],
        selection: &Selection,
    ) -> DomainResult<Vec<JsonMap>>;
}

/// Loads records of the field's object type from the data store.
pub struct RecordLoader;

#[async_trait::async_trait]
impl BatchLoader for RecordLoader {
    async fn load(
        &self,
        ctx: &ResolveCtx<'_>,
        ids: &[Value],
        selection: &Selection,
    ) -> DomainResult<Vec<JsonMap>> {
        let target = ctx.field.object_type().ok_or_else(|| {
            DomainError::initialization(format!("`{}` has no object type", ctx.field.name))
        })?;

        ctx.store
            .get_by_ids(target.name(), ids, selection, ctx.session)
            .await
    }
}
