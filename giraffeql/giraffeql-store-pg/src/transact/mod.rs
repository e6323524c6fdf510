use async_trait::async_trait;
use giraffeql_core::{
    DomainResult, JsonMap, Session,
    data_store::{DataStoreAPI, Paginator},
    filter::WhereExpr,
    query_args::{ListArgs, PaginationArgs},
    registry::{Registry, TypeDef},
    selection::{PaginatorSelection, Selection},
};
use serde_json::Value;
use tracing::debug;

use crate::{
    PgDataStore,
    client::{SqlClient, SqlError},
    pg_error::PgDataError,
    sql_value::SqlParams,
};

mod condition;
mod delete;
mod insert;
mod join_tree;
mod lookup;
mod order;
mod paginate;
mod query;
mod update;

/// One data store operation bound to a connection.
///
/// Reads run on a pooled connection, mutations on an open transaction. Resolvers, loaders and
/// hooks invoked during the operation get this context as their data store, so their
/// statements run on the same connection.
#[derive(Clone, Copy)]
pub(crate) struct TransactCtx<'a> {
    store: &'a PgDataStore,
    client: &'a dyn SqlClient,
    session: &'a Session,
}

impl<'a> TransactCtx<'a> {
    pub fn new(store: &'a PgDataStore, client: &'a dyn SqlClient, session: &'a Session) -> Self {
        Self {
            store,
            client,
            session,
        }
    }

    fn registry(&self) -> &'a Registry {
        &self.store.registry
    }

    fn type_def(&self, typename: &str) -> DomainResult<&'a TypeDef> {
        self.registry().type_def(typename)
    }

    fn with_session<'s>(&self, session: &'s Session) -> TransactCtx<'s>
    where
        'a: 's,
    {
        TransactCtx {
            store: self.store,
            client: self.client,
            session,
        }
    }

    async fn query(
        &self,
        sql: String,
        params: &SqlParams,
        error: fn(SqlError) -> PgDataError,
    ) -> DomainResult<Vec<JsonMap>> {
        debug!("{sql}");
        Ok(self
            .client
            .query(&sql, params.values())
            .await
            .map_err(error)?)
    }

    async fn execute(
        &self,
        sql: String,
        params: &SqlParams,
        error: fn(SqlError) -> PgDataError,
    ) -> DomainResult<u64> {
        debug!("{sql}");
        Ok(self
            .client
            .execute(&sql, params.values())
            .await
            .map_err(error)?)
    }
}

#[async_trait]
impl DataStoreAPI for TransactCtx<'_> {
    async fn get(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        self.with_session(session)
            .fetch_one(typename, lookup, selection)
            .await
    }

    async fn get_multiple(
        &self,
        typename: &str,
        args: &ListArgs,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<Vec<JsonMap>> {
        self.with_session(session)
            .fetch_list(typename, args, selection)
            .await
    }

    async fn get_by_ids(
        &self,
        typename: &str,
        ids: &[Value],
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<Vec<JsonMap>> {
        self.with_session(session)
            .fetch_by_ids(typename, ids, selection)
            .await
    }

    async fn get_paginator(
        &self,
        typename: &str,
        args: &PaginationArgs,
        selection: &PaginatorSelection,
        session: &Session,
    ) -> DomainResult<Paginator> {
        self.with_session(session)
            .fetch_page(typename, args, selection)
            .await
    }

    async fn count(
        &self,
        typename: &str,
        filter: Option<&WhereExpr>,
        session: &Session,
    ) -> DomainResult<u64> {
        let ctx = self.with_session(session);
        ctx.count_matching(ctx.type_def(typename)?, filter).await
    }

    async fn create(
        &self,
        typename: &str,
        args: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        self.with_session(session)
            .insert_record(typename, args, selection)
            .await
    }

    async fn update(
        &self,
        typename: &str,
        lookup: &JsonMap,
        fields: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        self.with_session(session)
            .update_record(typename, lookup, fields, selection)
            .await
    }

    async fn delete(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        self.with_session(session)
            .delete_record(typename, lookup, selection)
            .await
    }
}
