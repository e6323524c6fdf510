#![forbid(unsafe_code)]

use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use fnv::FnvHashMap;
use giraffeql_core::{
    Config, DomainResult, JsonMap, Session,
    data_store::{DataStoreAPI, Paginator},
    filter::WhereExpr,
    query_args::{ListArgs, PaginationArgs},
    registry::Registry,
    selection::{PaginatorSelection, Selection},
    system::ArcSystemApi,
};
use serde_json::Value;
use tokio_postgres::NoTls;
use tracing::{error, info, warn};

use crate::{
    client::{SqlClient, SqlConnector, SqlTransaction},
    pg_error::PgDataError,
    sql::Ident,
    transact::TransactCtx,
};

pub mod client;
pub mod hooks;
pub mod pg_error;
pub mod sql;
pub mod sql_value;

mod transact;

pub use deadpool_postgres;
pub use tokio_postgres;

use hooks::MutationHooks;

/// [DataStoreAPI] on PostgreSQL.
///
/// Every type of the registry is backed by a table of the same name.
/// Mutations run in their own transaction.
pub struct PgDataStore {
    registry: Arc<Registry>,
    connector: Arc<dyn SqlConnector>,
    system: ArcSystemApi,
    config: Config,
    hooks: FnvHashMap<ArcStr, Arc<dyn MutationHooks>>,
}

impl PgDataStore {
    pub fn new(
        registry: Arc<Registry>,
        connector: Arc<dyn SqlConnector>,
        system: ArcSystemApi,
        config: Config,
    ) -> Self {
        Self {
            registry,
            connector,
            system,
            config,
            hooks: Default::default(),
        }
    }

    pub fn with_hooks(mut self, typename: &str, hooks: Arc<dyn MutationHooks>) -> Self {
        self.hooks.insert(typename.into(), hooks);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn hooks_for(&self, typename: &str) -> Option<&Arc<dyn MutationHooks>> {
        self.hooks.get(typename)
    }

    async fn client(&self) -> DomainResult<Box<dyn SqlClient>> {
        Ok(self
            .connector
            .client()
            .await
            .map_err(PgDataError::Connection)?)
    }

    async fn begin(&self) -> DomainResult<Box<dyn SqlTransaction>> {
        Ok(self
            .connector
            .begin()
            .await
            .map_err(PgDataError::BeginTransaction)?)
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(txn: Box<dyn SqlTransaction>, result: DomainResult<T>) -> DomainResult<T> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(PgDataError::CommitTransaction)?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = txn.rollback().await {
                warn!("rollback failed: {rollback_error}");
            }
            Err(error)
        }
    }
}

#[async_trait]
impl DataStoreAPI for PgDataStore {
    async fn get(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        let client = self.client().await?;
        TransactCtx::new(self, client.as_ref(), session)
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
        let client = self.client().await?;
        TransactCtx::new(self, client.as_ref(), session)
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
        let client = self.client().await?;
        TransactCtx::new(self, client.as_ref(), session)
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
        let client = self.client().await?;
        TransactCtx::new(self, client.as_ref(), session)
            .fetch_page(typename, args, selection)
            .await
    }

    async fn count(
        &self,
        typename: &str,
        filter: Option<&WhereExpr>,
        session: &Session,
    ) -> DomainResult<u64> {
        let type_def = self.registry.type_def(typename)?;
        let client = self.client().await?;
        TransactCtx::new(self, client.as_ref(), session)
            .count_matching(type_def, filter)
            .await
    }

    async fn create(
        &self,
        typename: &str,
        args: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        let txn = self.begin().await?;
        let result = TransactCtx::new(self, txn.client(), session)
            .insert_record(typename, args, selection)
            .await;
        finish(txn, result).await
    }

    async fn update(
        &self,
        typename: &str,
        lookup: &JsonMap,
        fields: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        let txn = self.begin().await?;
        let result = TransactCtx::new(self, txn.client(), session)
            .update_record(typename, lookup, fields, selection)
            .await;
        finish(txn, result).await
    }

    async fn delete(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
        session: &Session,
    ) -> DomainResult<JsonMap> {
        let txn = self.begin().await?;
        let result = TransactCtx::new(self, txn.client(), session)
            .delete_record(typename, lookup, selection)
            .await;
        finish(txn, result).await
    }
}

/// Drop and create the database `db_name`, connecting through `master_config`.
pub async fn recreate_database(
    db_name: &str,
    master_config: &tokio_postgres::Config,
) -> anyhow::Result<()> {
    info!(
        "recreate database `{db_name}` (will hang if there are open connections to this database)"
    );

    let (client, connection) = master_config.connect(NoTls).await?;

    let join_handle = tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("connection error: {}", e);
        }
    });

    client
        .batch_execute(&format!("DROP DATABASE IF EXISTS {}", Ident(db_name)))
        .await?;
    client
        .batch_execute(&format!("CREATE DATABASE {}", Ident(db_name)))
        .await?;

    drop(client);
    join_handle.await?;

    Ok(())
}
