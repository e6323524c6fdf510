use std::sync::Arc;

use arcstr::ArcStr;
use heck::AsUpperCamelCase;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    Config, DomainError, DomainResult, JsonMap,
    data_store::{ArcDataStore, DataStoreAPI},
    permission::{AccessCtx, OperationKey, check_permission},
    query_args::{ListArgs, PaginationArgs},
    registry::{Registry, TypeDef},
    selection::{ARGS_KEY, PaginatorSelection, Selection},
    service::ServiceDef,
    session::{Identity, Session},
};

/// Parsed selection of a root operation
pub enum RootSelection {
    Records(Selection),
    Paginator(PaginatorSelection),
}

impl RootSelection {
    fn records(&self) -> DomainResult<&Selection> {
        match self {
            Self::Records(selection) => Ok(selection),
            Self::Paginator(_) => Err(DomainError::internal("expected a record selection")),
        }
    }
}

pub struct OperationCtx<'a> {
    pub registry: &'a Registry,
    pub store: &'a dyn DataStoreAPI,
    pub config: &'a Config,
    pub service: &'a ServiceDef,
    pub type_def: &'a TypeDef,
    pub selection: &'a RootSelection,
    pub args: Option<&'a Value>,
    pub session: &'a Session,
}

impl OperationCtx<'_> {
    fn args_object(&self, what: &str) -> DomainResult<&JsonMap> {
        match self.args {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(DomainError::args(format!("{what} must be an object"))),
        }
    }

    fn typename(&self) -> &str {
        self.type_def.name()
    }
}

/// The body of a root operation, without any access control.
#[async_trait::async_trait]
pub trait RootOperation: Send + Sync {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value>;
}

/// A root operation behind the permission gate.
pub struct GuardedOperation {
    typename: ArcStr,
    key: OperationKey,
    paginated: bool,
    op: Arc<dyn RootOperation>,
}

/// Put `op` behind the permission gate of `typename`'s service, checked as `key`.
pub fn with_permission(
    typename: &str,
    key: OperationKey,
    op: Arc<dyn RootOperation>,
) -> GuardedOperation {
    GuardedOperation {
        typename: typename.into(),
        key,
        paginated: false,
        op,
    }
}

impl GuardedOperation {
    fn paginated(mut self) -> Self {
        self.paginated = true;
        self
    }

    async fn execute(
        &self,
        engine: &GiraffeEngine,
        query: &Value,
        session: &Session,
    ) -> DomainResult<Value> {
        let registry = engine.registry.as_ref();
        let type_def = registry.type_def(&self.typename)?;
        let service = registry.service(&self.typename)?;

        // gate before the selection is validated
        check_permission(
            &service.access,
            &AccessCtx {
                session,
                typename: &self.typename,
                operation: self.key,
                args: query.get(ARGS_KEY).unwrap_or(&Value::Null),
                query,
            },
        )
        .await?;

        let (selection, args) = if self.paginated {
            let (selection, args) = PaginatorSelection::parse(registry, type_def, query)?;
            (RootSelection::Paginator(selection), args)
        } else {
            let (selection, args) = Selection::parse(registry, type_def, query)?;
            (RootSelection::Records(selection), args)
        };

        self.op
            .call(&OperationCtx {
                registry,
                store: engine.store.as_ref(),
                config: &engine.config,
                service,
                type_def,
                selection: &selection,
                args: args.as_ref(),
                session,
            })
            .await
    }
}

struct GetOp;

#[async_trait::async_trait]
impl RootOperation for GetOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let record = ctx
            .store
            .get(
                ctx.typename(),
                ctx.args_object("lookup")?,
                ctx.selection.records()?,
                ctx.session,
            )
            .await?;
        Ok(Value::Object(record))
    }
}

struct GetMultipleOp;

#[async_trait::async_trait]
impl RootOperation for GetMultipleOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let args = ListArgs::parse(ctx.args, ctx.service, ctx.config)?;
        let records = ctx
            .store
            .get_multiple(ctx.typename(), &args, ctx.selection.records()?, ctx.session)
            .await?;
        Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
    }
}

struct GetPaginatorOp;

#[async_trait::async_trait]
impl RootOperation for GetPaginatorOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let RootSelection::Paginator(selection) = ctx.selection else {
            return Err(DomainError::internal("expected a paginator selection"));
        };
        let args = PaginationArgs::parse(ctx.args, ctx.service, ctx.config)?;
        let paginator = ctx
            .store
            .get_paginator(ctx.typename(), &args, selection, ctx.session)
            .await?;
        Ok(paginator.render(selection))
    }
}

struct CreateOp;

#[async_trait::async_trait]
impl RootOperation for CreateOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let record = ctx
            .store
            .create(
                ctx.typename(),
                ctx.args_object("create arguments")?,
                ctx.selection.records()?,
                ctx.session,
            )
            .await?;
        Ok(Value::Object(record))
    }
}

struct UpdateOp;

#[async_trait::async_trait]
impl RootOperation for UpdateOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let args = ctx.args_object("update arguments")?;
        let (Some(Value::Object(item)), Some(Value::Object(fields))) =
            (args.get("item"), args.get("fields"))
        else {
            return Err(DomainError::args(
                "update requires `item` and `fields` objects",
            ));
        };

        let record = ctx
            .store
            .update(
                ctx.typename(),
                item,
                fields,
                ctx.selection.records()?,
                ctx.session,
            )
            .await?;
        Ok(Value::Object(record))
    }
}

struct DeleteOp;

#[async_trait::async_trait]
impl RootOperation for DeleteOp {
    async fn call(&self, ctx: &OperationCtx<'_>) -> DomainResult<Value> {
        let record = ctx
            .store
            .delete(
                ctx.typename(),
                ctx.args_object("lookup")?,
                ctx.selection.records()?,
                ctx.session,
            )
            .await?;
        Ok(Value::Object(record))
    }
}

/// Dispatches root operations by name to the data store.
pub struct GiraffeEngine {
    registry: Arc<Registry>,
    store: ArcDataStore,
    config: Config,
    operations: IndexMap<String, GuardedOperation>,
}

pub struct Builder {
    registry: Arc<Registry>,
    store: ArcDataStore,
    config: Config,
    operations: Vec<(String, GuardedOperation)>,
}

impl GiraffeEngine {
    pub fn builder(registry: Arc<Registry>, store: ArcDataStore) -> Builder {
        Builder {
            registry,
            store,
            config: Config::default(),
            operations: vec![],
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn new_session(&self, identity: Option<Identity>) -> Session {
        Session::new(identity, &self.config)
    }

    /// Execute one root operation.
    pub async fn execute(&self, name: &str, query: &Value, session: &Session) -> DomainResult<Value> {
        let operation = self.operations.get(name).ok_or_else(|| {
            DomainError::invalid_field(format!("unknown root operation `{name}`"))
        })?;

        debug!("execute {name}");

        operation
            .execute(self, query, session)
            .await
            .map_err(|error| error.at_field(name))
    }

    /// Execute every root operation of a request in order.
    ///
    /// The first error aborts the request, no partial data is returned.
    pub async fn execute_request(&self, body: &Value, session: &Session) -> DomainResult<JsonMap> {
        let Value::Object(operations) = body else {
            return Err(DomainError::args("request body must be an object"));
        };

        let mut output = JsonMap::with_capacity(operations.len());
        for (name, query) in operations {
            let value = self.execute(name, query, session).await.inspect_err(|error| {
                info!("{name} failed: {error}");
            })?;
            output.insert(name.clone(), value);
        }

        Ok(output)
    }
}

impl Builder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register an application defined root operation.
    pub fn operation(mut self, name: &str, operation: GuardedOperation) -> Self {
        self.operations.push((name.to_string(), operation));
        self
    }

    pub fn build(self) -> DomainResult<GiraffeEngine> {
        let mut operations: IndexMap<String, GuardedOperation> = IndexMap::new();

        for service in self.registry.services() {
            let typename = service.typename.as_str();
            let pascal = AsUpperCamelCase(typename).to_string();

            let standard = [
                (
                    format!("get{pascal}"),
                    with_permission(typename, OperationKey::Get, Arc::new(GetOp)),
                ),
                (
                    format!("getMultiple{pascal}"),
                    with_permission(typename, OperationKey::GetMultiple, Arc::new(GetMultipleOp)),
                ),
                (
                    format!("get{pascal}Paginator"),
                    with_permission(typename, OperationKey::GetMultiple, Arc::new(GetPaginatorOp))
                        .paginated(),
                ),
                (
                    format!("create{pascal}"),
                    with_permission(typename, OperationKey::Create, Arc::new(CreateOp)),
                ),
                (
                    format!("update{pascal}"),
                    with_permission(typename, OperationKey::Update, Arc::new(UpdateOp)),
                ),
                (
                    format!("delete{pascal}"),
                    with_permission(typename, OperationKey::Delete, Arc::new(DeleteOp)),
                ),
            ];

            for (name, operation) in standard {
                operations.insert(name, operation);
            }
        }

        for (name, operation) in self.operations {
            if operations.contains_key(&name) {
                return Err(DomainError::initialization(format!(
                    "root operation `{name}` defined twice"
                )));
            }
            self.registry.service(&operation.typename)?;
            operations.insert(name, operation);
        }

        Ok(GiraffeEngine {
            registry: self.registry,
            store: self.store,
            config: self.config,
            operations,
        })
    }
}
