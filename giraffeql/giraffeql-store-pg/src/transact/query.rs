use arcstr::ArcStr;
use fnv::FnvHashSet;
use futures_util::future::try_join_all;
use giraffeql_core::{
    DomainResult, JsonMap, Session,
    field_path::FieldPath,
    filter::{WhereExpr, WhereOperator, WherePredicate},
    query_args::{ListArgs, SortField},
    registry::{FieldDef, FieldKind, ID_FIELD, Registry, SqlType, TypeDef},
    resolver::{BatchLoader, FieldResolver, ResolveCtx},
    selection::Selection,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    pg_error::{PgDataError, PgModelError},
    sql::{Expr, Limit, OrderBy, Select},
    sql_value::SqlParams,
};

use super::{
    TransactCtx,
    join_tree::{JoinTree, ResolvedColumn},
    order::order_by,
    paginate::{LAST_ID_LABEL, cursor_condition, last_value_label},
};

/// Accumulates the parts of one SELECT rooted at a type.
pub struct SelectBuilder<'r, 's> {
    pub registry: &'r Registry,
    session: &'s Session,
    pub joins: JoinTree<'r>,
    pub params: SqlParams,
    conditions: Vec<Expr<'r>>,
}

impl<'r, 's> SelectBuilder<'r, 's> {
    pub fn new(registry: &'r Registry, root_def: &'r TypeDef, session: &'s Session) -> Self {
        Self {
            registry,
            session,
            joins: JoinTree::new(root_def),
            params: SqlParams::default(),
            conditions: vec![],
        }
    }

    pub fn column(&mut self, path: &FieldPath) -> DomainResult<ResolvedColumn<'r>> {
        self.joins
            .resolve(self.registry, path, self.session, &mut self.params)
    }

    pub fn filter(&mut self, filter: &WhereExpr) -> DomainResult<()> {
        let condition = self.compile_where(filter)?;
        self.conditions.push(condition);
        Ok(())
    }

    pub fn and_where(&mut self, condition: Expr<'r>) {
        self.conditions.push(condition);
    }

    /// Finish the statement. Grouped statements collapse the duplicates link joins produce.
    pub fn build(
        self,
        expressions: Vec<Expr<'r>>,
        order_by: OrderBy<'r>,
        limit: Limit,
        grouped: bool,
    ) -> (Select<'r>, SqlParams) {
        let group_by = if grouped && self.joins.has_links() {
            self.joins.group_by()
        } else {
            vec![]
        };

        let select = Select {
            expressions: expressions.into(),
            from: vec![self.joins.from_item()],
            where_: if self.conditions.is_empty() {
                None
            } else {
                Some(Expr::And(self.conditions))
            },
            group_by,
            order_by,
            limit,
        };

        (select, self.params)
    }
}

/// Column expression as it should be read back: decimals are read as floats.
pub fn readable(expr: Expr<'_>, sql_type: SqlType) -> Expr<'_> {
    match sql_type {
        SqlType::Decimal => Expr::cast(expr, "float8"),
        _ => expr,
    }
}

struct PlanColumn {
    label: String,
    path: Vec<ArcStr>,
}

/// A field filled in after the statement ran.
enum Deferred<'r> {
    Resolve {
        path: Vec<ArcStr>,
        owner: &'r TypeDef,
        field: &'r FieldDef,
        resolver: &'r dyn FieldResolver,
        args: Option<Value>,
    },
    Load {
        path: Vec<ArcStr>,
        owner: &'r TypeDef,
        field: &'r FieldDef,
        loader: &'r dyn BatchLoader,
        selection: Selection,
    },
}

/// How the flat result columns map back into nested records.
#[derive(Default)]
pub struct RowPlan<'r> {
    expressions: Vec<Expr<'r>>,
    columns: Vec<PlanColumn>,
    extras: Vec<String>,
    planned: FnvHashSet<String>,
    /// Paths of joined objects, parents before children
    joined: Vec<Vec<ArcStr>>,
    deferred: Vec<Deferred<'r>>,
}

impl<'r> RowPlan<'r> {
    pub fn plan_selection(
        &mut self,
        builder: &mut SelectBuilder<'r, '_>,
        type_def: &'r TypeDef,
        prefix: &FieldPath,
        selection: &Selection,
    ) -> DomainResult<()> {
        self.add_column(builder, &prefix.child(ID_FIELD))?;

        for (name, field_selection) in selection.iter() {
            let field = type_def.get_field(name).ok_or_else(|| {
                PgModelError::ColumnNotFound(
                    type_def.name().to_string(),
                    type_def.table().to_string(),
                    name.to_string(),
                )
            })?;
            let path = prefix.child(name.clone());

            match &field.kind {
                FieldKind::Scalar(_) => self.add_column(builder, &path)?,
                FieldKind::Join(_) => match &field_selection.nested {
                    None => self.add_column(builder, &path)?,
                    Some(nested) => {
                        let target = target_of(builder.registry, field)?;
                        self.joined.push(names(&path));
                        self.plan_selection(builder, target, &path, nested)?;
                    }
                },
                FieldKind::SpecialJoin(_) => {
                    let target = target_of(builder.registry, field)?;
                    let id_only = Selection::leaves([ID_FIELD]);
                    self.joined.push(names(&path));
                    self.plan_selection(
                        builder,
                        target,
                        &path,
                        field_selection.nested.as_ref().unwrap_or(&id_only),
                    )?;
                }
                FieldKind::Dataloader { loader, .. } => {
                    self.add_column(builder, &path)?;
                    if let Some(nested) = &field_selection.nested {
                        self.deferred.push(Deferred::Load {
                            path: names(&path),
                            owner: type_def,
                            field,
                            loader: loader.as_ref(),
                            selection: nested.clone(),
                        });
                    }
                }
                FieldKind::Computed {
                    resolver,
                    required_fields,
                } => {
                    for required in required_fields {
                        self.add_column(builder, &prefix.concat(required))?;
                    }
                    self.deferred.push(Deferred::Resolve {
                        path: names(&path),
                        owner: type_def,
                        field,
                        resolver: resolver.as_ref(),
                        args: field_selection.args.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn add_column(
        &mut self,
        builder: &mut SelectBuilder<'r, '_>,
        path: &FieldPath,
    ) -> DomainResult<()> {
        if !self.planned.insert(path.to_string()) {
            return Ok(());
        }

        let column = builder.column(path)?;
        let label = format!("c{}", self.columns.len());
        self.expressions.push(Expr::as_(
            readable(column.expr, column.sql.sql_type),
            label.clone(),
        ));
        self.columns.push(PlanColumn {
            label,
            path: names(path),
        });
        Ok(())
    }

    /// Select an expression that is not part of the record
    pub fn add_extra(&mut self, label: String, expr: Expr<'r>) {
        self.expressions.push(Expr::as_(expr, label.clone()));
        self.extras.push(label);
    }

    fn take_expressions(&mut self) -> Vec<Expr<'r>> {
        std::mem::take(&mut self.expressions)
    }

    fn unflatten(&self, mut row: JsonMap) -> DomainResult<FetchedRow> {
        let mut record = JsonMap::new();
        for column in &self.columns {
            let value = take_column(&mut row, &column.label)?;
            insert_at(&mut record, &column.path, value);
        }

        let mut extras = JsonMap::new();
        for label in &self.extras {
            extras.insert(label.clone(), take_column(&mut row, label)?);
        }

        // A LEFT JOIN that matched nothing is a null object, not an object of nulls
        for path in &self.joined {
            let Some((last, init)) = path.split_last() else {
                continue;
            };
            if let Some(parent) = object_at_mut(&mut record, init) {
                let unmatched = match parent.get(last.as_str()) {
                    Some(Value::Object(object)) => {
                        object.get(ID_FIELD).is_none_or(Value::is_null)
                    }
                    _ => false,
                };
                if unmatched {
                    parent.insert(last.to_string(), Value::Null);
                }
            }
        }

        Ok(FetchedRow { record, extras })
    }
}

pub struct FetchedRow {
    pub record: JsonMap,
    /// Values selected with [RowPlan::add_extra]
    pub extras: JsonMap,
}

/// What to read in one statement.
pub struct Fetch<'q> {
    pub selection: &'q Selection,
    pub filter: Option<&'q WhereExpr>,
    pub sort: Vec<SortField>,
    /// Start after these values of the sort columns
    pub after: Option<Vec<Value>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Select the sort values of each row as extras. The last sort column must be `id`.
    pub cursor_columns: bool,
}

impl<'q> Fetch<'q> {
    pub fn new(selection: &'q Selection) -> Self {
        Self {
            selection,
            filter: None,
            sort: vec![],
            after: None,
            limit: None,
            offset: None,
            cursor_columns: false,
        }
    }
}

impl<'a> TransactCtx<'a> {
    pub(crate) async fn fetch(
        &self,
        type_def: &'a TypeDef,
        fetch: Fetch<'_>,
    ) -> DomainResult<Vec<FetchedRow>> {
        let mut builder = SelectBuilder::new(self.registry(), type_def, self.session);
        let mut plan = RowPlan::default();
        plan.plan_selection(&mut builder, type_def, &FieldPath::default(), fetch.selection)?;

        if let Some(filter) = fetch.filter {
            builder.filter(filter)?;
        }

        let sort_columns = builder.sort_columns(&fetch.sort)?;

        if let Some(after) = &fetch.after {
            let condition = cursor_condition(&mut builder.params, &sort_columns, after)?;
            builder.and_where(condition);
        }

        if fetch.cursor_columns {
            for (index, column) in sort_columns.iter().enumerate() {
                let label = if index + 1 == sort_columns.len() {
                    LAST_ID_LABEL.to_string()
                } else {
                    last_value_label(index)
                };
                plan.add_extra(label, readable(column.expr.clone(), column.sql_type));
            }
        }

        let (select, params) = builder.build(
            plan.take_expressions(),
            order_by(&sort_columns),
            Limit {
                limit: fetch.limit,
                offset: fetch.offset,
            },
            true,
        );

        let rows = self
            .query(select.to_string(), &params, PgDataError::Query)
            .await?;

        let mut fetched = rows
            .into_iter()
            .map(|row| plan.unflatten(row))
            .collect::<DomainResult<Vec<_>>>()?;

        if !fetched.is_empty() {
            self.resolve_deferred(&plan, &mut fetched).await?;
            self.load_deferred(&plan, &mut fetched).await?;
        }

        for row in &mut fetched {
            row.record = fetch.selection.project(std::mem::take(&mut row.record));
        }

        Ok(fetched)
    }

    pub(crate) async fn fetch_list(
        &self,
        typename: &str,
        args: &ListArgs,
        selection: &Selection,
    ) -> DomainResult<Vec<JsonMap>> {
        let type_def = self.type_def(typename)?;
        let mut sort = args.sort.clone();
        sort.push(SortField::asc(ID_FIELD));

        let rows = self
            .fetch(
                type_def,
                Fetch {
                    filter: args.filter.as_ref(),
                    sort,
                    limit: Some(args.limit),
                    offset: Some(args.offset).filter(|offset| *offset > 0),
                    ..Fetch::new(selection)
                },
            )
            .await?;

        Ok(rows.into_iter().map(|row| row.record).collect())
    }

    /// Records in no particular order. The selection always gets `id`.
    pub(crate) async fn fetch_by_ids(
        &self,
        typename: &str,
        ids: &[Value],
        selection: &Selection,
    ) -> DomainResult<Vec<JsonMap>> {
        let ids: Vec<Value> = ids.iter().filter(|id| !id.is_null()).cloned().collect();
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let type_def = self.type_def(typename)?;
        let selection = selection.clone().with_leaf(ID_FIELD);
        let filter = WhereExpr::Predicate(WherePredicate {
            field: FieldPath::single(ID_FIELD),
            operator: WhereOperator::In,
            value: Value::Array(ids),
        });

        let rows = self
            .fetch(
                type_def,
                Fetch {
                    filter: Some(&filter),
                    ..Fetch::new(&selection)
                },
            )
            .await?;

        Ok(rows.into_iter().map(|row| row.record).collect())
    }

    /// Run the batch loaders, one call per field and selection.
    async fn load_deferred(&self, plan: &RowPlan<'a>, rows: &mut [FetchedRow]) -> DomainResult<()> {
        struct Batch<'p, 'r> {
            owner: &'r TypeDef,
            field: &'r FieldDef,
            loader: &'r dyn BatchLoader,
            selection: &'p Selection,
            paths: Vec<&'p [ArcStr]>,
        }

        let mut batches: Vec<Batch> = vec![];
        for deferred in &plan.deferred {
            let Deferred::Load {
                path,
                owner,
                field,
                loader,
                selection,
            } = deferred
            else {
                continue;
            };

            match batches
                .iter_mut()
                .find(|batch| std::ptr::eq(batch.field, *field) && batch.selection == selection)
            {
                Some(batch) => batch.paths.push(path.as_slice()),
                None => batches.push(Batch {
                    owner: *owner,
                    field: *field,
                    loader: *loader,
                    selection,
                    paths: vec![path.as_slice()],
                }),
            }
        }

        for batch in batches {
            self.session.check_budget()?;

            let mut seen = FnvHashSet::default();
            let mut ids = vec![];
            for row in rows.iter() {
                for path in &batch.paths {
                    let referenced = match value_at(&row.record, path) {
                        Some(Value::Array(items)) => items.iter().collect(),
                        Some(Value::Null) | None => vec![],
                        Some(id) => vec![id],
                    };
                    for id in referenced {
                        if !id.is_null() && seen.insert(id.to_string()) {
                            ids.push(id.clone());
                        }
                    }
                }
            }

            if ids.is_empty() {
                continue;
            }

            let ctx = ResolveCtx {
                store: self,
                session: self.session,
                owner: batch.owner,
                field: batch.field,
            };
            let loaded = batch
                .loader
                .load(&ctx, &ids, &batch.selection.clone().with_leaf(ID_FIELD))
                .await
                .map_err(|error| match batch.paths.first() {
                    Some(path) => error.at_path(path.iter().cloned()),
                    None => error,
                })?;

            let by_id: fnv::FnvHashMap<String, JsonMap> = loaded
                .into_iter()
                .filter_map(|record| Some((record.get(ID_FIELD)?.to_string(), record)))
                .collect();
            let resolve = |id: &Value| {
                by_id
                    .get(&id.to_string())
                    .map(|record| Value::Object(batch.selection.project(record.clone())))
            };

            let mut dropped = 0;
            for row in rows.iter_mut() {
                for path in &batch.paths {
                    let Some(slot) = value_at_mut(&mut row.record, path) else {
                        continue;
                    };
                    *slot = match slot.take() {
                        Value::Array(items) => Value::Array(
                            items
                                .iter()
                                .filter_map(|id| {
                                    let record = resolve(id);
                                    if record.is_none() {
                                        dropped += 1;
                                    }
                                    record
                                })
                                .collect(),
                        ),
                        Value::Null => Value::Null,
                        id => resolve(&id).unwrap_or(Value::Null),
                    };
                }
            }

            if dropped > 0 {
                debug!(
                    "dropped {dropped} unresolved references of `{}.{}`",
                    batch.owner.name(),
                    batch.field.name
                );
            }
        }

        Ok(())
    }

    /// Run the field resolvers, shallow fields first.
    async fn resolve_deferred(
        &self,
        plan: &RowPlan<'a>,
        rows: &mut [FetchedRow],
    ) -> DomainResult<()> {
        let mut resolves: Vec<_> = plan
            .deferred
            .iter()
            .filter_map(|deferred| match deferred {
                Deferred::Resolve {
                    path,
                    owner,
                    field,
                    resolver,
                    args,
                } => Some((path, *owner, *field, *resolver, args)),
                Deferred::Load { .. } => None,
            })
            .collect();
        resolves.sort_by_key(|(path, ..)| path.len());

        for (path, owner, field, resolver, args) in resolves {
            let Some((name, parent_path)) = path.split_last() else {
                continue;
            };
            let ctx = ResolveCtx {
                store: self,
                session: self.session,
                owner,
                field,
            };

            let values = try_join_all(rows.iter().map(|row| {
                let ctx = &ctx;
                async move {
                    match object_at(&row.record, parent_path) {
                        Some(parent) => resolver.resolve(ctx, parent, args.as_ref()).await.map(Some),
                        None => Ok(None),
                    }
                }
            }))
            .await
            .map_err(|error| error.at_path(path.iter().cloned()))?;

            for (row, value) in rows.iter_mut().zip(values) {
                if let Some(value) = value {
                    if let Some(parent) = object_at_mut(&mut row.record, parent_path) {
                        parent.insert(name.to_string(), value);
                    }
                }
            }
        }

        Ok(())
    }
}

fn target_of<'r>(registry: &'r Registry, field: &FieldDef) -> DomainResult<&'r TypeDef> {
    let type_ref = field
        .object_type()
        .ok_or_else(|| PgModelError::NoObjectType(field.name.to_string()))?;
    registry.resolve(type_ref)
}

fn names(path: &FieldPath) -> Vec<ArcStr> {
    path.field_names().cloned().collect()
}

fn take_column(row: &mut JsonMap, label: &str) -> DomainResult<Value> {
    Ok(row
        .remove(label)
        .ok_or_else(|| PgDataError::MissingColumn(label.to_string()))?)
}

fn insert_at(record: &mut JsonMap, path: &[ArcStr], value: Value) {
    let Some((last, init)) = path.split_last() else {
        return;
    };

    let mut current = record;
    for segment in init {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        match entry {
            Value::Object(object) => current = object,
            _ => return,
        }
    }

    current.insert(last.to_string(), value);
}

fn object_at<'m>(record: &'m JsonMap, path: &[ArcStr]) -> Option<&'m JsonMap> {
    let mut current = record;
    for segment in path {
        match current.get(segment.as_str()) {
            Some(Value::Object(object)) => current = object,
            _ => return None,
        }
    }
    Some(current)
}

fn object_at_mut<'m>(record: &'m mut JsonMap, path: &[ArcStr]) -> Option<&'m mut JsonMap> {
    let mut current = record;
    for segment in path {
        match current.get_mut(segment.as_str()) {
            Some(Value::Object(object)) => current = object,
            _ => return None,
        }
    }
    Some(current)
}

fn value_at<'m>(record: &'m JsonMap, path: &[ArcStr]) -> Option<&'m Value> {
    let (last, init) = path.split_last()?;
    object_at(record, init)?.get(last.as_str())
}

fn value_at_mut<'m>(record: &'m mut JsonMap, path: &[ArcStr]) -> Option<&'m mut Value> {
    let (last, init) = path.split_last()?;
    object_at_mut(record, init)?.get_mut(last.as_str())
}
