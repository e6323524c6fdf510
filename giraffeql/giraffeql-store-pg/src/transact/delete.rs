use fnv::FnvHashSet;
use giraffeql_core::{
    DomainResult, JsonMap,
    registry::{FieldDef, ID_FIELD, SqlType, TypeDef},
    selection::Selection,
    service::Dependent,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    hooks::HookCtx,
    pg_error::{PgDataError, PgInputError, PgModelError},
    sql::{self, Expr},
    sql_value::{SqlParams, SqlVal},
};

use super::TransactCtx;

fn bind_key<'r>(params: &mut SqlParams, value: &Value, sql_type: SqlType) -> DomainResult<Expr<'r>> {
    let value = SqlVal::from_json(value, sql_type)
        .map_err(|msg| PgInputError::InvalidValue(ID_FIELD.into(), msg))?;
    Ok(params.bind(value, sql_type))
}

impl<'a> TransactCtx<'a> {
    pub(crate) async fn delete_record(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
    ) -> DomainResult<JsonMap> {
        let type_def = self.type_def(typename)?;
        let id = self.resolve_id(type_def, lookup).await?;

        let record = if selection.is_empty() {
            JsonMap::new()
        } else {
            self.fetch_by_id(type_def, &id, selection).await?
        };

        if let Some(hooks) = self.store.hooks_for(typename) {
            hooks
                .before_delete(&HookCtx {
                    typename,
                    id: &id,
                    args: lookup,
                    store: self,
                    client: self.client,
                    session: self.session,
                })
                .await?;
        }

        if let Ok(service) = self.registry().service(typename) {
            for dependent in &service.dependents {
                self.session.check_budget()?;
                if dependent.recursive {
                    self.delete_subtree(dependent, &id).await?;
                } else {
                    self.delete_dependents(dependent, &id).await?;
                }
            }
        }

        let mut params = SqlParams::default();
        let delete = sql::Delete {
            from: sql::TableName(type_def.table()),
            where_: Some(Expr::eq(
                Expr::path1(ID_FIELD),
                bind_key(&mut params, &id, type_def.id_kind().sql_type())?,
            )),
            returning: vec![],
        };
        let deleted = self
            .execute(delete.to_string(), &params, PgDataError::Delete)
            .await?;
        debug!("deleted {deleted} `{typename}`");

        Ok(record)
    }

    fn dependent_column(
        &self,
        dependent: &Dependent,
    ) -> DomainResult<(&'a TypeDef, &'a str, SqlType)> {
        let def = self.type_def(&dependent.typename)?;
        let sql = def
            .get_field(&dependent.field)
            .and_then(FieldDef::sql)
            .ok_or_else(|| PgModelError::NotSqlField(dependent.field.to_string()))?;

        Ok((def, sql.column.as_str(), sql.sql_type))
    }

    /// Delete the rows referencing `id` through the dependent's field.
    async fn delete_dependents(&self, dependent: &Dependent, id: &Value) -> DomainResult<()> {
        let (def, column, sql_type) = self.dependent_column(dependent)?;

        let mut params = SqlParams::default();
        let delete = sql::Delete {
            from: sql::TableName(def.table()),
            where_: Some(Expr::eq(
                Expr::path1(column),
                bind_key(&mut params, id, sql_type)?,
            )),
            returning: vec![],
        };
        let deleted = self
            .execute(delete.to_string(), &params, PgDataError::Delete)
            .await?;
        debug!("deleted {deleted} dependent `{}`", def.name());

        Ok(())
    }

    /// Delete every descendant of `id` in a self-referential tree, level by level.
    async fn delete_subtree(&self, dependent: &Dependent, id: &Value) -> DomainResult<()> {
        let (def, column, sql_type) = self.dependent_column(dependent)?;
        let id_type = def.id_kind().sql_type();

        let mut seen: FnvHashSet<String> = FnvHashSet::default();
        seen.insert(id.to_string());
        let mut descendants: Vec<Value> = vec![];
        let mut frontier = vec![id.clone()];

        while !frontier.is_empty() {
            self.session.check_budget()?;

            let mut params = SqlParams::default();
            let parents = frontier
                .iter()
                .map(|parent| bind_key(&mut params, parent, sql_type))
                .collect::<DomainResult<Vec<_>>>()?;
            let select = sql::Select {
                expressions: vec![Expr::path1(ID_FIELD)].into(),
                from: vec![sql::TableName(def.table()).into()],
                where_: Some(Expr::in_(Expr::path1(column), Expr::Tuple(parents))),
                ..Default::default()
            };

            let rows = self
                .query(select.to_string(), &params, PgDataError::Query)
                .await?;

            frontier = rows
                .into_iter()
                .filter_map(|mut row| row.remove(ID_FIELD))
                .filter(|child| seen.insert(child.to_string()))
                .collect();
            descendants.extend(frontier.iter().cloned());
        }

        if descendants.is_empty() {
            return Ok(());
        }

        let mut params = SqlParams::default();
        let ids = descendants
            .iter()
            .map(|descendant| bind_key(&mut params, descendant, id_type))
            .collect::<DomainResult<Vec<_>>>()?;
        let delete = sql::Delete {
            from: sql::TableName(def.table()),
            where_: Some(Expr::in_(Expr::path1(ID_FIELD), Expr::Tuple(ids))),
            returning: vec![],
        };
        let deleted = self
            .execute(delete.to_string(), &params, PgDataError::Delete)
            .await?;
        debug!("deleted {deleted} descendants in `{}`", def.name());

        Ok(())
    }
}
