use giraffeql_core::{
    DomainResult, JsonMap,
    registry::{
        CREATED_AT_FIELD, CREATED_BY_FIELD, FieldDef, FieldKind, ID_FIELD, IdKind, SqlMapping,
        SqlType, TypeDef, UPDATED_AT_FIELD,
    },
    selection::Selection,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    hooks::HookCtx,
    pg_error::{PgDataError, PgIdError, PgInputError},
    sql::{self, Expr},
    sql_value::{SqlParams, SqlVal},
};

use super::{TransactCtx, lookup::lookup_filter};

/// Fields the store maintains itself
pub(super) fn is_managed(name: &str) -> bool {
    matches!(
        name,
        ID_FIELD | CREATED_AT_FIELD | UPDATED_AT_FIELD | CREATED_BY_FIELD
    )
}

/// Bind a client value for a column, through the column's setter if it has one.
pub(super) fn bind_value<'r>(
    params: &mut SqlParams,
    field: &FieldDef,
    sql: &'r SqlMapping,
    value: &Value,
) -> DomainResult<Expr<'r>> {
    let value = SqlVal::from_json(value, sql.sql_type)
        .map_err(|msg| PgInputError::InvalidValue(field.name.to_string(), msg))?;
    let param = params.bind(value, sql.sql_type);

    Ok(match &sql.setter {
        Some(setter) => Expr::template(setter.as_str(), param),
        None => param,
    })
}

impl<'a> TransactCtx<'a> {
    pub(crate) async fn insert_record(
        &self,
        typename: &str,
        args: &JsonMap,
        selection: &Selection,
    ) -> DomainResult<JsonMap> {
        let type_def = self.type_def(typename)?;
        let inputs = check_create_args(type_def, args)?;

        let mut params = SqlParams::default();
        let mut column_names: Vec<&str> = vec![];
        let mut values: Vec<Expr> = vec![];

        if type_def.id_kind() == IdKind::RandomString {
            let id = self.generate_id(type_def).await?;
            column_names.push(ID_FIELD);
            values.push(params.bind(SqlVal::Text(id), SqlType::Text));
        }

        for (field, sql, value) in inputs {
            let value = self
                .resolve_reference(field, value)
                .await
                .map_err(|error| error.at_field(field.name.clone()))?;
            column_names.push(sql.column.as_str());
            values.push(bind_value(&mut params, field, sql, &value)?);
        }

        for field in type_def.fields().values() {
            let Some(sql) = field.sql() else {
                continue;
            };
            if is_managed(&field.name) || args.contains_key(field.name.as_str()) {
                continue;
            }

            if let Some(default) = &sql.default_value {
                column_names.push(sql.column.as_str());
                values.push(bind_value(&mut params, field, sql, default)?);
            }
        }

        let now = self.store.system.current_time();
        for name in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
            if let Some(sql) = type_def.get_field(name).and_then(FieldDef::sql) {
                column_names.push(sql.column.as_str());
                values.push(params.bind(SqlVal::DateTime(now), SqlType::DateTime));
            }
        }

        if let (Some(sql), Some(identity)) = (
            type_def.get_field(CREATED_BY_FIELD).and_then(FieldDef::sql),
            self.session.identity(),
        ) {
            let value = SqlVal::from_json(&identity.id, sql.sql_type)
                .map_err(|msg| PgInputError::InvalidValue(CREATED_BY_FIELD.into(), msg))?;
            column_names.push(sql.column.as_str());
            values.push(params.bind(value, sql.sql_type));
        }

        let insert = sql::Insert {
            into: sql::TableName(type_def.table()),
            column_names,
            values,
            returning: vec![Expr::path1(ID_FIELD)],
        };

        let rows = self
            .query(insert.to_string(), &params, PgDataError::Insert)
            .await?;
        let id = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(ID_FIELD))
            .ok_or(PgDataError::NothingInserted)?;

        if let Some(hooks) = self.store.hooks_for(typename) {
            hooks
                .after_create(&HookCtx {
                    typename,
                    id: &id,
                    args,
                    store: self,
                    client: self.client,
                    session: self.session,
                })
                .await?;
        }

        if selection.is_empty() {
            return Ok(JsonMap::new());
        }

        self.fetch_by_id(type_def, &id, selection).await
    }

    /// A fresh random id not yet used in the type's table.
    async fn generate_id(&self, type_def: &'a TypeDef) -> DomainResult<String> {
        let config = &self.store.config;

        for attempt in 1..=config.id_max_attempts {
            let candidate = self.store.system.generate_id(config.id_length);

            let mut params = SqlParams::default();
            let select = sql::Select {
                expressions: vec![Expr::as_(Expr::CountStar, "count")].into(),
                from: vec![sql::TableName(type_def.table()).into()],
                where_: Some(Expr::eq(
                    Expr::path1(ID_FIELD),
                    params.bind(SqlVal::Text(candidate.clone()), SqlType::Text),
                )),
                ..Default::default()
            };

            let rows = self
                .query(select.to_string(), &params, PgDataError::Query)
                .await?;
            let taken = rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(Value::as_u64)
                .ok_or_else(|| PgDataError::MissingColumn("count".into()))?;

            if taken == 0 {
                return Ok(candidate);
            }

            debug!("id `{candidate}` for `{}` taken (attempt {attempt})", type_def.name());
        }

        Err(PgIdError::Exhausted(type_def.name().to_string(), config.id_max_attempts).into())
    }

    /// Foreign key values may be given as a lookup object of the referenced type.
    pub(super) async fn resolve_reference(
        &self,
        field: &FieldDef,
        value: &Value,
    ) -> DomainResult<Value> {
        let is_reference = matches!(field.kind, FieldKind::Join(_) | FieldKind::Dataloader { .. })
            && !field.is_array;

        match value {
            Value::Object(lookup) if is_reference => {
                let Some(type_ref) = field.object_type() else {
                    return Ok(value.clone());
                };
                let target = self.registry().resolve(type_ref)?;
                lookup_filter(target, lookup)?;
                self.resolve_id(target, lookup).await
            }
            _ => Ok(value.clone()),
        }
    }
}

/// Validate create arguments against the type, pairing each with its column.
fn check_create_args<'r, 'v>(
    type_def: &'r TypeDef,
    args: &'v JsonMap,
) -> DomainResult<Vec<(&'r FieldDef, &'r SqlMapping, &'v Value)>> {
    for field in type_def.fields().values() {
        let Some(sql) = field.sql() else {
            continue;
        };
        let required = field.addable && !field.nullable && sql.default_value.is_none();
        if required && !is_managed(&field.name) && !args.contains_key(field.name.as_str()) {
            return Err(PgInputError::MissingField(field.name.to_string()).into());
        }
    }

    args.iter()
        .map(|(name, value)| {
            let field = type_def.get_field(name).ok_or_else(|| {
                PgInputError::UnknownField(name.clone(), type_def.name().to_string())
            })?;
            let sql = match field.sql() {
                Some(sql) if field.addable => sql,
                _ => return Err(PgInputError::NotAddable(name.clone()).into()),
            };
            if value.is_null() && !field.nullable {
                return Err(PgInputError::NotNullable(name.clone()).into());
            }
            Ok((field, sql, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use giraffeql_test_utils::example_registry;
    use serde_json::json;

    use super::*;

    #[test]
    fn create_args_are_checked() {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();

        let args = match json!({ "name": "bob", "email": "bob@example.com" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(2, check_create_args(user, &args).unwrap().len());

        for (invalid, expected) in [
            (json!({ "nope": 1 }), "`nope` is not a field of `user`"),
            (json!({ "id": "x" }), "`id` can not be set on create"),
            (json!({ "displayName": "x" }), "`displayName` can not be set on create"),
            (json!({ "name": null }), "`name` can not be null"),
            (json!({ "email": "bob@example.com" }), "`name` is required"),
        ] {
            let Value::Object(args) = invalid else {
                unreachable!()
            };
            let error = check_create_args(user, &args).unwrap_err();
            assert_eq!(expected, error.kind().message());
        }
    }
}
