use giraffeql_core::{
    DomainResult, JsonMap,
    registry::{FieldDef, ID_FIELD, SqlMapping, SqlType, TypeDef, UPDATED_AT_FIELD},
    selection::Selection,
};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    hooks::HookCtx,
    pg_error::{PgDataError, PgInputError},
    sql::{self, Expr, UpdateColumn},
    sql_value::{SqlParams, SqlVal},
};

use super::{TransactCtx, insert::bind_value, query::readable};

impl<'a> TransactCtx<'a> {
    pub(crate) async fn update_record(
        &self,
        typename: &str,
        lookup: &JsonMap,
        fields: &JsonMap,
        selection: &Selection,
    ) -> DomainResult<JsonMap> {
        let type_def = self.type_def(typename)?;
        let inputs = check_update_args(type_def, fields)?;
        let id = self.resolve_id(type_def, lookup).await?;

        let mut new_values = JsonMap::new();
        for (field, _, value) in &inputs {
            let value = self
                .resolve_reference(field, value)
                .await
                .map_err(|error| error.at_field(field.name.clone()))?;
            new_values.insert(field.name.to_string(), value);
        }

        let track_changes = self
            .registry()
            .service(typename)
            .map(|service| service.track_changes)
            .unwrap_or(false);
        let old = if track_changes && !inputs.is_empty() {
            Some(
                self.fetch_by_id(
                    type_def,
                    &id,
                    &Selection::leaves(new_values.keys().map(String::as_str)),
                )
                .await?,
            )
        } else {
            None
        };

        let mut changes = None;
        if inputs.is_empty() {
            debug!("nothing to update on `{typename}`");
        } else {
            let mut params = SqlParams::default();
            let mut set = Vec::with_capacity(inputs.len() + 1);

            for (field, sql, _) in &inputs {
                let value = new_values.get(field.name.as_str()).unwrap_or(&Value::Null);
                set.push(UpdateColumn(
                    sql.column.as_str(),
                    bind_value(&mut params, field, sql, value)?,
                ));
            }

            if let Some(sql) = type_def.get_field(UPDATED_AT_FIELD).and_then(FieldDef::sql) {
                set.push(UpdateColumn(
                    sql.column.as_str(),
                    params.bind(
                        SqlVal::DateTime(self.store.system.current_time()),
                        SqlType::DateTime,
                    ),
                ));
            }

            let id_type = type_def.id_kind().sql_type();
            let id_param = SqlVal::from_json(&id, id_type)
                .map_err(|msg| PgInputError::InvalidValue(ID_FIELD.into(), msg))?;
            let mut update = sql::Update {
                table_name: sql::TableName(type_def.table()),
                set,
                where_: Some(Expr::eq(Expr::path1(ID_FIELD), params.bind(id_param, id_type))),
                returning: vec![],
            };

            match old {
                Some(old) => {
                    // stored values, read the way the old ones were
                    update.returning = inputs
                        .iter()
                        .enumerate()
                        .map(|(index, (_, sql, _))| {
                            Expr::as_(readable(stored_column(sql), sql.sql_type), format!("c{index}"))
                        })
                        .collect();

                    let mut rows = self
                        .query(update.to_string(), &params, PgDataError::Update)
                        .await?;
                    let mut row = rows.pop().unwrap_or_default();
                    let stored: JsonMap = inputs
                        .iter()
                        .enumerate()
                        .map(|(index, (field, ..))| {
                            (
                                field.name.to_string(),
                                row.remove(&format!("c{index}")).unwrap_or(Value::Null),
                            )
                        })
                        .collect();

                    changes = Some(diff(&old, &stored));
                }
                None => {
                    self.execute(update.to_string(), &params, PgDataError::Update)
                        .await?;
                }
            }
        }

        if let Some(hooks) = self.store.hooks_for(typename) {
            hooks
                .after_update(
                    &HookCtx {
                        typename,
                        id: &id,
                        args: fields,
                        store: self,
                        client: self.client,
                        session: self.session,
                    },
                    changes.as_ref(),
                )
                .await?;
        }

        if selection.is_empty() {
            return Ok(JsonMap::new());
        }

        self.fetch_by_id(type_def, &id, selection).await
    }
}

fn check_update_args<'r, 'v>(
    type_def: &'r TypeDef,
    fields: &'v JsonMap,
) -> DomainResult<Vec<(&'r FieldDef, &'r SqlMapping, &'v Value)>> {
    fields
        .iter()
        .map(|(name, value)| {
            let field = type_def.get_field(name).ok_or_else(|| {
                PgInputError::UnknownField(name.clone(), type_def.name().to_string())
            })?;
            let sql = match field.sql() {
                Some(sql) if field.updateable => sql,
                _ => return Err(PgInputError::NotUpdateable(name.clone()).into()),
            };
            if value.is_null() && !field.nullable {
                return Err(PgInputError::NotNullable(name.clone()).into());
            }
            Ok((field, sql, value))
        })
        .collect()
}

fn stored_column(sql: &SqlMapping) -> Expr<'_> {
    let column = Expr::path1(sql.column.as_str());
    match &sql.getter {
        Some(getter) => Expr::template(getter.as_str(), column),
        None => column,
    }
}

/// `{ field: { from, to } }` for every field whose value changes.
fn diff(old: &JsonMap, new: &JsonMap) -> JsonMap {
    new.iter()
        .filter_map(|(name, to)| {
            let from = old.get(name).unwrap_or(&Value::Null);
            (from != to).then(|| (name.clone(), json!({ "from": from, "to": to })))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use giraffeql_test_utils::example_registry;
    use pretty_assertions::assert_eq;

    use super::*;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn update_args_are_checked() {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();

        assert_eq!(
            1,
            check_update_args(user, &map(json!({ "age": null })))
                .unwrap()
                .len()
        );

        for (invalid, expected) in [
            (json!({ "createdAt": "2024-01-01T00:00:00Z" }), "`createdAt` can not be updated"),
            (json!({ "id": "x" }), "`id` can not be updated"),
            (json!({ "name": null }), "`name` can not be null"),
        ] {
            let error = check_update_args(user, &map(invalid)).unwrap_err();
            assert_eq!(expected, error.kind().message());
        }
    }

    #[test]
    fn only_changed_fields_are_diffed() {
        let old = map(json!({ "id": "u1", "name": "bob", "age": 30 }));
        let new = map(json!({ "name": "bob", "age": 31 }));

        assert_eq!(
            map(json!({ "age": { "from": 30, "to": 31 } })),
            diff(&old, &new)
        );
    }
}
