use giraffeql_core::{
    DomainError, DomainResult, JsonMap,
    field_path::FieldPath,
    filter::WhereExpr,
    registry::{ID_FIELD, TypeDef},
    selection::Selection,
};
use itertools::Itertools;
use serde_json::Value;

use crate::pg_error::PgInputError;

use super::{TransactCtx, query::Fetch};

/// The filter selecting the single row a lookup identifies.
///
/// The lookup must give every field of exactly one unique key, none of them null.
pub fn lookup_filter(type_def: &TypeDef, lookup: &JsonMap) -> DomainResult<WhereExpr> {
    let key = type_def
        .unique_keys()
        .iter()
        .find(|key| {
            key.fields.len() == lookup.len()
                && key
                    .fields
                    .iter()
                    .all(|field| lookup.get(field.as_str()).is_some_and(|value| !value.is_null()))
        })
        .ok_or_else(|| {
            PgInputError::InvalidLookup(
                type_def.name().to_string(),
                type_def
                    .unique_keys()
                    .iter()
                    .map(|key| key.fields.iter().join("+"))
                    .join(", "),
            )
        })?;

    Ok(WhereExpr::And(
        key.fields
            .iter()
            .map(|field| {
                WhereExpr::eq(
                    FieldPath::single(field.clone()),
                    lookup.get(field.as_str()).cloned().unwrap_or(Value::Null),
                )
            })
            .collect(),
    ))
}

pub fn not_found(type_def: &TypeDef) -> DomainError {
    DomainError::item_not_found(format!("`{}` not found", type_def.name()))
}

impl<'a> TransactCtx<'a> {
    pub(crate) async fn fetch_one(
        &self,
        typename: &str,
        lookup: &JsonMap,
        selection: &Selection,
    ) -> DomainResult<JsonMap> {
        let type_def = self.type_def(typename)?;
        let filter = lookup_filter(type_def, lookup)?;

        self.fetch(
            type_def,
            Fetch {
                filter: Some(&filter),
                limit: Some(1),
                ..Fetch::new(selection)
            },
        )
        .await?
        .into_iter()
        .next()
        .map(|row| row.record)
        .ok_or_else(|| not_found(type_def))
    }

    pub(crate) async fn fetch_by_id(
        &self,
        type_def: &'a TypeDef,
        id: &Value,
        selection: &Selection,
    ) -> DomainResult<JsonMap> {
        let filter = WhereExpr::eq(ID_FIELD, id.clone());

        self.fetch(
            type_def,
            Fetch {
                filter: Some(&filter),
                limit: Some(1),
                ..Fetch::new(selection)
            },
        )
        .await?
        .into_iter()
        .next()
        .map(|row| row.record)
        .ok_or_else(|| not_found(type_def))
    }

    /// The id of the row a lookup identifies
    pub(crate) async fn resolve_id(
        &self,
        type_def: &'a TypeDef,
        lookup: &JsonMap,
    ) -> DomainResult<Value> {
        let filter = lookup_filter(type_def, lookup)?;
        let selection = Selection::leaves([ID_FIELD]);

        let mut record = self
            .fetch(
                type_def,
                Fetch {
                    filter: Some(&filter),
                    limit: Some(1),
                    ..Fetch::new(&selection)
                },
            )
            .await?
            .into_iter()
            .next()
            .map(|row| row.record)
            .ok_or_else(|| not_found(type_def))?;

        Ok(record.remove(ID_FIELD).unwrap_or(Value::Null))
    }
}
