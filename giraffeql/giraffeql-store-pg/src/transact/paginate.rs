use giraffeql_core::{
    DomainResult, JsonMap,
    cursor::Cursor,
    data_store::{Edge, Paginator},
    filter::WhereExpr,
    query_args::{PaginationArgs, SortField},
    registry::{ID_FIELD, TypeDef},
    selection::PaginatorSelection,
};
use serde_json::Value;

use crate::{
    pg_error::{PgDataError, PgInputError},
    sql::{Direction, Expr, Limit, OrderBy},
    sql_value::{SqlParams, SqlVal},
};

use super::{
    TransactCtx,
    order::SortColumn,
    query::{Fetch, SelectBuilder},
};

pub const LAST_ID_LABEL: &str = "$last_id";

pub fn last_value_label(index: usize) -> String {
    format!("$last_value_{index}")
}

/// The rows that come after `bounds` in the order given by `columns`.
///
/// Ascending columns put nulls last and descending columns put them first, like postgres does.
pub fn cursor_condition<'r>(
    params: &mut SqlParams,
    columns: &[SortColumn<'r>],
    bounds: &[Value],
) -> DomainResult<Expr<'r>> {
    if columns.len() != bounds.len() {
        return Err(PgInputError::CursorMismatch.into());
    }

    let bind = |params: &mut SqlParams, column: &SortColumn<'r>, value: &Value| {
        SqlVal::from_json(value, column.sql_type)
            .map(|value| params.bind(value, column.sql_type))
            .map_err(|msg| PgInputError::InvalidValue("cursor".into(), msg))
    };

    let mut branches = vec![];

    for (index, (column, value)) in columns.iter().zip(bounds).enumerate() {
        // nothing sorts after a null in ascending order
        if column.direction == Direction::Asc && value.is_null() {
            continue;
        }

        let mut clauses = Vec::with_capacity(index + 1);
        for (previous, previous_value) in columns[..index].iter().zip(bounds) {
            clauses.push(if previous_value.is_null() {
                Expr::is_null(previous.expr.clone())
            } else {
                Expr::eq(
                    previous.expr.clone(),
                    bind(params, previous, previous_value)?,
                )
            });
        }

        let col = column.expr.clone();
        clauses.push(match (column.direction, value.is_null()) {
            (Direction::Asc, _) => {
                Expr::Or(vec![Expr::gt(col.clone(), bind(params, column, value)?), Expr::is_null(col)])
            }
            (Direction::Desc, false) => Expr::lt(col, bind(params, column, value)?),
            (Direction::Desc, true) => Expr::is_not_null(col),
        });
        branches.push(Expr::And(clauses));
    }

    Ok(Expr::Or(branches))
}

impl<'a> TransactCtx<'a> {
    pub(crate) async fn fetch_page(
        &self,
        typename: &str,
        args: &PaginationArgs,
        selection: &PaginatorSelection,
    ) -> DomainResult<Paginator> {
        let type_def = self.type_def(typename)?;
        let reverted = args.page.is_reverted();

        // `id` makes the order total, so every row has exactly one position
        let sort = args
            .sort
            .iter()
            .cloned()
            .chain([SortField::asc(ID_FIELD)])
            .map(|sort_field| SortField {
                desc: sort_field.desc != reverted,
                ..sort_field
            })
            .collect();

        let after = match args.page.cursor() {
            Some(cursor) => {
                if cursor.last_values.len() != args.sort.len() {
                    return Err(PgInputError::CursorMismatch.into());
                }
                let mut bounds = cursor.last_values.clone();
                bounds.push(cursor.last_id.clone());
                Some(bounds)
            }
            None => None,
        };

        let node_selection = selection.node().cloned().unwrap_or_default();
        let mut rows = self
            .fetch(
                type_def,
                Fetch {
                    filter: args.filter.as_ref(),
                    sort,
                    after,
                    limit: Some(args.page.count()),
                    cursor_columns: true,
                    ..Fetch::new(&node_selection)
                },
            )
            .await?;

        if reverted {
            rows.reverse();
        }
        if args.reverse {
            rows.reverse();
        }

        let edges = rows
            .into_iter()
            .map(|row| {
                Ok(Edge {
                    cursor: edge_cursor(&row.extras, args.sort.len())?.encode(),
                    node: row.record,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let total = if selection.total {
            Some(self.count_matching(type_def, args.filter.as_ref()).await?)
        } else {
            None
        };

        Ok(Paginator {
            total,
            start_cursor: edges.first().map(|edge| edge.cursor.clone()),
            end_cursor: edges.last().map(|edge| edge.cursor.clone()),
            edges,
        })
    }

    /// Number of distinct rows matching `filter`
    pub(crate) async fn count_matching(
        &self,
        type_def: &'a TypeDef,
        filter: Option<&WhereExpr>,
    ) -> DomainResult<u64> {
        let mut builder = SelectBuilder::new(self.registry(), type_def, self.session);
        if let Some(filter) = filter {
            builder.filter(filter)?;
        }

        let count = if builder.joins.has_links() {
            Expr::count_distinct(builder.joins.root_id())
        } else {
            Expr::CountStar
        };
        let (select, params) = builder.build(
            vec![Expr::as_(count, "count")],
            OrderBy::default(),
            Limit::default(),
            false,
        );

        let rows = self
            .query(select.to_string(), &params, PgDataError::Query)
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| PgDataError::MissingColumn("count".into()))?)
    }
}

fn edge_cursor(extras: &JsonMap, sort_len: usize) -> DomainResult<Cursor> {
    let extra = |label: &str| -> DomainResult<Value> {
        Ok(extras
            .get(label)
            .cloned()
            .ok_or_else(|| PgDataError::MissingColumn(label.to_string()))?)
    };

    Ok(Cursor {
        last_id: extra(LAST_ID_LABEL)?,
        last_values: (0..sort_len)
            .map(|index| extra(&last_value_label(index)))
            .collect::<DomainResult<_>>()?,
    })
}

#[cfg(test)]
mod tests {
    use giraffeql_core::Session;
    use giraffeql_test_utils::example_registry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn condition(sort: &[SortField], bounds: &[Value]) -> (String, Vec<SqlVal>) {
        let registry = example_registry();
        let session = Session::anonymous();
        let mut builder = SelectBuilder::new(&registry, registry.type_def("user").unwrap(), &session);
        let columns = builder.sort_columns(sort).unwrap();
        let mut params = SqlParams::default();

        let expr = cursor_condition(&mut params, &columns, bounds).unwrap();
        (expr.to_string(), params.into_values())
    }

    #[test]
    fn after_id() {
        assert_eq!(
            (
                r#"("user_0"."id">$1::text OR "user_0"."id" IS NULL)"#.to_string(),
                vec![SqlVal::Text("b".into())]
            ),
            condition(&[SortField::asc("id")], &[json!("b")])
        );
    }

    #[test]
    fn after_sort_value_then_id() {
        assert_eq!(
            concat!(
                r#"("user_0"."age"<$1::int8 OR "#,
                r#"("user_0"."age"=$2::int8 AND ("user_0"."id">$3::text OR "user_0"."id" IS NULL)))"#
            ),
            condition(
                &[SortField::desc("age"), SortField::asc("id")],
                &[json!(30), json!("b")]
            )
            .0
        );
    }

    #[test]
    fn after_null_sort_values() {
        // ascending: nothing but other nulls follow a null
        assert_eq!(
            r#"("user_0"."age" IS NULL AND ("user_0"."id">$1::text OR "user_0"."id" IS NULL))"#,
            condition(
                &[SortField::asc("age"), SortField::asc("id")],
                &[json!(null), json!("b")]
            )
            .0
        );

        // descending: every non-null value follows a null
        assert_eq!(
            concat!(
                r#"("user_0"."age" IS NOT NULL OR "#,
                r#"("user_0"."age" IS NULL AND ("user_0"."id">$1::text OR "user_0"."id" IS NULL)))"#
            ),
            condition(
                &[SortField::desc("age"), SortField::asc("id")],
                &[json!(null), json!("b")]
            )
            .0
        );
    }

    #[test]
    fn edge_cursors_come_from_extras() {
        let extras = match json!({ "$last_id": "b", "$last_value_0": 30 }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        assert_eq!(
            Cursor {
                last_id: json!("b"),
                last_values: vec![json!(30)],
            },
            edge_cursor(&extras, 1).unwrap()
        );
        assert!(edge_cursor(&extras, 2).is_err());
    }
}
