use giraffeql_core::{DomainResult, query_args::SortField, registry::SqlType};

use crate::{
    pg_error::PgInputError,
    sql::{Direction, Expr, OrderBy, OrderByExpr},
};

use super::query::SelectBuilder;

/// A resolved sort key, in the direction the statement sorts by.
pub struct SortColumn<'r> {
    pub expr: Expr<'r>,
    pub sql_type: SqlType,
    pub direction: Direction,
}

impl<'r> SelectBuilder<'r, '_> {
    pub fn sort_columns(&mut self, sort: &[SortField]) -> DomainResult<Vec<SortColumn<'r>>> {
        let mut columns = Vec::with_capacity(sort.len());

        for sort_field in sort {
            if sort_field.field.has_link_traversal() {
                return Err(PgInputError::SortThroughLink(sort_field.field.to_string()).into());
            }

            let column = self.column(&sort_field.field)?;
            if column.field.is_array || column.sql.sql_type == SqlType::Json {
                return Err(PgInputError::NotSortable(sort_field.field.to_string()).into());
            }

            columns.push(SortColumn {
                expr: column.expr,
                sql_type: column.sql.sql_type,
                direction: if sort_field.desc {
                    Direction::Desc
                } else {
                    Direction::Asc
                },
            });
        }

        Ok(columns)
    }
}

pub fn order_by<'r>(columns: &[SortColumn<'r>]) -> OrderBy<'r> {
    OrderBy {
        expressions: columns
            .iter()
            .map(|column| OrderByExpr(column.expr.clone(), column.direction))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use giraffeql_core::Session;
    use giraffeql_test_utils::example_registry;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sort_through_joins() {
        let registry = example_registry();
        let session = Session::anonymous();
        let mut builder = SelectBuilder::new(&registry, registry.type_def("post").unwrap(), &session);

        let columns = builder
            .sort_columns(&[SortField::desc("createdBy.name"), SortField::asc("id")])
            .unwrap();

        assert_eq!(
            r#" ORDER BY "user_0"."name" DESC,"post_0"."id""#,
            order_by(&columns).to_string()
        );
    }

    #[test]
    fn links_and_json_are_not_sortable() {
        let registry = example_registry();
        let session = Session::anonymous();
        let mut builder = SelectBuilder::new(&registry, registry.type_def("user").unwrap(), &session);

        for path in ["userUserFollowLink/target.name", "tags"] {
            let error = builder
                .sort_columns(&[SortField::asc(path)])
                .err()
                .unwrap();
            assert_eq!("ArgsError", error.kind().type_name(), "{path}");
        }
    }
}
