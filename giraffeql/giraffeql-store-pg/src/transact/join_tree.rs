use fnv::FnvHashMap;
use giraffeql_core::{
    DomainResult, Session,
    field_path::FieldPath,
    registry::{FieldDef, ID_FIELD, JoinPredicate, PathStep, Registry, SqlMapping, SqlType, TypeDef},
};
use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    pg_error::{PgInputError, PgModelError},
    sql::{Alias, Expr, FromItem, Join, TableName},
    sql_value::{SqlParams, SqlVal},
};

/// The column expression for a field path, with the joins needed to reach it.
pub struct ResolvedColumn<'r> {
    /// Qualified column, wrapped in the field's getter if it has one
    pub expr: Expr<'r>,
    pub field: &'r FieldDef,
    pub sql: &'r SqlMapping,
}

struct JoinNode<'r> {
    alias: Alias<'r>,
    table: &'r str,
    on: Expr<'r>,
    /// Reached through a link type, so it may multiply the root rows
    via_link: bool,
}

/// The joins of one statement, memoized by path prefix.
///
/// Resolving two paths sharing a prefix joins that prefix once.
pub struct JoinTree<'r> {
    root_def: &'r TypeDef,
    root: Alias<'r>,
    counters: FnvHashMap<&'r str, usize>,
    joins: IndexMap<String, JoinNode<'r>>,
}

impl<'r> JoinTree<'r> {
    pub fn new(root_def: &'r TypeDef) -> Self {
        let mut tree = Self {
            root_def,
            root: Alias {
                table: root_def.table(),
                index: 0,
            },
            counters: Default::default(),
            joins: Default::default(),
        };
        tree.root = tree.next_alias(root_def.table());
        tree
    }

    pub fn root_id(&self) -> Expr<'r> {
        Expr::path2(self.root, ID_FIELD)
    }

    /// Whether some join goes through a link type
    pub fn has_links(&self) -> bool {
        self.joins.values().any(|node| node.via_link)
    }

    /// Columns to group by so that link joins do not duplicate root rows.
    ///
    /// Every other table joined to-one is grouped by its id, so its columns stay selectable.
    pub fn group_by(&self) -> Vec<Expr<'r>> {
        std::iter::once(self.root_id())
            .chain(
                self.joins
                    .values()
                    .filter(|node| !node.via_link)
                    .map(|node| Expr::path2(node.alias, ID_FIELD)),
            )
            .collect()
    }

    pub fn from_item(&self) -> FromItem<'r> {
        let mut item = TableName(self.root_def.table()).as_(self.root);

        for node in self.joins.values() {
            item = Join {
                first: item,
                second: TableName(node.table).as_(node.alias),
                on: node.on.clone(),
            }
            .into();
        }

        item
    }

    pub fn resolve(
        &mut self,
        registry: &'r Registry,
        path: &FieldPath,
        session: &Session,
        params: &mut SqlParams,
    ) -> DomainResult<ResolvedColumn<'r>> {
        let resolved = registry.resolve_path(self.root_def, path)?;
        let mut alias = self.root;
        let mut via_link = false;

        for step in &resolved.steps {
            if let Some(node) = self.joins.get(step.key()) {
                alias = node.alias;
                via_link = node.via_link;
                continue;
            }

            let (table, joined, on) = match *step {
                PathStep::Join { field, target, .. } => {
                    let fk = sql_of(field)?;
                    let joined = self.next_alias(target.table());
                    let on = Expr::eq(
                        Expr::path2(joined, ID_FIELD),
                        Expr::path2(alias, fk.column.as_str()),
                    );
                    (target.table(), joined, on)
                }
                PathStep::SpecialJoin { target, join, .. } => {
                    let joined = self.next_alias(target.table());
                    let mut predicates = Vec::with_capacity(join.predicates.len());

                    for predicate in &join.predicates {
                        predicates.push(match predicate {
                            JoinPredicate::ParentColumn {
                                column,
                                parent_column,
                            } => Expr::eq(
                                Expr::path2(joined, column.as_str()),
                                Expr::path2(alias, parent_column.as_str()),
                            ),
                            JoinPredicate::SessionParam { column, param } => {
                                let sql_type = column_type(target, column)?;
                                let value = session.param(param).unwrap_or(Value::Null);
                                let value = SqlVal::from_json(&value, sql_type).map_err(|msg| {
                                    PgInputError::InvalidValue(param.to_string(), msg)
                                })?;
                                Expr::eq(
                                    Expr::path2(joined, column.as_str()),
                                    params.bind(value, sql_type),
                                )
                            }
                        });
                    }

                    (target.table(), joined, Expr::And(predicates))
                }
                PathStep::Link {
                    link_type,
                    back_reference,
                    ..
                } => {
                    via_link = true;
                    let fk = sql_of(back_reference)?;
                    let joined = self.next_alias(link_type.table());
                    let on = Expr::eq(
                        Expr::path2(joined, fk.column.as_str()),
                        Expr::path2(alias, ID_FIELD),
                    );
                    (link_type.table(), joined, on)
                }
            };

            self.joins.insert(
                step.key().to_string(),
                JoinNode {
                    alias: joined,
                    table,
                    on,
                    via_link,
                },
            );
            alias = joined;
        }

        let field: &'r FieldDef = resolved.field;
        let sql = field
            .sql()
            .ok_or_else(|| PgModelError::NotSqlField(path.to_string()))?;
        let column = Expr::path2(alias, sql.column.as_str());

        Ok(ResolvedColumn {
            expr: match &sql.getter {
                Some(getter) => Expr::template(getter.as_str(), column),
                None => column,
            },
            field,
            sql,
        })
    }

    fn next_alias(&mut self, table: &'r str) -> Alias<'r> {
        let counter = self.counters.entry(table).or_insert(0);
        let alias = Alias {
            table,
            index: *counter,
        };
        *counter += 1;
        alias
    }
}

fn sql_of(field: &FieldDef) -> DomainResult<&SqlMapping> {
    Ok(field
        .sql()
        .ok_or_else(|| PgModelError::NotSqlField(field.name.to_string()))?)
}

fn column_type(def: &TypeDef, column: &str) -> DomainResult<SqlType> {
    def.fields()
        .values()
        .filter_map(FieldDef::sql)
        .find(|sql| sql.column == column)
        .map(|sql| sql.sql_type)
        .ok_or_else(|| {
            PgModelError::ColumnNotFound(def.name().to_string(), def.table().to_string(), column.into())
                .into()
        })
}

#[cfg(test)]
mod tests {
    use giraffeql_test_utils::example_registry;
    use pretty_assertions::assert_eq;

    use super::*;

    fn resolve_all(paths: &[&str]) -> (String, Vec<String>) {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();
        let session = Session::anonymous();
        let mut params = SqlParams::default();
        let mut tree = JoinTree::new(user);

        let columns = paths
            .iter()
            .map(|path| {
                tree.resolve(&registry, &FieldPath::from(*path), &session, &mut params)
                    .unwrap()
                    .expr
                    .to_string()
            })
            .collect();

        (tree.from_item().to_string(), columns)
    }

    #[test]
    fn shared_prefixes_join_once() {
        let (from, columns) = resolve_all(&["createdBy.name", "createdBy.createdBy.name", "createdBy.age"]);

        assert_eq!(
            concat!(
                r#""user" AS "user_0" "#,
                r#"LEFT JOIN "user" AS "user_1" ON "user_1"."id"="user_0"."created_by" "#,
                r#"LEFT JOIN "user" AS "user_2" ON "user_2"."id"="user_1"."created_by""#
            ),
            from
        );
        assert_eq!(
            vec![
                r#""user_1"."name""#,
                r#""user_2"."name""#,
                r#""user_1"."age""#
            ],
            columns
        );
    }

    #[test]
    fn link_traversal_joins_back_reference() {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();
        let mut tree = JoinTree::new(user);
        let mut params = SqlParams::default();

        let column = tree
            .resolve(
                &registry,
                &FieldPath::from("userUserFollowLink/target.name"),
                &Session::anonymous(),
                &mut params,
            )
            .unwrap();

        assert_eq!(r#""user_1"."name""#, column.expr.to_string());
        assert!(tree.has_links());
        assert_eq!(
            concat!(
                r#""user" AS "user_0" "#,
                r#"LEFT JOIN "userUserFollowLink" AS "userUserFollowLink_0" ON "userUserFollowLink_0"."user"="user_0"."id" "#,
                r#"LEFT JOIN "user" AS "user_1" ON "user_1"."id"="userUserFollowLink_0"."target""#
            ),
            tree.from_item().to_string()
        );
        assert_eq!(
            vec![r#""user_0"."id""#.to_string()],
            tree.group_by()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn link_directions_join_separately() {
        let (from, columns) = resolve_all(&[
            "userUserFollowLink/target.name",
            "userUserFollowLink/user.name",
            "userUserFollowLink/target.age",
        ]);

        assert_eq!(
            concat!(
                r#""user" AS "user_0" "#,
                r#"LEFT JOIN "userUserFollowLink" AS "userUserFollowLink_0" ON "userUserFollowLink_0"."user"="user_0"."id" "#,
                r#"LEFT JOIN "user" AS "user_1" ON "user_1"."id"="userUserFollowLink_0"."target" "#,
                r#"LEFT JOIN "userUserFollowLink" AS "userUserFollowLink_1" ON "userUserFollowLink_1"."target"="user_0"."id" "#,
                r#"LEFT JOIN "user" AS "user_2" ON "user_2"."id"="userUserFollowLink_1"."user""#
            ),
            from
        );
        assert_eq!(
            vec![r#""user_1"."name""#, r#""user_2"."name""#, r#""user_1"."age""#],
            columns
        );
    }

    #[test]
    fn special_join_binds_session_params() {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();
        let mut tree = JoinTree::new(user);
        let mut params = SqlParams::default();
        let session = Session::anonymous().with_param("currentUserId", serde_json::json!("me"));

        tree.resolve(
            &registry,
            &FieldPath::from("currentUserFollowLink.id"),
            &session,
            &mut params,
        )
        .unwrap();

        assert_eq!(
            concat!(
                r#""user" AS "user_0" "#,
                r#"LEFT JOIN "userUserFollowLink" AS "userUserFollowLink_0" "#,
                r#"ON ("userUserFollowLink_0"."target"="user_0"."id" AND "userUserFollowLink_0"."user"=$1::text)"#
            ),
            tree.from_item().to_string()
        );
        assert_eq!(&[SqlVal::Text("me".into())], params.values());
        assert!(!tree.has_links());
    }

    #[test]
    fn getters_wrap_the_column() {
        let (_, columns) = resolve_all(&["email"]);
        assert_eq!(vec![r#"lower("user_0"."email")"#], columns);
    }

    #[test]
    fn non_sql_fields_are_rejected() {
        let registry = example_registry();
        let user = registry.type_def("user").unwrap();
        let mut tree = JoinTree::new(user);

        let error = tree
            .resolve(
                &registry,
                &FieldPath::from("displayName"),
                &Session::anonymous(),
                &mut SqlParams::default(),
            )
            .err()
            .unwrap();
        assert_eq!("InvalidFieldError", error.kind().type_name());
    }
}
