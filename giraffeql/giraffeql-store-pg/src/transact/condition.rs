use giraffeql_core::{
    DomainResult,
    filter::{WhereExpr, WhereOperator, WherePredicate},
    registry::SqlType,
};
use serde_json::Value;

use crate::{
    pg_error::PgInputError,
    sql::Expr,
    sql_value::{SqlParams, SqlVal},
};

use super::query::SelectBuilder;

impl<'r> SelectBuilder<'r, '_> {
    /// Compile a where expression, joining whatever its paths pass through.
    pub fn compile_where(&mut self, expr: &WhereExpr) -> DomainResult<Expr<'r>> {
        match expr {
            WhereExpr::And(items) => Ok(Expr::And(
                items
                    .iter()
                    .map(|item| self.compile_where(item))
                    .collect::<DomainResult<_>>()?,
            )),
            WhereExpr::Or(items) => Ok(Expr::Or(
                items
                    .iter()
                    .map(|item| self.compile_where(item))
                    .collect::<DomainResult<_>>()?,
            )),
            WhereExpr::Predicate(predicate) => self.compile_predicate(predicate),
        }
    }

    fn compile_predicate(&mut self, predicate: &WherePredicate) -> DomainResult<Expr<'r>> {
        let column = self.column(&predicate.field)?;
        let sql_type = column.sql.sql_type;
        let col = column.expr;
        let field = predicate.field.to_string();
        let mut binder = Binder {
            params: &mut self.params,
            field: &field,
            sql_type,
        };

        let expr = match (predicate.operator, &predicate.value) {
            (WhereOperator::Eq, Value::Null) => Expr::is_null(col),
            (WhereOperator::Eq, value) => Expr::eq(col, binder.bind(value)?),
            (WhereOperator::Neq, Value::Null) => Expr::is_not_null(col),
            (WhereOperator::Neq, value) => Expr::neq(col, binder.bind(value)?),
            (WhereOperator::Gt, Value::Null) => Expr::is_not_null(col),
            (WhereOperator::Gt, value) => Expr::gt(col, binder.bind(value)?),
            (WhereOperator::GtOrNull, Value::Null) => Expr::LiteralBool(true),
            (WhereOperator::GtOrNull, value) => Expr::Or(vec![
                Expr::gt(col.clone(), binder.bind(value)?),
                Expr::is_null(col),
            ]),
            (WhereOperator::Gte, Value::Null) => Expr::LiteralBool(true),
            (WhereOperator::Gte, value) => Expr::gte(col, binder.bind(value)?),
            (WhereOperator::Lt, Value::Null) => Expr::LiteralBool(false),
            (WhereOperator::Lt, value) => Expr::Or(vec![
                Expr::lt(col.clone(), binder.bind(value)?),
                Expr::is_null(col),
            ]),
            (WhereOperator::Lte, Value::Null) => Expr::is_null(col),
            (WhereOperator::Lte, value) => Expr::Or(vec![
                Expr::lte(col.clone(), binder.bind(value)?),
                Expr::is_null(col),
            ]),
            (WhereOperator::In, Value::Array(items)) => {
                let (values, has_null) = split_nulls(items);
                if values.is_empty() {
                    return Err(PgInputError::EmptyValueSet(binder.field.to_string()).into());
                }
                let in_ = Expr::in_(col.clone(), binder.tuple(&values)?);
                if has_null {
                    Expr::Or(vec![in_, Expr::is_null(col)])
                } else {
                    in_
                }
            }
            (WhereOperator::Nin, Value::Array(items)) => {
                let (values, has_null) = split_nulls(items);
                if values.is_empty() {
                    return Err(PgInputError::EmptyValueSet(binder.field.to_string()).into());
                }
                let not_in = Expr::not_in(col.clone(), binder.tuple(&values)?);
                if has_null {
                    Expr::And(vec![not_in, Expr::is_not_null(col)])
                } else {
                    not_in
                }
            }
            (WhereOperator::Regex, Value::String(regex)) => {
                let (pattern, case_insensitive) = parse_regex(regex);
                Expr::regex(
                    Expr::cast(col, "text"),
                    binder.params.bind(SqlVal::Text(pattern.into()), SqlType::Text),
                    case_insensitive,
                )
            }
            (WhereOperator::Like, Value::String(pattern)) => Expr::like(
                col,
                binder.params.bind(SqlVal::Text(pattern.clone()), SqlType::Text),
            ),
            (WhereOperator::Contains, Value::Array(items)) => Expr::Or(
                items
                    .iter()
                    .map(|item| {
                        Expr::json_contains(
                            col.clone(),
                            binder
                                .params
                                .bind(SqlVal::Json(Value::Array(vec![item.clone()])), SqlType::Json),
                        )
                    })
                    .collect(),
            ),
            (WhereOperator::ContainsAll, Value::Array(items)) => Expr::json_contains(
                col,
                binder
                    .params
                    .bind(SqlVal::Json(Value::Array(items.clone())), SqlType::Json),
            ),
            (operator, value) => {
                return Err(PgInputError::InvalidValue(
                    binder.field.to_string(),
                    format!("`{}` does not accept {value}", operator.as_str()),
                )
                .into());
            }
        };

        Ok(expr)
    }
}

struct Binder<'p, 'f> {
    params: &'p mut SqlParams,
    field: &'f str,
    sql_type: SqlType,
}

impl Binder<'_, '_> {
    fn bind<'r>(&mut self, value: &Value) -> DomainResult<Expr<'r>> {
        let value = SqlVal::from_json(value, self.sql_type)
            .map_err(|msg| PgInputError::InvalidValue(self.field.to_string(), msg))?;
        Ok(self.params.bind(value, self.sql_type))
    }

    fn tuple<'r>(&mut self, values: &[&Value]) -> DomainResult<Expr<'r>> {
        Ok(Expr::Tuple(
            values
                .iter()
                .map(|value| self.bind(value))
                .collect::<DomainResult<_>>()?,
        ))
    }
}

fn split_nulls(items: &[Value]) -> (Vec<&Value>, bool) {
    let has_null = items.iter().any(Value::is_null);
    (items.iter().filter(|item| !item.is_null()).collect(), has_null)
}

/// `/pattern/flags` or a bare pattern. Only the `i` flag has an effect.
fn parse_regex(input: &str) -> (&str, bool) {
    if let Some(rest) = input.strip_prefix('/') {
        if let Some((pattern, flags)) = rest.rsplit_once('/') {
            return (pattern, flags.contains('i'));
        }
    }

    (input, false)
}
