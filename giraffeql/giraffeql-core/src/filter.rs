//! Where expressions and the client facing `filterBy` / `search` arguments.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    DomainError, DomainResult,
    field_path::FieldPath,
    service::{SearchMode, ServiceDef},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WhereOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Greater than the value, or null
    GtOrNull,
    In,
    Nin,
    Regex,
    Like,
    /// JSON array column containing any of the values
    Contains,
    /// JSON array column containing all of the values
    ContainsAll,
}

impl WhereOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::GtOrNull => "gtornull",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Regex => "regex",
            Self::Like => "like",
            Self::Contains => "contains",
            Self::ContainsAll => "containsAll",
        }
    }

    fn requires_array(self) -> bool {
        matches!(
            self,
            Self::In | Self::Nin | Self::Contains | Self::ContainsAll
        )
    }
}

impl FromStr for WhereOperator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gtornull" => Self::GtOrNull,
            "in" => Self::In,
            "nin" => Self::Nin,
            "regex" => Self::Regex,
            "like" => Self::Like,
            "contains" => Self::Contains,
            "containsAll" => Self::ContainsAll,
            other => {
                return Err(DomainError::args(format!("unknown operator `{other}`")));
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WherePredicate {
    pub field: FieldPath,
    pub operator: WhereOperator,
    pub value: Value,
}

impl WherePredicate {
    pub fn new(field: FieldPath, operator: WhereOperator, value: Value) -> DomainResult<Self> {
        if operator.requires_array() {
            match &value {
                Value::Array(items) if !items.is_empty() => {}
                _ => {
                    return Err(DomainError::args(format!(
                        "`{}` on `{field}` requires a non-empty array",
                        operator.as_str()
                    )));
                }
            }
        }

        if matches!(operator, WhereOperator::Regex | WhereOperator::Like) && !value.is_string() {
            return Err(DomainError::args(format!(
                "`{}` on `{field}` requires a string",
                operator.as_str()
            )));
        }

        Ok(Self {
            field,
            operator,
            value,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WhereExpr {
    And(Vec<WhereExpr>),
    Or(Vec<WhereExpr>),
    Predicate(WherePredicate),
}

impl WhereExpr {
    pub fn predicate(field: impl Into<FieldPath>, operator: WhereOperator, value: Value) -> DomainResult<Self> {
        Ok(Self::Predicate(WherePredicate::new(
            field.into(),
            operator,
            value,
        )?))
    }

    pub fn eq(field: impl Into<FieldPath>, value: Value) -> Self {
        Self::Predicate(WherePredicate {
            field: field.into(),
            operator: WhereOperator::Eq,
            value,
        })
    }

    /// Conjunction of two optional expressions
    pub fn and_opt(a: Option<WhereExpr>, b: Option<WhereExpr>) -> Option<WhereExpr> {
        match (a, b) {
            (Some(Self::And(mut items)), Some(b)) => {
                items.push(b);
                Some(Self::And(items))
            }
            (Some(a), Some(b)) => Some(Self::And(vec![a, b])),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

/// Parse `filterBy`: an array of objects combined with OR, each object's
/// `{ "field.path": { "operator": value } }` entries combined with AND.
/// A single object is accepted as a one-element array.
pub fn parse_filter_by(value: &Value) -> DomainResult<Option<WhereExpr>> {
    let objects = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        Value::Object(_) => vec![value],
        _ => return Err(DomainError::args("filterBy must be an array of objects")),
    };

    let mut alternatives = vec![];
    for object in objects {
        let Value::Object(fields) = object else {
            return Err(DomainError::args("filterBy must be an array of objects"));
        };

        let mut conjunction = vec![];
        for (path, operators) in fields {
            let field = FieldPath::parse(path)?;
            let Value::Object(operators) = operators else {
                return Err(DomainError::args(format!(
                    "filter on `{path}` must be an object of operators"
                )));
            };
            for (operator, operand) in operators {
                conjunction.push(WhereExpr::Predicate(WherePredicate::new(
                    field.clone(),
                    operator.parse()?,
                    operand.clone(),
                )?));
            }
        }

        if !conjunction.is_empty() {
            alternatives.push(WhereExpr::And(conjunction));
        }
    }

    Ok(match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(WhereExpr::Or(alternatives)),
    })
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SearchArgs {
    pub query: String,
    /// Restrict the search to these fields
    pub params: Option<Vec<String>>,
}

/// Build the search condition for a service's searchable fields.
pub fn search_expr(service: &ServiceDef, args: &SearchArgs) -> DomainResult<Option<WhereExpr>> {
    if args.query.is_empty() {
        return Ok(None);
    }

    if let Some(params) = &args.params {
        for param in params {
            if !service
                .search_fields
                .iter()
                .any(|field| field.path.to_string() == *param)
            {
                return Err(DomainError::args(format!(
                    "`{param}` is not a search field of `{}`",
                    service.typename
                )));
            }
        }
    }

    let alternatives: Vec<WhereExpr> = service
        .search_fields
        .iter()
        .filter(|field| match &args.params {
            Some(params) => params.contains(&field.path.to_string()),
            None => true,
        })
        .map(|field| match field.mode {
            SearchMode::Regex => WhereExpr::Predicate(WherePredicate {
                field: field.path.clone(),
                operator: WhereOperator::Regex,
                value: Value::String(format!("/{}/i", escape_regex(&args.query))),
            }),
            SearchMode::Exact => WhereExpr::eq(field.path.clone(), Value::String(args.query.clone())),
        })
        .collect();

    Ok(match alternatives.len() {
        0 => None,
        _ => Some(WhereExpr::Or(alternatives)),
    })
}

pub fn escape_regex(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(
            ch,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '-'
        ) {
            output.push('\\');
        }
        output.push(ch);
    }
    output
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn filter_by_is_or_of_ands() {
        let expr = parse_filter_by(&json!([
            { "name": { "eq": "a", "neq": null } },
            { "createdBy.name": { "in": ["b", null] } }
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(
            WhereExpr::Or(vec![
                WhereExpr::And(vec![
                    WhereExpr::eq("name", json!("a")),
                    WhereExpr::predicate("name", WhereOperator::Neq, Value::Null).unwrap(),
                ]),
                WhereExpr::And(vec![
                    WhereExpr::predicate("createdBy.name", WhereOperator::In, json!(["b", null]))
                        .unwrap()
                ]),
            ]),
            expr
        );
    }

    #[test]
    fn array_operators_require_non_empty_arrays() {
        for operator in ["in", "nin", "contains", "containsAll"] {
            let error =
                parse_filter_by(&json!([{ "tags": { operator: [] } }])).unwrap_err();
            assert_eq!("ArgsError", error.kind().type_name(), "{operator}");

            let error =
                parse_filter_by(&json!([{ "tags": { operator: "x" } }])).unwrap_err();
            assert_eq!("ArgsError", error.kind().type_name(), "{operator}");
        }
    }

    #[test]
    fn unknown_operator() {
        let error = parse_filter_by(&json!({ "name": { "between": [1, 2] } })).unwrap_err();
        assert_eq!(
            &crate::domain_error::DomainErrorKind::Args("unknown operator `between`".into()),
            error.kind()
        );
    }

    #[test]
    fn search_over_declared_fields() {
        let service = ServiceDef::new("user")
            .search("name", SearchMode::Regex)
            .search("email", SearchMode::Exact);

        let expr = search_expr(
            &service,
            &SearchArgs {
                query: "a.b".into(),
                params: None,
            },
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            WhereExpr::Or(vec![
                WhereExpr::predicate("name", WhereOperator::Regex, json!("/a\\.b/i")).unwrap(),
                WhereExpr::eq("email", json!("a.b")),
            ]),
            expr
        );

        let narrowed = search_expr(
            &service,
            &SearchArgs {
                query: "a".into(),
                params: Some(vec!["email".into()]),
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(WhereExpr::Or(vec![WhereExpr::eq("email", json!("a"))]), narrowed);

        assert!(
            search_expr(
                &service,
                &SearchArgs {
                    query: "a".into(),
                    params: Some(vec!["role".into()]),
                },
            )
            .is_err()
        );
    }
}
