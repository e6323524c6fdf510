//! Arguments of the list and paginator root operations.

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    Config, DomainError, DomainResult,
    cursor::Cursor,
    field_path::FieldPath,
    filter::{SearchArgs, WhereExpr, parse_filter_by, search_expr},
    service::ServiceDef,
};

#[derive(Clone, Debug, PartialEq)]
pub struct SortField {
    pub field: FieldPath,
    pub desc: bool,
}

impl SortField {
    pub fn asc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    pub fn desc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

/// Arguments of `getMultiple{T}`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListArgs {
    pub filter: Option<WhereExpr>,
    pub sort: Vec<SortField>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Page {
    First { count: usize, after: Option<Cursor> },
    Last { count: usize, before: Option<Cursor> },
}

impl Page {
    pub fn count(&self) -> usize {
        match self {
            Self::First { count, .. } | Self::Last { count, .. } => *count,
        }
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Self::First { after, .. } => after.as_ref(),
            Self::Last { before, .. } => before.as_ref(),
        }
    }

    /// Whether the query runs in the opposite of the requested order
    pub fn is_reverted(&self) -> bool {
        matches!(self, Self::Last { .. })
    }
}

/// Arguments of `get{T}Paginator`
#[derive(Clone, Debug, PartialEq)]
pub struct PaginationArgs {
    pub page: Page,
    pub sort: Vec<SortField>,
    pub filter: Option<WhereExpr>,
    /// Flip the order of the returned page
    pub reverse: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSortField {
    field: String,
    #[serde(default)]
    desc: bool,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawListArgs {
    filter_by: Option<Value>,
    sort_by: Option<Vec<RawSortField>>,
    search: Option<SearchArgs>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawPaginationArgs {
    first: Option<usize>,
    last: Option<usize>,
    after: Option<String>,
    before: Option<String>,
    filter_by: Option<Value>,
    sort_by: Option<Vec<RawSortField>>,
    search: Option<SearchArgs>,
    #[serde(default)]
    reverse: bool,
}

impl ListArgs {
    pub fn parse(args: Option<&Value>, service: &ServiceDef, config: &Config) -> DomainResult<Self> {
        let raw: RawListArgs = deserialize_args(args)?;

        let limit = raw.limit.unwrap_or(config.default_limit);
        check_page_size(limit, config)?;

        Ok(Self {
            filter: combined_filter(raw.filter_by.as_ref(), raw.search.as_ref(), service)?,
            sort: sort_fields(raw.sort_by)?,
            limit,
            offset: raw.offset.unwrap_or(0),
        })
    }
}

impl PaginationArgs {
    pub fn parse(args: Option<&Value>, service: &ServiceDef, config: &Config) -> DomainResult<Self> {
        let raw: RawPaginationArgs = deserialize_args(args)?;

        let page = match (raw.first, raw.last) {
            (Some(count), None) => {
                if raw.before.is_some() {
                    return Err(DomainError::args("`before` requires `last`"));
                }
                Page::First {
                    count,
                    after: raw.after.as_deref().map(Cursor::decode).transpose()?,
                }
            }
            (None, Some(count)) => {
                if raw.after.is_some() {
                    return Err(DomainError::args("`after` requires `first`"));
                }
                Page::Last {
                    count,
                    before: raw.before.as_deref().map(Cursor::decode).transpose()?,
                }
            }
            _ => return Err(DomainError::args("exactly one of `first` or `last` is required")),
        };
        check_page_size(page.count(), config)?;

        Ok(Self {
            page,
            sort: sort_fields(raw.sort_by)?,
            filter: combined_filter(raw.filter_by.as_ref(), raw.search.as_ref(), service)?,
            reverse: raw.reverse,
        })
    }
}

fn deserialize_args<T: DeserializeOwned + Default>(args: Option<&Value>) -> DomainResult<T> {
    match args {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|error| DomainError::args(format!("invalid arguments: {error}"))),
    }
}

fn check_page_size(count: usize, config: &Config) -> DomainResult<()> {
    if count > config.max_page_size {
        Err(DomainError::args(format!(
            "cannot request more than {} results",
            config.max_page_size
        )))
    } else {
        Ok(())
    }
}

fn combined_filter(
    filter_by: Option<&Value>,
    search: Option<&SearchArgs>,
    service: &ServiceDef,
) -> DomainResult<Option<WhereExpr>> {
    let filter = filter_by.map(parse_filter_by).transpose()?.flatten();
    let search = search
        .map(|search| search_expr(service, search))
        .transpose()?
        .flatten();

    Ok(WhereExpr::and_opt(filter, search))
}

fn sort_fields(raw: Option<Vec<RawSortField>>) -> DomainResult<Vec<SortField>> {
    let mut output: Vec<SortField> = vec![];

    for raw_field in raw.unwrap_or_default() {
        let field = FieldPath::parse(&raw_field.field)?;
        if output.iter().any(|sort_field| sort_field.field == field) {
            return Err(DomainError::args(format!(
                "sortBy field `{field}` given more than once"
            )));
        }
        output.push(SortField {
            field,
            desc: raw_field.desc,
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(args: Value) -> DomainResult<PaginationArgs> {
        PaginationArgs::parse(Some(&args), &ServiceDef::new("user"), &Config::default())
    }

    #[test]
    fn first_and_last_are_exclusive() {
        assert!(parse(json!({})).is_err());
        assert!(parse(json!({ "first": 1, "last": 1 })).is_err());
        assert_eq!(
            Page::First {
                count: 2,
                after: None
            },
            parse(json!({ "first": 2 })).unwrap().page
        );
        assert!(parse(json!({ "last": 2 })).unwrap().page.is_reverted());
    }

    #[test]
    fn cursor_direction_must_match() {
        let cursor = Cursor {
            last_id: json!("a"),
            last_values: vec![],
        }
        .encode();

        assert!(parse(json!({ "first": 2, "before": cursor })).is_err());
        assert!(parse(json!({ "last": 2, "after": cursor })).is_err());
        assert!(parse(json!({ "last": 2, "before": cursor })).is_ok());
    }

    #[test]
    fn page_size_is_capped() {
        assert!(parse(json!({ "first": 500 })).is_ok());
        assert_eq!(
            "ArgsError",
            parse(json!({ "first": 501 })).unwrap_err().kind().type_name()
        );
    }

    #[test]
    fn sort_by_must_be_unique() {
        let args = parse(json!({
            "first": 1,
            "sortBy": [{ "field": "createdAt" }, { "field": "name", "desc": true }]
        }))
        .unwrap();
        assert_eq!(
            vec![SortField::asc("createdAt"), SortField::desc("name")],
            args.sort
        );

        assert!(
            parse(json!({
                "first": 1,
                "sortBy": [{ "field": "name" }, { "field": "name", "desc": true }]
            }))
            .is_err()
        );
    }

    #[test]
    fn list_args_defaults() {
        let args = ListArgs::parse(None, &ServiceDef::new("user"), &Config::default()).unwrap();
        assert_eq!(20, args.limit);
        assert_eq!(0, args.offset);
        assert_eq!(None, args.filter);
    }
}
