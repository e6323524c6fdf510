use giraffeql_core::{DomainError, domain_error::DomainErrorKind};
use tracing::{error, info, warn};

use crate::client::SqlError;

/// Client input the store can not turn into SQL
#[derive(displaydoc::Display, Debug)]
pub enum PgInputError {
    /// `{0}` is not a field of `{1}`
    UnknownField(String, String),
    /// `{0}` can not be set on create
    NotAddable(String),
    /// `{0}` can not be updated
    NotUpdateable(String),
    /// `{0}` can not be null
    NotNullable(String),
    /// `{0}` is required
    MissingField(String),
    /// invalid value for `{0}`: {1}
    InvalidValue(String, String),
    /// a lookup of `{0}` must give exactly one unique key: {1}
    InvalidLookup(String, String),
    /// `{0}` requires at least one non-null value
    EmptyValueSet(String),
    /// can not sort by `{0}` through a link type
    SortThroughLink(String),
    /// `{0}` is not sortable
    NotSortable(String),
    /// cursor does not match the sort order
    CursorMismatch,
}

impl From<PgInputError> for DomainError {
    fn from(value: PgInputError) -> Self {
        info!("pg input error: {value:?}");
        DomainErrorKind::Args(format!("{value}")).into_error()
    }
}

/// Registry definitions the store can not map to tables
#[derive(displaydoc::Display, Debug)]
pub enum PgModelError {
    /// `{0}` is not a sql field
    NotSqlField(String),
    /// `{0}` has no object type
    NoObjectType(String),
    /// `{0}` of `{1}` has no column `{2}`
    ColumnNotFound(String, String, String),
}

impl From<PgModelError> for DomainError {
    fn from(value: PgModelError) -> Self {
        error!("pg model error: {value:?}");
        DomainErrorKind::InvalidField(format!("{value}")).into_error()
    }
}

#[derive(displaydoc::Display, Debug)]
pub enum PgDataError {
    /// connection: {0}
    Connection(SqlError),
    /// query: {0}
    Query(SqlError),
    /// insert: {0}
    Insert(SqlError),
    /// update: {0}
    Update(SqlError),
    /// delete: {0}
    Delete(SqlError),
    /// begin transaction: {0}
    BeginTransaction(SqlError),
    /// commit transaction: {0}
    CommitTransaction(SqlError),
    /// nothing inserted
    NothingInserted,
    /// missing column `{0}` in result
    MissingColumn(String),
}

impl PgDataError {
    fn unique_violation(&self) -> Option<&SqlError> {
        match self {
            Self::Insert(error) | Self::Update(error) if error.is_unique_violation() => Some(error),
            _ => None,
        }
    }
}

impl From<PgDataError> for DomainError {
    fn from(value: PgDataError) -> Self {
        if let Some(sql_error) = value.unique_violation() {
            info!("unique violation: {sql_error}");
            let message = match &sql_error.constraint {
                Some(constraint) => format!("a record with the same `{constraint}` already exists"),
                None => "a record with the same unique key already exists".to_string(),
            };
            return DomainErrorKind::Duplicate(message).into_error();
        }

        warn!("pg data error: {value:?}");
        DomainErrorKind::DataStore(format!("{value}")).into_error()
    }
}

/// Id generation gave up
#[derive(displaydoc::Display, Debug)]
pub enum PgIdError {
    /// unable to generate unique ID for `{0}` after {1} attempts
    Exhausted(String, usize),
}

impl From<PgIdError> for DomainError {
    fn from(value: PgIdError) -> Self {
        error!("{value}");
        DomainErrorKind::Internal(format!("{value}")).into_error()
    }
}
