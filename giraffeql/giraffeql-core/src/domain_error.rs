use std::fmt::Display;

use arcstr::ArcStr;
use itertools::Itertools;
use serde::Serialize;

pub type DomainResult<T> = Result<T, DomainError>;

/// An error produced anywhere below the root operation dispatcher.
///
/// The `field_path` is built up while unwinding through nested resolution,
/// so that the client can tell which part of the query failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct DomainError {
    kind: DomainErrorKind,
    field_path: Vec<ArcStr>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainErrorKind {
    #[error("{0}")]
    Permissions(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    ItemNotFound(String),
    #[error("{0}")]
    Duplicate(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Args(String),
    #[error("{0}")]
    InvalidField(String),
    /// Schema or registry misconfiguration
    #[error("{0}")]
    Initialization(String),
    /// Unexpected driver or SQL problem
    #[error("data store: {0}")]
    DataStore(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl DomainErrorKind {
    pub fn into_error(self) -> DomainError {
        DomainError {
            kind: self,
            field_path: vec![],
        }
    }

    /// The error type string exposed to clients
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Permissions(_) => "PermissionsError",
            Self::Authentication(_) => "AuthenticationError",
            Self::ItemNotFound(_) => "ItemNotFoundError",
            Self::Duplicate(_) => "DuplicateError",
            Self::Timeout(_) => "TimeoutError",
            Self::Args(_) => "ArgsError",
            Self::InvalidField(_) => "InvalidFieldError",
            Self::Initialization(_) => "InitializationError",
            Self::DataStore(_) | Self::Internal(_) => "GenericError",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Permissions(_) => 403,
            Self::Authentication(_) => 401,
            Self::ItemNotFound(_) => 404,
            Self::Duplicate(_) | Self::Args(_) | Self::InvalidField(_) => 400,
            Self::Timeout(_) | Self::Initialization(_) | Self::DataStore(_) | Self::Internal(_) => {
                500
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Permissions(msg)
            | Self::Authentication(msg)
            | Self::ItemNotFound(msg)
            | Self::Duplicate(msg)
            | Self::Timeout(msg)
            | Self::Args(msg)
            | Self::InvalidField(msg)
            | Self::Initialization(msg)
            | Self::DataStore(msg)
            | Self::Internal(msg) => msg,
        }
    }

    fn is_hidden_outside_dev_mode(&self) -> bool {
        matches!(self, Self::DataStore(_) | Self::Internal(_))
    }
}

impl DomainError {
    pub fn permissions(msg: impl Display) -> Self {
        DomainErrorKind::Permissions(msg.to_string()).into_error()
    }

    pub fn authentication(msg: impl Display) -> Self {
        DomainErrorKind::Authentication(msg.to_string()).into_error()
    }

    pub fn item_not_found(msg: impl Display) -> Self {
        DomainErrorKind::ItemNotFound(msg.to_string()).into_error()
    }

    pub fn duplicate(msg: impl Display) -> Self {
        DomainErrorKind::Duplicate(msg.to_string()).into_error()
    }

    pub fn timeout(msg: impl Display) -> Self {
        DomainErrorKind::Timeout(msg.to_string()).into_error()
    }

    pub fn args(msg: impl Display) -> Self {
        DomainErrorKind::Args(msg.to_string()).into_error()
    }

    pub fn invalid_field(msg: impl Display) -> Self {
        DomainErrorKind::InvalidField(msg.to_string()).into_error()
    }

    pub fn initialization(msg: impl Display) -> Self {
        DomainErrorKind::Initialization(msg.to_string()).into_error()
    }

    pub fn data_store(msg: impl Display) -> Self {
        DomainErrorKind::DataStore(msg.to_string()).into_error()
    }

    pub fn internal(msg: impl Display) -> Self {
        DomainErrorKind::Internal(msg.to_string()).into_error()
    }

    pub fn kind(&self) -> &DomainErrorKind {
        &self.kind
    }

    pub fn field_path(&self) -> &[ArcStr] {
        &self.field_path
    }

    /// Prepend a field path segment.
    pub fn at_field(mut self, segment: impl Into<ArcStr>) -> Self {
        self.field_path.insert(0, segment.into());
        self
    }

    /// Prepend every segment of a dotted path, outermost first.
    pub fn at_path<S: Into<ArcStr>>(mut self, segments: impl IntoIterator<Item = S>) -> Self {
        let mut prefix: Vec<ArcStr> = segments.into_iter().map(Into::into).collect();
        prefix.append(&mut self.field_path);
        self.field_path = prefix;
        self
    }

    pub fn to_client(&self, dev_mode: bool) -> ClientError {
        let message = if self.kind.is_hidden_outside_dev_mode() && !dev_mode {
            "An unexpected error occurred".to_string()
        } else {
            self.kind.message().to_string()
        };

        ClientError {
            message,
            field_path: if self.field_path.is_empty() {
                None
            } else {
                Some(self.field_path.iter().join("."))
            },
            type_name: self.kind.type_name(),
            status_code: self.kind.status_code(),
        }
    }
}

impl From<DomainErrorKind> for DomainError {
    fn from(value: DomainErrorKind) -> Self {
        value.into_error()
    }
}

/// The error object sent back to a client
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    pub message: String,
    pub field_path: Option<String>,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub status_code: u16,
}
