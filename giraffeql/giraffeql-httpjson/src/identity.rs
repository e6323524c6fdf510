//! Turning request headers into the caller's [Identity].
//!
//! Verifying credentials happens in front of this crate; resolvers only read what an
//! authenticating layer already established.

use async_trait::async_trait;
use giraffeql_core::{DomainError, DomainResult, session::Identity};
use http::HeaderMap;
use serde_json::Value;

pub const USER_ID_HEADER: &str = "x-giraffeql-user-id";
pub const ROLE_HEADER: &str = "x-giraffeql-role";
/// Comma separated
pub const PERMISSIONS_HEADER: &str = "x-giraffeql-permissions";
pub const API_KEY_HEADER: &str = "x-giraffeql-api-key";

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` for anonymous requests.
    async fn resolve(&self, headers: &HeaderMap) -> DomainResult<Option<Identity>>;
}

/// Every request is anonymous.
pub struct Anonymous;

#[async_trait]
impl IdentityResolver for Anonymous {
    async fn resolve(&self, _headers: &HeaderMap) -> DomainResult<Option<Identity>> {
        Ok(None)
    }
}

/// Reads the identity from `x-giraffeql-*` headers.
///
/// Only for deployments where an authenticating proxy sets these headers and strips them from
/// client requests.
pub struct TrustedHeaders;

#[async_trait]
impl IdentityResolver for TrustedHeaders {
    async fn resolve(&self, headers: &HeaderMap) -> DomainResult<Option<Identity>> {
        let Some(user_id) = header_str(headers, USER_ID_HEADER)? else {
            return Ok(None);
        };

        Ok(Some(Identity {
            id: Value::String(user_id.to_string()),
            role: header_str(headers, ROLE_HEADER)?.map(Into::into),
            permissions: header_str(headers, PERMISSIONS_HEADER)?
                .map(|permissions| {
                    permissions
                        .split(',')
                        .map(str::trim)
                        .filter(|permission| !permission.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            is_api_key: header_str(headers, API_KEY_HEADER)? == Some("true"),
        }))
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> DomainResult<Option<&'h str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| DomainError::authentication(format!("malformed `{name}` header")))
        })
        .transpose()
}
