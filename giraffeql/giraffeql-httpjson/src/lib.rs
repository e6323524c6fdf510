#![forbid(unsafe_code)]

//! The JSON-over-HTTP surface of a [GiraffeEngine].
//!
//! A request is a single `POST /` whose body maps root operation names to their queries.
//! The response is `{"data": {...}}`, or `{"error": {...}}` with the HTTP status taken from the
//! error.

use std::sync::Arc;

use axum::{
    Extension,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use giraffeql_core::{DomainError, DomainResult, GiraffeEngine, JsonMap};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use serde_json::Value;
use tracing::debug;

use crate::{
    http_error::{Envelope, domain_error_to_response},
    identity::IdentityResolver,
};

pub mod http_error;
pub mod identity;

pub struct HttpJsonService {
    pub engine: Arc<GiraffeEngine>,
    pub identity: Arc<dyn IdentityResolver>,
}

pub fn create_httpjson_router(
    engine: Arc<GiraffeEngine>,
    identity: Arc<dyn IdentityResolver>,
) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::post(httpjson_handler))
        .layer(Extension(Arc::new(HttpJsonService { engine, identity })))
}

async fn httpjson_handler(
    Extension(service): Extension<Arc<HttpJsonService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match service.handle(&headers, &body).await {
        Ok(data) => (StatusCode::OK, axum::Json(Envelope::Data(data))).into_response(),
        Err(error) => domain_error_to_response(error, service.engine.config().dev_mode),
    }
}

impl HttpJsonService {
    async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> DomainResult<JsonMap> {
        if let Some(content_type) = headers.get(CONTENT_TYPE) {
            let is_json = content_type
                .to_str()
                .is_ok_and(|value| value.starts_with("application/json"));
            if !is_json {
                return Err(DomainError::args("invalid content-type"));
            }
        }

        let identity = self.identity.resolve(headers).await?;
        let request: Value = serde_json::from_slice(body)
            .map_err(|error| DomainError::args(format!("invalid JSON body: {error}")))?;

        debug!(
            "request with {} root operation(s), identity: {:?}",
            request.as_object().map(|ops| ops.len()).unwrap_or(0),
            identity.as_ref().map(|identity| &identity.id)
        );

        let session = self.engine.new_session(identity);
        self.engine.execute_request(&request, &session).await
    }
}
