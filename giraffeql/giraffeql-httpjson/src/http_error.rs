use axum::response::{IntoResponse, Response};
use giraffeql_core::{DomainError, JsonMap, domain_error::ClientError};
use http::StatusCode;
use serde::Serialize;
use tracing::info;

/// The response body
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Envelope {
    Data(JsonMap),
    Error(ClientError),
}

pub fn domain_error_to_response(error: DomainError, dev_mode: bool) -> Response {
    info!("{error:?}");

    let client_error = error.to_client(dev_mode);
    let status = StatusCode::from_u16(client_error.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, axum::Json(Envelope::Error(client_error))).into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelopes() {
        let data = match json!({ "getUser": { "name": "Ann" } }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(
            json!({ "data": { "getUser": { "name": "Ann" } } }),
            serde_json::to_value(Envelope::Data(data)).unwrap()
        );

        let error = DomainError::item_not_found("`user` not found").at_field("getUser");
        assert_eq!(
            json!({
                "error": {
                    "message": "`user` not found",
                    "fieldPath": "getUser",
                    "type": "ItemNotFoundError",
                    "statusCode": 404
                }
            }),
            serde_json::to_value(Envelope::Error(error.to_client(false))).unwrap()
        );
    }

    #[test]
    fn status_mirrors_the_error() {
        let response = domain_error_to_response(DomainError::permissions("no"), false);
        assert_eq!(StatusCode::FORBIDDEN, response.status());

        let response = domain_error_to_response(DomainError::data_store("boom"), false);
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, response.status());
    }
}
