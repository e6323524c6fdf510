use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DomainError, DomainResult};

/// Position of a row within a sorted result: its id and its sort key values.
///
/// Clients see it as base64 encoded JSON and must treat it as opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub last_id: Value,
    pub last_values: Vec<Value>,
}

impl Cursor {
    pub fn encode(&self) -> String {
        // Serializing a struct of JSON values can not fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(input: &str) -> DomainResult<Self> {
        let bytes = STANDARD
            .decode(input)
            .map_err(|_| DomainError::args("invalid cursor"))?;
        serde_json::from_slice(&bytes).map_err(|_| DomainError::args("invalid cursor"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = Cursor {
            last_id: json!("b2c3d4e5"),
            last_values: vec![json!("2024-01-02T00:00:00+00:00"), Value::Null],
        };
        let encoded = cursor.encode();

        assert_eq!(cursor, Cursor::decode(&encoded).unwrap());
        assert_eq!(encoded, Cursor::decode(&encoded).unwrap().encode());
        assert_eq!(
            json!({
                "lastId": "b2c3d4e5",
                "lastValues": ["2024-01-02T00:00:00+00:00", null]
            }),
            serde_json::from_slice::<Value>(&STANDARD.decode(&encoded).unwrap()).unwrap()
        );
    }

    #[test]
    fn invalid_cursors() {
        assert!(Cursor::decode("not base64!").is_err());
        assert!(Cursor::decode(&STANDARD.encode("{\"lastId\": 1}")).is_err());
    }
}
