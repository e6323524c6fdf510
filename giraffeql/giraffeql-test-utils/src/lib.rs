#![forbid(unsafe_code)]

use chrono::{DateTime, TimeZone, Utc};
use giraffeql_core::{
    JsonMap,
    session::Identity,
    system::SystemApiMock,
};
use serde_json::Value;
use unimock::{MockFn, matching};

pub mod example;
pub mod fake_sql;

pub use example::example_registry;
pub use fake_sql::FakeSql;
pub use unimock;

/// The time every mocked clock reports
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn mock_current_time() -> impl unimock::Clause {
    SystemApiMock::current_time
        .each_call(matching!())
        .returns(test_time())
}

/// The next generated id is `id`
pub fn mock_next_id(id: &str) -> impl unimock::Clause {
    SystemApiMock::generate_id
        .next_call(matching!(_))
        .returns(id.to_string())
}

pub fn identity(id: &str, role: Option<&str>, permissions: &[&str]) -> Identity {
    Identity {
        id: Value::String(id.into()),
        role: role.map(Into::into),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        is_api_key: false,
    }
}

/// A JSON object literal as a [JsonMap]
pub fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}
