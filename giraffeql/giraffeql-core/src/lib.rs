#![forbid(unsafe_code)]

use std::time::Duration;

pub mod cursor;
pub mod data_store;
pub mod domain_error;
pub mod engine;
pub mod field_path;
pub mod filter;
pub mod permission;
pub mod query_args;
pub mod registry;
pub mod resolver;
pub mod selection;
pub mod service;
pub mod session;
pub mod system;

pub use domain_error::{DomainError, DomainResult};
pub use engine::GiraffeEngine;
pub use session::Session;

/// A JSON object, the shape of every record the engine hands out
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug)]
pub struct Config {
    /// `limit` of `getMultiple` when none is given
    pub default_limit: usize,
    pub max_page_size: usize,
    /// Length of generated random ids
    pub id_length: usize,
    pub id_max_attempts: usize,
    /// Expose the messages of unexpected errors to clients
    pub dev_mode: bool,
    pub request_timeout: Duration,
    pub timeout_safety_margin: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_page_size: 500,
            id_length: 8,
            id_max_attempts: 3,
            dev_mode: false,
            request_timeout: Duration::from_secs(30),
            timeout_safety_margin: Duration::from_secs(5),
        }
    }
}
