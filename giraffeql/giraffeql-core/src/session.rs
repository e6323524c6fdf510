use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arcstr::ArcStr;
use fnv::FnvHashMap;
use serde_json::Value;

use crate::{Config, DomainError, DomainResult};

/// Session parameter holding the current identity's id
pub const CURRENT_USER_ID_PARAM: &str = "currentUserId";

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub id: Value,
    pub role: Option<ArcStr>,
    pub permissions: Vec<String>,
    pub is_api_key: bool,
}

impl Identity {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|granted| granted == permission)
    }
}

/// Per-request state: who is asking, and how much time the request has left.
#[derive(Clone, Debug)]
pub struct Session {
    identity: Option<Arc<Identity>>,
    started_at: Instant,
    timeout: Duration,
    safety_margin: Duration,
    params: Arc<FnvHashMap<ArcStr, Value>>,
}

impl Session {
    pub fn new(identity: Option<Identity>, config: &Config) -> Self {
        Self {
            identity: identity.map(Arc::new),
            started_at: Instant::now(),
            timeout: config.request_timeout,
            safety_margin: config.timeout_safety_margin,
            params: Default::default(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None, &Config::default())
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Add a named parameter available to special joins.
    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        Arc::make_mut(&mut self.params).insert(name.into(), value);
        self
    }

    pub fn with_budget(mut self, timeout: Duration, safety_margin: Duration) -> Self {
        self.timeout = timeout;
        self.safety_margin = safety_margin;
        self
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.params.get(name) {
            return Some(value.clone());
        }

        if name == CURRENT_USER_ID_PARAM {
            return Some(
                self.identity()
                    .map(|identity| identity.id.clone())
                    .unwrap_or(Value::Null),
            );
        }

        None
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the request is about to run out of time.
    pub fn is_timeout_imminent(&self) -> bool {
        self.elapsed() + self.safety_margin >= self.timeout
    }

    pub fn check_budget(&self) -> DomainResult<()> {
        if self.is_timeout_imminent() {
            Err(DomainError::timeout(format!(
                "request aborted after {}ms, close to the {}ms timeout",
                self.elapsed().as_millis(),
                self.timeout.as_millis()
            )))
        } else {
            Ok(())
        }
    }
}
