use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile returned by `GET /me`.
///
/// Only `username` is required; anything else the service sends is kept
/// in `extra` so nothing is lost when the profile is displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl User {
    /// Name to greet the user with
    pub fn display_name(&self) -> &str {
        self.extra
            .get("first_name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.username)
    }
}
