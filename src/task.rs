//! Task input and scan result values.
//!
//! A [`Task`] is produced elsewhere (orchestration, persistence, and transport
//! are not this crate's concern) and consumed by [`Scanner::run`]; a
//! [`BruteResult`] is emitted for every valid credential found.
//!
//! [`Scanner::run`]: crate::Scanner::run

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of scan work: a single target and the parameters steering the
/// dictionary for it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Task {
    /// Caller-assigned identifier, echoed in logs only.
    pub id: String,
    /// Target hostname or IP address.
    pub host: String,
    /// Target port, kept as text the way task producers hand it over; the
    /// runner parses it and rejects the task if it is not a valid port.
    pub port: String,
    /// Free-form parameters; see [`Params`] for the recognized keys.
    #[serde(default)]
    pub params: Params,
}

impl Task {
    /// Creates a task with empty params.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: port.into(),
            params: Params::default(),
        }
    }
}

/// JSON map of task parameters.
///
/// Recognized keys: `service` (string, required), `users` and `passwords`
/// (array of strings, or a single comma-separated string), `stop_on_success`
/// (bool, default true), `sid` (Oracle) and `domain` (SMB/RDP).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Params(serde_json::Map<String, Value>);

impl Params {
    /// Sets a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the parameter as a string, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns the parameter as a bool, or `default` when absent or not a bool.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Returns the parameter as a list of strings. Accepts either a JSON array
    /// of strings or a single comma-separated string, whose elements are
    /// trimmed. Returns `None` when the key is absent or holds neither shape.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(joined) => Some(
                joined
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// A valid credential discovered by a scan. Only positives are ever produced;
/// rejected attempts are silent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct BruteResult {
    /// Protocol name the credential was validated against.
    pub service: String,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Accepted username; empty for password-only and unauthenticated services.
    pub username: String,
    /// Accepted password; empty where the service required none.
    pub password: String,
    /// Always `true`; present so downstream reporting can store the record
    /// without consulting context.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_list_accepts_arrays_and_comma_strings() {
        let mut params = Params::default();
        params.insert("users", json!(["root", "admin"]));
        params.insert("passwords", "a, b,c");
        params.insert("port", 22);

        assert_eq!(
            params.get_str_list("users").unwrap(),
            vec!["root".to_string(), "admin".to_string()]
        );
        assert_eq!(
            params.get_str_list("passwords").unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(params.get_str_list("port"), None);
        assert_eq!(params.get_str_list("missing"), None);
    }

    #[test]
    fn bool_defaults_apply() {
        let mut params = Params::default();
        assert!(params.get_bool("stop_on_success", true));
        params.insert("stop_on_success", false);
        assert!(!params.get_bool("stop_on_success", true));
    }

    #[test]
    fn tasks_round_trip_through_json() {
        let task: Task = serde_json::from_value(json!({
            "id": "t-1",
            "host": "192.0.2.10",
            "port": "6379",
            "params": {"service": "redis", "passwords": "secret"}
        }))
        .unwrap();
        assert_eq!(task.params.get_str("service"), Some("redis"));
        assert_eq!(task.port, "6379");
    }
}
