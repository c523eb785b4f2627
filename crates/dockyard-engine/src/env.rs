//! Named configuration attached to jobs and to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::EnvError;

/// String-keyed configuration values with typed accessors.
///
/// Values are stored as strings so that every subsystem can exchange
/// settings without sharing concrete types. Booleans are encoded as `1` or
/// `0`, and ordered lists as JSON arrays of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Env {
    values: BTreeMap<String, String>,
}

impl Env {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a string value, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value stored under `key`, or an empty string when absent.
    #[must_use]
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    /// Returns `true` when a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stores a boolean value.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, if value { "1" } else { "0" });
    }

    /// Reads a boolean value.
    ///
    /// Missing keys and the values `""`, `0`, `no`, `false` and `none`
    /// (case-insensitive) read as `false`; anything else reads as `true`.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        let Some(value) = self.get(key) else {
            return false;
        };
        let value = value.trim().to_ascii_lowercase();
        !matches!(value.as_str(), "" | "0" | "no" | "false" | "none")
    }

    /// Stores an integer value.
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, value.to_string());
    }

    /// Reads an integer value, returning `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::InvalidInteger`] when the stored value does not
    /// parse.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, EnvError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|source| EnvError::InvalidInteger {
                key: key.to_owned(),
                value: raw.to_owned(),
                source,
            })
    }

    /// Stores an ordered list of strings.
    pub fn set_list<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = values.into_iter().map(Into::into).collect();
        self.set(key, serde_json::Value::from(items).to_string());
    }

    /// Reads an ordered list of strings; missing or empty keys yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::InvalidList`] when the stored value is not a JSON
    /// array of strings.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>, EnvError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|source| EnvError::InvalidList {
                key: key.to_owned(),
                source,
            }),
        }
    }

    /// Copies every value from `other` that is not already set here.
    pub fn inherit(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Iterates over the stored key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Env
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("1", true)]
    #[case("true", true)]
    #[case("yes", true)]
    #[case("", false)]
    #[case("0", false)]
    #[case("No", false)]
    #[case("FALSE", false)]
    #[case("none", false)]
    fn reads_booleans(#[case] raw: &str, #[case] expected: bool) {
        let mut env = Env::new();
        env.set("Flag", raw);
        assert_eq!(env.get_bool("Flag"), expected);
    }

    #[test]
    fn missing_boolean_reads_false() {
        assert!(!Env::new().get_bool("Tls"));
    }

    #[test]
    fn lists_preserve_order() {
        let mut env = Env::new();
        env.set_list("Dns", ["8.8.8.8", "1.1.1.1"]);
        assert_eq!(
            env.get_list("Dns").expect("list decodes"),
            vec!["8.8.8.8".to_owned(), "1.1.1.1".to_owned()]
        );
    }

    #[test]
    fn malformed_list_is_rejected() {
        let mut env = Env::new();
        env.set("Dns", "8.8.8.8");
        let error = env.get_list("Dns").expect_err("plain string is not a list");
        assert!(matches!(error, EnvError::InvalidList { .. }));
    }

    #[test]
    fn integers_report_parse_failures() {
        let mut env = Env::new();
        env.set_int("Mtu", 1500);
        assert_eq!(env.get_int("Mtu").expect("integer"), Some(1500));
        env.set("Mtu", "jumbo");
        assert!(matches!(
            env.get_int("Mtu"),
            Err(EnvError::InvalidInteger { .. })
        ));
        assert_eq!(env.get_int("Missing").expect("absent"), None);
    }

    #[test]
    fn inherit_keeps_local_overrides() {
        let mut global = Env::new();
        global.set("Version", "1.0");
        global.set("Root", "/var/lib/dockyard");
        let mut local = Env::new();
        local.set("Root", "/tmp/root");
        local.inherit(&global);
        assert_eq!(local.get("Root"), Some("/tmp/root"));
        assert_eq!(local.get("Version"), Some("1.0"));
    }
}
