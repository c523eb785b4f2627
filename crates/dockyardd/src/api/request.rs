//! Request parsing for the API wire protocol.
//!
//! A request is one JSON object per line:
//! `{"command": "create", "args": ["web", "/bin/sh"], "env": {"Env": "[]"}}`.

use dockyard_engine::Env;
use serde::Deserialize;

/// A single command request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApiRequest {
    /// Kernel command to run.
    pub command: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Named configuration copied onto the job.
    #[serde(default)]
    pub env: Env,
}

impl ApiRequest {
    /// Parses a request line, ignoring trailing whitespace.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed requests or an empty command.
    pub fn parse(line: &[u8]) -> Result<Self, serde_json::Error> {
        let end = line
            .iter()
            .rposition(|byte| !byte.is_ascii_whitespace())
            .map_or(0, |pos| pos + 1);
        let request: Self = serde_json::from_slice(line.get(..end).unwrap_or_default())?;
        if request.command.trim().is_empty() {
            return Err(serde::de::Error::custom("command must not be empty"));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_full_request() {
        let request = ApiRequest::parse(
            b"{\"command\":\"stop\",\"args\":[\"web\"],\"env\":{\"Timeout\":\"3\"}}\r\n",
        )
        .expect("request parses");
        assert_eq!(request.command, "stop");
        assert_eq!(request.args, vec!["web".to_owned()]);
        assert_eq!(request.env.get("Timeout"), Some("3"));
    }

    #[test]
    fn args_and_env_default_to_empty() {
        let request = ApiRequest::parse(b"{\"command\":\"version\"}\n").expect("request parses");
        assert!(request.args.is_empty());
        assert!(request.env.is_empty());
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"not json\n".as_slice())]
    #[case(b"{\"command\":\"\"}\n".as_slice())]
    #[case(b"{\"command\":\"info\",\"extra\":1}\n".as_slice())]
    fn rejects_malformed_requests(#[case] line: &[u8]) {
        assert!(ApiRequest::parse(line).is_err());
    }
}
