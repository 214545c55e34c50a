//! Line dispatcher: one JSON request line in, one JSON response line out.
//!
//! The dispatcher is stateless across invocations. Each request rebuilds the
//! client from persisted metadata, performs exactly one operation, and
//! reports a single-line response plus a process exit code. Failures are
//! never retried here; the caller re-invokes if it wants a retry.

use crate::client::{ClientConfig, TrustClient};
use serde::{Deserialize, Serialize};

pub const CODE_NO_INPUT: &str = "UPSEAL_NO_INPUT";
pub const CODE_INVALID_ARGS: &str = "UPSEAL_INVALID_ARGS";
pub const CODE_BAD_JSON: &str = "UPSEAL_BAD_JSON";
pub const CODE_INIT_FAILED: &str = "UPSEAL_INIT_FAILED";
pub const CODE_REFRESH_FAILED: &str = "UPSEAL_REFRESH_FAILED";
pub const CODE_DOWNLOAD_FAILED: &str = "UPSEAL_DOWNLOAD_FAILED";
pub const CODE_LIST_FAILED: &str = "UPSEAL_LIST_FAILED";
pub const CODE_UNKNOWN_COMMAND: &str = "UPSEAL_UNKNOWN_COMMAND";
pub const CODE_INTERNAL: &str = "UPSEAL_INTERNAL";

/// One decoded request line. Every field is optional at the wire level;
/// command handlers enforce what they actually need.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    pub command: Option<String>,
    pub repo_url: Option<String>,
    pub metadata_dir: Option<String>,
    pub targets_dir: Option<String>,
    pub trusted_root: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// One response line: `ok` plus either `data` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: serde_json::Value) -> Self {
        Response {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Response {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Process exit code for this response: 0 success, 10 bad input, 20
    /// trust not (re-)established, 30 artifact failure, 50 everything else.
    pub fn exit_code(&self) -> i32 {
        if self.ok {
            return 0;
        }
        match self.code() {
            Some(CODE_NO_INPUT) | Some(CODE_BAD_JSON) | Some(CODE_INVALID_ARGS) => 10,
            Some(CODE_INIT_FAILED) | Some(CODE_REFRESH_FAILED) => 20,
            Some(CODE_DOWNLOAD_FAILED) => 30,
            _ => 50,
        }
    }

    /// Serialize to the single output line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"ok\":false,\"error\":{{\"code\":\"{CODE_INTERNAL}\",\"message\":\"Response serialization failed\"}}}}"
            )
        })
    }
}

/// Handle one raw input line end to end. Infallible: every outcome,
/// including absent or unparseable input, is a response.
pub fn handle_line(line: Option<&str>) -> Response {
    match parse_request(line) {
        Ok(request) => dispatch(&request),
        Err(response) => response,
    }
}

/// Decode one raw input line. Absent or blank input is `NO_INPUT`; anything
/// that is not a JSON object of the request shape is `BAD_JSON`.
pub fn parse_request(line: Option<&str>) -> Result<Request, Response> {
    let line = line.map(str::trim).unwrap_or_default();
    if line.is_empty() {
        return Err(Response::failure(CODE_NO_INPUT, "No input received"));
    }
    serde_json::from_str(line)
        .map_err(|e| Response::failure(CODE_BAD_JSON, format!("Invalid JSON input: {e}")))
}

/// Route a decoded request to its command handler.
pub fn dispatch(request: &Request) -> Response {
    let command = match request.command.as_deref() {
        Some(command) => command,
        None => return missing_field("command"),
    };
    log::debug!("Dispatching command [{}]", command);
    match command {
        "test" => Response::success(serde_json::json!({
            "available": true,
            "version": env!("CARGO_PKG_VERSION"),
        })),
        "bootstrap" => run_bootstrap(request),
        "refresh" => run_refresh(request),
        "download" => run_download(request),
        "list" => run_list(request),
        other => Response::failure(CODE_UNKNOWN_COMMAND, format!("Unknown command: {other}")),
    }
}

fn run_bootstrap(request: &Request) -> Response {
    let client = match make_client(request) {
        Ok(client) => client,
        Err(response) => return response,
    };
    match client.bootstrap() {
        Ok(report) => Response::success(serde_json::json!({
            "initialized": true,
            "metadata_dir": client.config().metadata_dir,
            "targets_dir": client.config().targets_dir,
            "repo_url": client.config().repo_url,
            "root_version": report.root_version,
        })),
        Err(e) => Response::failure(CODE_INIT_FAILED, e.to_string()),
    }
}

fn run_refresh(request: &Request) -> Response {
    let client = match make_client(request) {
        Ok(client) => client,
        Err(response) => return response,
    };
    match client.refresh() {
        Ok(outcome) => Response::success(serde_json::json!({
            "refreshed": true,
            "versions": {
                "root": outcome.root_version,
                "timestamp": outcome.timestamp_version,
                "snapshot": outcome.snapshot_version,
                "targets": outcome.targets_version,
            },
        })),
        Err(e) => Response::failure(CODE_REFRESH_FAILED, e.to_string()),
    }
}

fn run_download(request: &Request) -> Response {
    let target = match request.target.as_deref() {
        Some(target) if !target.is_empty() => target,
        _ => return missing_field("target"),
    };
    let client = match make_client(request) {
        Ok(client) => client,
        Err(response) => return response,
    };
    // The refresh phase runs first and reports under its own code; only the
    // artifact phase is a download failure.
    if let Err(e) = client.refresh() {
        return Response::failure(CODE_REFRESH_FAILED, e.to_string());
    }
    match client.download_trusted(target) {
        Ok(downloaded) => Response::success(serde_json::json!({
            "target_path": downloaded.target_path,
            "local_path": downloaded.local_path,
            "length": downloaded.length,
            "hashes": downloaded.hashes,
            "verified": true,
        })),
        Err(e) => Response::failure(CODE_DOWNLOAD_FAILED, e.to_string()),
    }
}

fn run_list(request: &Request) -> Response {
    let client = match make_client(request) {
        Ok(client) => client,
        Err(response) => return response,
    };
    if let Err(e) = client.refresh() {
        return Response::failure(CODE_REFRESH_FAILED, e.to_string());
    }
    match client.list_trusted() {
        Ok(listings) => {
            let targets: Vec<serde_json::Value> = listings
                .iter()
                .map(|target| {
                    serde_json::json!({
                        "path": target.path,
                        "length": target.length,
                        "hashes": target.hashes,
                    })
                })
                .collect();
            Response::success(serde_json::json!({
                "count": targets.len(),
                "targets": targets,
            }))
        }
        Err(e) => Response::failure(CODE_LIST_FAILED, e.to_string()),
    }
}

fn make_client(request: &Request) -> Result<TrustClient, Response> {
    let repo_url = require(request.repo_url.as_deref(), "repo_url")?;
    let metadata_dir = require(request.metadata_dir.as_deref(), "metadata_dir")?;
    let targets_dir = require(request.targets_dir.as_deref(), "targets_dir")?;
    let trusted_root = require(request.trusted_root.as_deref(), "trusted_root")?;
    let config = ClientConfig::new(repo_url, metadata_dir, targets_dir, trusted_root);
    TrustClient::new(config).map_err(|e| Response::failure(CODE_INVALID_ARGS, e.to_string()))
}

fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, Response> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(missing_field(field)),
    }
}

fn missing_field(field: &str) -> Response {
    Response::failure(
        CODE_INVALID_ARGS,
        format!("Missing required field: {field}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_failure(response: &Response, code: &str, exit: i32) {
        assert!(!response.ok);
        assert_eq!(response.code(), Some(code));
        assert_eq!(response.exit_code(), exit);
    }

    #[test]
    fn test_absent_and_blank_input() {
        assert_failure(&handle_line(None), CODE_NO_INPUT, 10);
        assert_failure(&handle_line(Some("")), CODE_NO_INPUT, 10);
        assert_failure(&handle_line(Some("   \t ")), CODE_NO_INPUT, 10);
    }

    #[test]
    fn test_invalid_json() {
        assert_failure(&handle_line(Some("{not json")), CODE_BAD_JSON, 10);
        assert_failure(&handle_line(Some("[1, 2, 3]")), CODE_BAD_JSON, 10);
    }

    #[test]
    fn test_unknown_command() {
        let response = handle_line(Some(r#"{"command": "upgrade"}"#));
        assert_failure(&response, CODE_UNKNOWN_COMMAND, 50);
        assert!(response.error.unwrap().message.contains("upgrade"));
    }

    #[test]
    fn test_missing_command_field() {
        let response = handle_line(Some(r#"{"repo_url": "file:///tmp/repo"}"#));
        assert_failure(&response, CODE_INVALID_ARGS, 10);
        assert!(response.error.unwrap().message.contains("command"));
    }

    #[test]
    fn test_test_command_reports_version() {
        let response = handle_line(Some(r#"{"command": "test"}"#));
        assert!(response.ok);
        assert_eq!(response.exit_code(), 0);
        let data = response.data.unwrap();
        assert_eq!(data["available"], true);
        assert_eq!(data["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let response = handle_line(Some(r#"{"command": "refresh"}"#));
        assert_failure(&response, CODE_INVALID_ARGS, 10);
        assert!(response.error.unwrap().message.contains("repo_url"));
    }

    #[test]
    fn test_download_requires_target() {
        let line = r#"{"command": "download", "repo_url": "file:///tmp/repo",
            "metadata_dir": "/tmp/m", "targets_dir": "/tmp/t",
            "trusted_root": "/tmp/root.json"}"#;
        let response = handle_line(Some(line));
        assert_failure(&response, CODE_INVALID_ARGS, 10);
        assert!(response.error.unwrap().message.contains("target"));
    }

    #[test]
    fn test_unsupported_scheme_is_invalid_args() {
        let line = r#"{"command": "refresh", "repo_url": "ftp://mirror",
            "metadata_dir": "/tmp/m", "targets_dir": "/tmp/t",
            "trusted_root": "/tmp/root.json"}"#;
        assert_failure(&handle_line(Some(line)), CODE_INVALID_ARGS, 10);
    }

    #[test]
    fn test_extra_request_fields_are_tolerated() {
        let response = handle_line(Some(r#"{"command": "test", "trace": true}"#));
        assert!(response.ok);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(Response::success(serde_json::json!({})).exit_code(), 0);
        assert_eq!(Response::failure(CODE_INIT_FAILED, "x").exit_code(), 20);
        assert_eq!(Response::failure(CODE_REFRESH_FAILED, "x").exit_code(), 20);
        assert_eq!(Response::failure(CODE_DOWNLOAD_FAILED, "x").exit_code(), 30);
        assert_eq!(Response::failure(CODE_LIST_FAILED, "x").exit_code(), 50);
        assert_eq!(Response::failure(CODE_UNKNOWN_COMMAND, "x").exit_code(), 50);
        assert_eq!(Response::failure(CODE_INTERNAL, "x").exit_code(), 50);
    }

    #[test]
    fn test_response_is_one_line_and_round_trips() {
        let response = Response::failure(CODE_REFRESH_FAILED, "Rollback detected");
        let line = response.to_line();
        assert!(!line.contains('\n'));
        let parsed: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.code(), Some(CODE_REFRESH_FAILED));
        assert!(parsed.data.is_none());
    }
}
