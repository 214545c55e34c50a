//! Contract tests for the line-based JSON dispatcher
//!
//! These tests feed request lines through the same entry point the binary
//! uses and pin down the response contract: the `ok`/`data`/`error` shape,
//! the stable error codes, and the process exit code each code maps to.
//!
//! Run with: `cargo test --test dispatch_contract -- --nocapture`

use upseal::dispatch::{
    self, Response, CODE_BAD_JSON, CODE_DOWNLOAD_FAILED, CODE_INIT_FAILED, CODE_INVALID_ARGS,
    CODE_NO_INPUT, CODE_REFRESH_FAILED, CODE_UNKNOWN_COMMAND,
};
use upseal::metadata::MetadataBuilder;
use upseal::KeySet;

use serde_json::{json, Value};
use std::path::PathBuf;

const TARGET_PATH: &str = "plugins/a/b/index.js";
const TARGET_BYTES: &[u8] = b"export default function widget() {\n  return \"ok\";\n}\n";

/// A published repository plus a client work area, with request lines built
/// against its paths. Publication uses the system clock so freshly published
/// metadata is within its validity window for the dispatched client.
struct Stage {
    base: PathBuf,
    keys: KeySet,
}

impl Stage {
    fn new(name: &str) -> Self {
        let base = std::env::temp_dir().join(name);
        std::fs::remove_dir_all(&base).ok();
        std::fs::create_dir_all(&base).unwrap();
        let keys = KeySet::generate().unwrap();
        Stage { base, keys }
    }

    fn repo_dir(&self) -> PathBuf {
        self.base.join("repo")
    }

    fn publish(&self, version: u64) {
        let mut builder = MetadataBuilder::new(&self.keys).with_version(version);
        builder
            .add_target_bytes(TARGET_PATH, TARGET_BYTES.to_vec())
            .unwrap();
        builder.build_all().unwrap();
        builder.publish(&self.repo_dir()).unwrap();
    }

    /// One request line naming this stage's repository and client paths.
    fn request(&self, command: &str, target: Option<&str>) -> String {
        let mut request = json!({
            "command": command,
            "repo_url": format!("file://{}", self.repo_dir().display()),
            "metadata_dir": self.base.join("client/metadata"),
            "targets_dir": self.base.join("client/targets"),
            "trusted_root": self.repo_dir().join("metadata/root.json"),
        });
        if let Some(target) = target {
            request["target"] = json!(target);
        }
        request.to_string()
    }

    fn cleanup(self) {
        std::fs::remove_dir_all(&self.base).ok();
    }
}

fn dispatch_line(line: &str) -> Response {
    dispatch::handle_line(Some(line))
}

fn assert_failure(response: &Response, code: &str, exit_code: i32) {
    assert!(!response.ok);
    assert!(response.data.is_none());
    assert_eq!(response.code(), Some(code));
    assert_eq!(response.exit_code(), exit_code);
}

fn data(response: &Response) -> &Value {
    assert!(response.ok, "expected success, got {:?}", response.error);
    response.data.as_ref().expect("success carries data")
}

#[test]
fn test_absent_input_is_no_input() {
    let response = dispatch::handle_line(None);
    assert_failure(&response, CODE_NO_INPUT, 10);
}

#[test]
fn test_malformed_line_is_bad_json() {
    let response = dispatch_line("{'command': test}");
    assert_failure(&response, CODE_BAD_JSON, 10);
}

#[test]
fn test_unknown_command_exits_internal_range() {
    let response = dispatch_line(r#"{"command": "teleport"}"#);
    assert_failure(&response, CODE_UNKNOWN_COMMAND, 50);
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("teleport"));
}

#[test]
fn test_missing_field_is_named_in_the_error() {
    let response = dispatch_line(r#"{"command": "refresh"}"#);
    assert_failure(&response, CODE_INVALID_ARGS, 10);
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("repo_url"), "got: {message}");
}

#[test]
fn test_test_command_reports_availability() {
    let response = dispatch_line(r#"{"command": "test"}"#);
    assert!(response.ok);
    assert_eq!(response.exit_code(), 0);
    let data = data(&response);
    assert_eq!(data["available"], json!(true));
    assert_eq!(data["version"], json!(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_bootstrap_reports_configuration() {
    let stage = Stage::new("upseal_contract_bootstrap");
    stage.publish(1);

    let response = dispatch_line(&stage.request("bootstrap", None));
    let data = data(&response);
    assert_eq!(data["initialized"], json!(true));
    assert_eq!(data["root_version"], json!(1));
    assert_eq!(
        data["repo_url"],
        json!(format!("file://{}", stage.repo_dir().display()))
    );

    stage.cleanup();
}

#[test]
fn test_bootstrap_without_pinned_root_is_init_failed() {
    let stage = Stage::new("upseal_contract_no_root");
    // No publication: the pinned root file does not exist.

    let response = dispatch_line(&stage.request("bootstrap", None));
    assert_failure(&response, CODE_INIT_FAILED, 20);

    stage.cleanup();
}

#[test]
fn test_refresh_reports_all_role_versions() {
    let stage = Stage::new("upseal_contract_refresh");
    stage.publish(1);

    dispatch_line(&stage.request("bootstrap", None));
    let response = dispatch_line(&stage.request("refresh", None));
    let data = data(&response);
    assert_eq!(data["refreshed"], json!(true));
    assert_eq!(data["versions"]["root"], json!(1));
    assert_eq!(data["versions"]["timestamp"], json!(1));
    assert_eq!(data["versions"]["snapshot"], json!(1));
    assert_eq!(data["versions"]["targets"], json!(1));

    stage.cleanup();
}

#[test]
fn test_download_installs_and_reports_the_artifact() {
    let stage = Stage::new("upseal_contract_download");
    stage.publish(1);

    let response = dispatch_line(&stage.request("download", Some(TARGET_PATH)));
    let data = data(&response);
    assert_eq!(data["verified"], json!(true));
    assert_eq!(data["target_path"], json!(TARGET_PATH));
    assert_eq!(data["length"], json!(TARGET_BYTES.len()));
    assert!(data["hashes"]["sha256"].is_string());

    let local_path = PathBuf::from(data["local_path"].as_str().unwrap());
    assert_eq!(std::fs::read(local_path).unwrap(), TARGET_BYTES);

    stage.cleanup();
}

#[test]
fn test_download_requires_a_target() {
    let response = dispatch_line(r#"{"command": "download"}"#);
    assert_failure(&response, CODE_INVALID_ARGS, 10);
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("target"), "got: {message}");
}

#[test]
fn test_unknown_target_is_download_failed() {
    let stage = Stage::new("upseal_contract_missing_target");
    stage.publish(1);

    let response = dispatch_line(&stage.request("download", Some("plugins/absent/index.js")));
    assert_failure(&response, CODE_DOWNLOAD_FAILED, 30);

    stage.cleanup();
}

#[test]
fn test_list_reports_the_catalog() {
    let stage = Stage::new("upseal_contract_list");
    stage.publish(1);

    let response = dispatch_line(&stage.request("list", None));
    let data = data(&response);
    assert_eq!(data["count"], json!(1));
    assert_eq!(data["targets"][0]["path"], json!(TARGET_PATH));
    assert_eq!(data["targets"][0]["length"], json!(TARGET_BYTES.len()));

    stage.cleanup();
}

#[test]
fn test_downgraded_repository_maps_to_refresh_failed() {
    let stage = Stage::new("upseal_contract_downgrade");
    stage.publish(3);
    dispatch_line(&stage.request("refresh", None));

    stage.publish(2);
    let response = dispatch_line(&stage.request("refresh", None));
    assert_failure(&response, CODE_REFRESH_FAILED, 20);
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("Rollback"), "got: {message}");

    stage.cleanup();
}

#[test]
fn test_refresh_errors_inside_download_map_to_refresh_failed() {
    let stage = Stage::new("upseal_contract_download_rollback");
    stage.publish(3);
    dispatch_line(&stage.request("refresh", None));

    // Download refreshes first, so a downgraded repository fails the refresh
    // phase rather than the artifact phase.
    stage.publish(2);
    let response = dispatch_line(&stage.request("download", Some(TARGET_PATH)));
    assert_failure(&response, CODE_REFRESH_FAILED, 20);

    stage.cleanup();
}

#[test]
fn test_local_store_failure_maps_to_refresh_failed() {
    let stage = Stage::new("upseal_contract_store_blocked");
    stage.publish(1);

    // A plain file where the client work area belongs makes every trust
    // store write fail with an io error during the refresh phase. The
    // failure is still a refresh failure, not a download or list failure.
    std::fs::write(stage.base.join("client"), b"").unwrap();

    let response = dispatch_line(&stage.request("download", Some(TARGET_PATH)));
    assert_failure(&response, CODE_REFRESH_FAILED, 20);

    let response = dispatch_line(&stage.request("list", None));
    assert_failure(&response, CODE_REFRESH_FAILED, 20);

    stage.cleanup();
}

#[test]
fn test_response_is_one_line_of_json() {
    let stage = Stage::new("upseal_contract_one_line");
    stage.publish(1);

    for command in ["bootstrap", "refresh", "list"] {
        let line = dispatch_line(&stage.request(command, None)).to_line();
        assert!(!line.contains('\n'), "{command} response spans lines");
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["ok"], json!(true));
        assert!(parsed.get("error").is_none());
    }

    let line = dispatch_line("not json").to_line();
    let parsed: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["ok"], json!(false));
    assert_eq!(parsed["error"]["code"], json!(CODE_BAD_JSON));
    assert!(parsed.get("data").is_none());

    stage.cleanup();
}
