// tests/cli.rs — end-to-end `chef-extension enable` runs against a scratch extension root
// Maintained by the chef-extension contributors | © 2025 | MIT licensed

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

fn extension_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let env = json!([{
        "name": "Chef.Bootstrap.WindowsAzure.LinuxChefClient",
        "version": 1.0,
        "handlerEnvironment": {
            "logFolder": root.join("logs"),
            "configFolder": root.join("config"),
            "statusFolder": root.join("status"),
            "heartbeatFile": root.join("heartbeat.log"),
        }
    }]);
    fs::write(root.join("HandlerEnvironment.json"), env.to_string()).unwrap();
    fs::create_dir_all(root.join("config")).unwrap();
    dir
}

fn write_settings(root: &Path, seq: u32) {
    let settings = json!({
        "runtimeSettings": [{ "handlerSettings": {
            "protectedSettingsCertThumbprint": "THUMB",
            "protectedSettings": "cipher",
            "publicSettings": {
                "runlist": "recipe[apt]",
                "extendedLogs": "true",
                "bootstrap_options": { "chef_node_name": "node", "environment": "_default" }
            }
        }}]
    });
    fs::write(root.join(format!("config/{seq}.settings")), settings.to_string()).unwrap();
}

/// Handler config pointing every side effect into the scratch root.
fn write_config(root: &Path, enable_command: &str) -> std::path::PathBuf {
    let path = root.join("handler.toml");
    let toml = format!(
        "bootstrap_dir = '{boot}'\nsuccess_marker = '{marker}'\ninstall_command = 'exit 0'\nenable_command = '{enable_command}'\n",
        boot = root.join("chef").display(),
        marker = root.join("chef_client_success").display(),
    );
    fs::write(&path, toml).unwrap();
    path
}

fn mark_bootstrapped(root: &Path) {
    fs::create_dir_all(root.join("chef")).unwrap();
    fs::write(root.join("chef/client.rb"), "node_name \"node\"\n").unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn enable(root: &Path, config: Option<&Path>) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("chef-extension").unwrap();
    cmd.arg("enable").arg("--extension-root").arg(root).env_remove("CHEF_EXTENSION_CONFIG");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.assert()
}

#[test]
fn missing_settings_is_fatal_and_sends_no_heartbeat() {
    let dir = extension_root();
    enable(dir.path(), None).failure().code(1);

    let status = read_json(&dir.path().join("status/0.status"));
    assert_eq!(status[0]["status"]["status"], "error");
    assert_eq!(
        status[0]["status"]["formattedMessage"]["message"],
        "Azure chef extension Settings file missing."
    );
    assert!(!dir.path().join("heartbeat.log").exists());
}

#[cfg(unix)]
#[test]
fn subsequent_activation_reports_ready() {
    let dir = extension_root();
    write_settings(dir.path(), 4);
    mark_bootstrapped(dir.path());
    let config = write_config(dir.path(), "exit 0");

    enable(dir.path(), Some(&config)).success();

    assert_eq!(
        read_json(&dir.path().join("heartbeat.log")),
        json!([{ "version": "1.0", "heartbeat": { "status": "ready", "code": 0, "Message": "chef-service is enabled." } }])
    );
    let status = read_json(&dir.path().join("status/4.status"));
    assert_eq!(status[0]["status"]["formattedMessage"]["message"], "chef-service enabled");
    assert!(!dir.path().join("chef_client_success").exists());
}

#[cfg(unix)]
#[test]
fn failed_enable_exits_one_with_not_ready() {
    let dir = extension_root();
    write_settings(dir.path(), 0);
    mark_bootstrapped(dir.path());
    let config = write_config(dir.path(), "exit 2");

    enable(dir.path(), Some(&config)).failure().code(1);

    let heartbeat = read_json(&dir.path().join("heartbeat.log"));
    assert_eq!(heartbeat[0]["heartbeat"]["status"], "notReady");
    assert_eq!(heartbeat[0]["heartbeat"]["Message"], "chef-service enable failed.");
    let status = read_json(&dir.path().join("status/0.status"));
    assert_eq!(status[0]["status"]["status"], "error");
    assert_eq!(status[0]["status"]["formattedMessage"]["message"], "chef-service enable failed - 2");
}
