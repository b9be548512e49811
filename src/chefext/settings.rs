// src/chefext/settings.rs — Handler environment and handler settings
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Reads HandlerEnvironment.json and the newest <seq>.settings document the host drops in configFolder.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::error::{EnableError, Result};

pub const HANDLER_ENVIRONMENT_FILE: &str = "HandlerEnvironment.json";
pub const SETTINGS_MISSING: &str = "Azure chef extension Settings file missing.";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerEnvironment {
    pub log_folder: PathBuf,
    pub config_folder: PathBuf,
    pub status_folder: PathBuf,
    pub heartbeat_file: PathBuf,
}

#[derive(Deserialize)]
struct HandlerEnvironmentEntry {
    #[serde(rename = "handlerEnvironment")]
    handler_environment: HandlerEnvironment,
}

impl HandlerEnvironment {
    /// Loads `<extension_root>/HandlerEnvironment.json` (a one-element array).
    pub fn load(extension_root: &Path) -> Result<Self> {
        let path = extension_root.join(HANDLER_ENVIRONMENT_FILE);
        let data = fs::read_to_string(&path).map_err(|e| EnableError::io(&path, e))?;
        let mut entries: Vec<HandlerEnvironmentEntry> =
            serde_json::from_str(&data).map_err(|e| EnableError::json(path.display().to_string(), e))?;
        if entries.is_empty() {
            return Err(EnableError::Config(format!("{} has no entries.", path.display())));
        }
        Ok(entries.swap_remove(0).handler_environment)
    }
}

/// Newest settings file in `config_folder`, by sorted file name.
pub fn handler_settings_file(config_folder: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(config_folder)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "settings"))
        .collect();
    candidates.sort();
    candidates.pop()
}

/// Sequence number of a `<seq>.settings` file; names the matching `<seq>.status`.
pub fn sequence_number(settings_file: &Path) -> String {
    settings_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "0".into())
}

/// Walks object keys and array indices; `None` on any miss.
pub fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| match node {
        Value::Object(map) => map.get(*key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

fn string_at(root: &Value, path: &[&str]) -> Option<String> {
    value_at(root, path).and_then(|v| v.as_str()).map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerSettings {
    pub node_name: String,
    pub environment: String,
    pub server_url: String,
    pub validation_client_name: String,
    pub runlist: String,
    pub client_rb: String,
    /// Base64 PKCS#7 envelope holding validation key, client key, server cert and secret.
    pub protected_settings: String,
    pub cert_thumbprint: String,
    pub validation_key_format: String,
    pub extended_logs: bool,
}

const HANDLER_SETTINGS: [&str; 3] = ["runtimeSettings", "0", "handlerSettings"];

impl HandlerSettings {
    pub fn load(settings_file: &Path) -> Result<Self> {
        let data = fs::read_to_string(settings_file).map_err(|e| EnableError::io(settings_file, e))?;
        let doc: Value = serde_json::from_str(&data)
            .map_err(|e| EnableError::json(settings_file.display().to_string(), e))?;
        Ok(Self::from_value(&doc))
    }

    pub fn from_value(doc: &Value) -> Self {
        let public = |keys: &[&str]| {
            let mut path: Vec<&str> = HANDLER_SETTINGS.to_vec();
            path.push("publicSettings");
            path.extend_from_slice(keys);
            string_at(doc, &path)
        };
        let handler = |key: &str| {
            let mut path: Vec<&str> = HANDLER_SETTINGS.to_vec();
            path.push(key);
            string_at(doc, &path)
        };

        HandlerSettings {
            node_name: public(&["bootstrap_options", "chef_node_name"]).unwrap_or_default(),
            environment: public(&["bootstrap_options", "environment"]).unwrap_or_else(|| "_default".into()),
            server_url: public(&["bootstrap_options", "chef_server_url"]).unwrap_or_default(),
            validation_client_name: public(&["bootstrap_options", "validation_client_name"])
                .unwrap_or_default(),
            runlist: public(&["runlist"]).unwrap_or_default(),
            client_rb: public(&["client_rb"]).unwrap_or_default(),
            protected_settings: handler("protectedSettings").unwrap_or_default(),
            cert_thumbprint: handler("protectedSettingsCertThumbprint").unwrap_or_default(),
            validation_key_format: public(&["validation_key_format"]).unwrap_or_else(|| "plaintext".into()),
            extended_logs: public(&["extendedLogs"]).map_or(false, |v| v.eq_ignore_ascii_case("true")),
        }
    }
}
