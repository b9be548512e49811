// src/chefext/config.rs — Handler-side configuration
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Optional TOML overrides layered over platform defaults. Environment values arrive from the CLI edge.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::{EnableError, Result};

const DEFAULT_WAAGENT_DIR: &str = "/var/lib/waagent";
const DEFAULT_SYSTEM_DRIVE: &str = "C:";
const DEFAULT_CORRELATOR_PROGRAM: &str = "ruby";
const DEFAULT_SERVICE_INTERVAL: u32 = 1800;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Value of `%SYSTEMDRIVE%`; only consulted on Windows.
    pub system_drive: String,
    /// Overrides the platform bootstrap directory (`<drive>/chef` or `/etc/chef`).
    pub bootstrap_dir: Option<PathBuf>,
    /// Where the guest agent keeps the protected-settings certificate and key.
    pub waagent_dir: PathBuf,
    /// PowerShell decrypt script; defaults to `<ext_root>\bin\decrypt_bootstrap_key.ps1`.
    pub decrypt_script: Option<PathBuf>,
    pub correlator_program: String,
    /// Defaults to `<ext_root>/bin/chef_client_logs.rb`.
    pub correlator_script: Option<PathBuf>,
    /// Overrides the fixed success-marker location.
    pub success_marker: Option<String>,
    /// Captured client-run error text, surfaced on the final heartbeat.
    pub client_error_file: Option<PathBuf>,
    pub service_interval: u32,
    pub install_command: Option<String>,
    pub enable_command: Option<String>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        ExtensionConfig {
            system_drive: DEFAULT_SYSTEM_DRIVE.into(),
            bootstrap_dir: None,
            waagent_dir: PathBuf::from(DEFAULT_WAAGENT_DIR),
            decrypt_script: None,
            correlator_program: DEFAULT_CORRELATOR_PROGRAM.into(),
            correlator_script: None,
            success_marker: None,
            client_error_file: None,
            service_interval: DEFAULT_SERVICE_INTERVAL,
            install_command: None,
            enable_command: None,
        }
    }
}

impl ExtensionConfig {
    /// Load overrides from `path`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(ExtensionConfig::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no handler config file; using defaults");
            return Ok(ExtensionConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| EnableError::io(path, e))?;
        Self::from_toml(&contents).map_err(|source| EnableError::Toml { path: path.into(), source })
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    // Joined with '/' on every platform; the correlator command line is compared verbatim.
    pub fn correlator_script(&self, extension_root: &Path) -> String {
        match &self.correlator_script {
            Some(script) => script.display().to_string(),
            None => format!("{}/bin/chef_client_logs.rb", extension_root.display()),
        }
    }

    pub fn decrypt_script(&self, extension_root: &Path) -> String {
        match &self.decrypt_script {
            Some(script) => script.display().to_string(),
            None => format!("{}\\bin\\decrypt_bootstrap_key.ps1", extension_root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ExtensionConfig::from_toml("system_drive = 'D:'\nservice_interval = 600\n").unwrap();
        assert_eq!(cfg.system_drive, "D:");
        assert_eq!(cfg.service_interval, 600);
        assert_eq!(cfg.waagent_dir, PathBuf::from("/var/lib/waagent"));
        assert_eq!(cfg.correlator_program, "ruby");
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExtensionConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(cfg.bootstrap_dir.is_none());
    }

    #[test]
    fn script_paths_default_under_extension_root() {
        let cfg = ExtensionConfig::default();
        assert_eq!(
            cfg.correlator_script(Path::new("/var/ext")),
            "/var/ext/bin/chef_client_logs.rb"
        );
    }
}
