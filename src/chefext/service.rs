// src/chefext/service.rs — chef-service install/enable capability
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Status-code contract: 0 is success, anything else is a failure the orchestrator records and moves past.

use std::path::Path;

use super::config::ExtensionConfig;
use super::platform::PlatformKind;
use super::process;

pub trait ChefService {
    fn install(&self) -> i32;
    fn enable(&self) -> i32;
}

/// Runs one shell command per step and returns its exit code.
#[derive(Debug, Clone)]
pub struct ShellChefService {
    kind: PlatformKind,
    install_command: String,
    enable_command: String,
}

impl ShellChefService {
    pub fn new(kind: PlatformKind, install_command: impl Into<String>, enable_command: impl Into<String>) -> Self {
        ShellChefService {
            kind,
            install_command: install_command.into(),
            enable_command: enable_command.into(),
        }
    }

    /// Platform defaults, overridable from the handler config.
    pub fn from_config(kind: PlatformKind, config: &ExtensionConfig, bootstrap_dir: &Path) -> Self {
        let client_rb = format!("{}/client.rb", bootstrap_dir.display());
        let (install, enable) = match kind {
            PlatformKind::Windows => (
                format!("chef-service-manager -a install -c {client_rb}"),
                "chef-service-manager -a start".to_string(),
            ),
            PlatformKind::Posix => (
                "chef-client --version".to_string(),
                format!("chef-client --daemonize --interval {} -c {client_rb}", config.service_interval),
            ),
        };
        ShellChefService::new(
            kind,
            config.install_command.clone().unwrap_or(install),
            config.enable_command.clone().unwrap_or(enable),
        )
    }

    fn run(&self, step: &str, command_line: &str) -> i32 {
        match process::run_to_completion(self.kind, command_line) {
            Ok(status) => {
                let code = status.code().unwrap_or(1);
                tracing::info!(step, code, command = command_line, "chef-service step finished");
                code
            }
            Err(e) => {
                tracing::error!(step, error = %e, "chef-service step could not start");
                1
            }
        }
    }
}

impl ChefService for ShellChefService {
    fn install(&self) -> i32 {
        self.run("install", &self.install_command)
    }

    fn enable(&self) -> i32 {
        self.run("enable", &self.enable_command)
    }
}
