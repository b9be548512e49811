// src/chefext/platform.rs — Host platform strategies
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Windows and POSIX differ in paths, marker locations and config rendering. One is picked at startup.

use std::path::{Path, PathBuf};

use super::bootstrap::{BootstrapContext, PosixBootstrapContext, WindowsBootstrapContext};
use super::config::ExtensionConfig;

pub const WINDOWS_SUCCESS_MARKER: &str = "c:\\chef_client_success";
pub const POSIX_SUCCESS_MARKER: &str = "/tmp/chef_client_success";
pub const WINDOWS_CHEF_CONFIG_DIR: &str = "c:/chef";
pub const POSIX_CHEF_CONFIG_DIR: &str = "/etc/chef";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Windows,
    Posix,
}

impl PlatformKind {
    pub fn current() -> Self {
        if cfg!(windows) {
            PlatformKind::Windows
        } else {
            PlatformKind::Posix
        }
    }
}

pub trait HostPlatform {
    fn kind(&self) -> PlatformKind;

    /// Directory receiving `client.rb` and `first-boot.json`.
    fn bootstrap_dir(&self) -> &Path;

    /// File touched once the `--once` client run finishes.
    fn success_marker(&self) -> &str;

    /// Default chef configuration directory handed to the log correlator.
    fn chef_config_dir(&self) -> &str;

    fn bootstrap_context(&self) -> &dyn BootstrapContext;
}

#[derive(Debug, Clone)]
pub struct WindowsHost {
    bootstrap_dir: PathBuf,
    success_marker: String,
}

impl WindowsHost {
    pub fn new(config: &ExtensionConfig) -> Self {
        WindowsHost {
            bootstrap_dir: config
                .bootstrap_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}/chef", config.system_drive))),
            success_marker: config
                .success_marker
                .clone()
                .unwrap_or_else(|| WINDOWS_SUCCESS_MARKER.into()),
        }
    }
}

impl HostPlatform for WindowsHost {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn bootstrap_dir(&self) -> &Path {
        &self.bootstrap_dir
    }

    fn success_marker(&self) -> &str {
        &self.success_marker
    }

    fn chef_config_dir(&self) -> &str {
        WINDOWS_CHEF_CONFIG_DIR
    }

    fn bootstrap_context(&self) -> &dyn BootstrapContext {
        &WindowsBootstrapContext
    }
}

#[derive(Debug, Clone)]
pub struct PosixHost {
    bootstrap_dir: PathBuf,
    success_marker: String,
}

impl PosixHost {
    pub fn new(config: &ExtensionConfig) -> Self {
        PosixHost {
            bootstrap_dir: config
                .bootstrap_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(POSIX_CHEF_CONFIG_DIR)),
            success_marker: config
                .success_marker
                .clone()
                .unwrap_or_else(|| POSIX_SUCCESS_MARKER.into()),
        }
    }
}

impl HostPlatform for PosixHost {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Posix
    }

    fn bootstrap_dir(&self) -> &Path {
        &self.bootstrap_dir
    }

    fn success_marker(&self) -> &str {
        &self.success_marker
    }

    fn chef_config_dir(&self) -> &str {
        POSIX_CHEF_CONFIG_DIR
    }

    fn bootstrap_context(&self) -> &dyn BootstrapContext {
        &PosixBootstrapContext
    }
}

/// Strategy for the platform this binary was built for.
pub fn host_for(kind: PlatformKind, config: &ExtensionConfig) -> Box<dyn HostPlatform> {
    match kind {
        PlatformKind::Windows => Box::new(WindowsHost::new(config)),
        PlatformKind::Posix => Box::new(PosixHost::new(config)),
    }
}
