// src/chefext/enable.rs — Enable lifecycle orchestration
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// not-ready heartbeat -> bootstrap once -> install + enable service -> optional log correlation -> final heartbeat.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use super::bootstrap::{parse_client_rb, BootstrapLauncher};
use super::config::ExtensionConfig;
use super::correlator::LogCorrelator;
use super::error::{EnableError, Result};
use super::heartbeat::{HeartbeatState, HostReporter, StatusKind};
use super::platform::HostPlatform;
use super::process::Spawner;
use super::secrets::KeyDecryptor;
use super::service::ChefService;
use super::settings::{self, HandlerEnvironment, HandlerSettings, SETTINGS_MISSING};

pub const ENABLING_MESSAGE: &str = "Enabling chef-service...";
const CLIENT_ERROR_FILE: &str = "chef_client_error";

/// Per-activation state. Dropped when the process exits.
#[derive(Debug, Clone, Default)]
pub struct EnableContext {
    pub extension_root: PathBuf,
    pub config_folder: PathBuf,
    pub child_pid: Option<u32>,
    /// Set together with `run_start_time`, only when this activation launched a run with extended logs.
    pub success_marker: Option<String>,
    pub run_start_time: Option<DateTime<FixedOffset>>,
    pub extended_logs: bool,
    pub exit_code: i32,
    pub client_error: Option<String>,
    pub status_file: PathBuf,
    pub plugin_log_dir: PathBuf,
    pub client_config: BTreeMap<String, String>,
}

impl EnableContext {
    pub fn new(extension_root: &Path) -> Self {
        EnableContext { extension_root: extension_root.to_path_buf(), ..EnableContext::default() }
    }

    pub fn enable_failed(&self) -> bool {
        self.exit_code != 0
    }
}

/// Where this activation's inputs and outputs live on disk.
#[derive(Debug, Clone)]
pub struct Activation {
    pub extension_root: PathBuf,
    pub environment: HandlerEnvironment,
    pub settings_file: Option<PathBuf>,
    pub status_file: PathBuf,
}

impl Activation {
    /// Reads the handler environment and locates the newest settings file.
    pub fn discover(extension_root: &Path) -> Result<Self> {
        let environment = HandlerEnvironment::load(extension_root)?;
        let settings_file = settings::handler_settings_file(&environment.config_folder);
        let sequence = settings_file.as_deref().map_or_else(|| "0".to_string(), settings::sequence_number);
        let status_file = environment.status_folder.join(format!("{sequence}.status"));
        Ok(Activation { extension_root: extension_root.to_path_buf(), environment, settings_file, status_file })
    }
}

/// Final heartbeat for the two accumulated flags.
pub fn final_report(enable_failed: bool, client_error: Option<&str>) -> (HeartbeatState, String) {
    let (state, mut message) = if enable_failed {
        (HeartbeatState::NotReady, String::from("chef-service enable failed."))
    } else {
        (HeartbeatState::Ready, String::from("chef-service is enabled."))
    };
    if let Some(error) = client_error.filter(|e| !e.is_empty()) {
        message.push_str(" Chef client run failed with error- ");
        message.push_str(error);
    }
    (state, message)
}

pub struct EnableOrchestrator<'a> {
    pub platform: &'a dyn HostPlatform,
    pub reporter: &'a dyn HostReporter,
    pub service: &'a dyn ChefService,
    pub spawner: &'a dyn Spawner,
    pub decryptor: &'a dyn KeyDecryptor,
    pub config: &'a ExtensionConfig,
}

impl<'a> EnableOrchestrator<'a> {
    /// Runs one activation and returns the process exit code.
    pub fn run(&self, activation: &Activation) -> Result<i32> {
        let (mut ctx, settings) = self.load_settings(activation)?;
        self.reporter.report_heart_beat(HeartbeatState::NotReady, 0, ENABLING_MESSAGE)?;

        if let Err(err) = self.enable_chef(&mut ctx, &settings) {
            self.reporter.report_status(&err.to_string(), StatusKind::Error)?;
            return Err(err);
        }

        if ctx.extended_logs && ctx.child_pid.is_some() {
            self.fetch_chef_client_logs(&ctx);
        }

        let (state, message) = final_report(ctx.enable_failed(), ctx.client_error.as_deref());
        self.reporter.report_heart_beat(state, 0, &message)?;
        Ok(ctx.exit_code)
    }

    fn load_settings(&self, activation: &Activation) -> Result<(EnableContext, HandlerSettings)> {
        let Some(settings_file) = activation.settings_file.as_deref() else {
            self.reporter.report_status(SETTINGS_MISSING, StatusKind::Error)?;
            return Err(EnableError::Config(SETTINGS_MISSING.into()));
        };
        let settings = match HandlerSettings::load(settings_file) {
            Ok(settings) => settings,
            Err(err) => {
                self.reporter.report_status(&err.to_string(), StatusKind::Error)?;
                return Err(err);
            }
        };

        let mut ctx = EnableContext::new(&activation.extension_root);
        ctx.config_folder = activation.environment.config_folder.clone();
        ctx.plugin_log_dir = activation.environment.log_folder.clone();
        ctx.status_file = activation.status_file.clone();
        ctx.extended_logs = settings.extended_logs;
        ctx.client_error = self.captured_client_error();
        tracing::debug!(settings = %settings_file.display(), extended_logs = ctx.extended_logs, "handler settings loaded");
        Ok((ctx, settings))
    }

    fn enable_chef(&self, ctx: &mut EnableContext, settings: &HandlerSettings) -> Result<()> {
        let launcher = BootstrapLauncher::new(self.platform, self.spawner, self.decryptor);
        launcher.configure_once(ctx, settings)?;
        ctx.client_config = self.load_client_config(launcher.guard().path());

        self.install_chef_service(ctx)?;
        self.enable_chef_service(ctx)?;
        Ok(())
    }

    fn install_chef_service(&self, ctx: &mut EnableContext) -> Result<()> {
        let code = self.service.install();
        if code == 0 {
            self.reporter.report_status("chef-service installed", StatusKind::Success)
        } else {
            ctx.exit_code = 1;
            self.reporter.report_status(&format!("chef-service install failed - {code}"), StatusKind::Error)
        }
    }

    fn enable_chef_service(&self, ctx: &mut EnableContext) -> Result<()> {
        let code = self.service.enable();
        if code == 0 {
            self.reporter.report_status("chef-service enabled", StatusKind::Success)
        } else {
            ctx.exit_code = 1;
            self.reporter.report_status(&format!("chef-service enable failed - {code}"), StatusKind::Error)
        }
    }

    // Collection is best effort; a spawn failure must not change the enable outcome.
    fn fetch_chef_client_logs(&self, ctx: &EnableContext) {
        let correlator = LogCorrelator::new(
            self.platform,
            self.spawner,
            self.config.correlator_program.clone(),
            self.config.correlator_script(&ctx.extension_root),
        );
        if let Err(err) = correlator.maybe_fetch(ctx) {
            tracing::warn!(error = %err, "could not start chef-client log collection");
        }
    }

    fn load_client_config(&self, client_rb: &Path) -> BTreeMap<String, String> {
        match fs::read_to_string(client_rb) {
            Ok(contents) => parse_client_rb(&contents),
            Err(err) => {
                tracing::debug!(path = %client_rb.display(), error = %err, "client config not readable");
                BTreeMap::new()
            }
        }
    }

    fn captured_client_error(&self) -> Option<String> {
        let path = self
            .config
            .client_error_file
            .clone()
            .unwrap_or_else(|| self.platform.bootstrap_dir().join(CLIENT_ERROR_FILE));
        let text = fs::read_to_string(path).ok()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}
