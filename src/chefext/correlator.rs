// src/chefext/correlator.rs — Detached chef-client log correlation
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Hands the bootstrap run's pid, start time and success marker to an independent collector script.

use std::path::PathBuf;

use super::enable::EnableContext;
use super::error::Result;
use super::platform::HostPlatform;
use super::process::Spawner;

/// Ruby `Time#to_s` layout, which the collector script parses.
pub const RUN_START_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

pub struct LogCorrelator<'a> {
    platform: &'a dyn HostPlatform,
    spawner: &'a dyn Spawner,
    program: String,
    script: String,
}

impl<'a> LogCorrelator<'a> {
    pub fn new(
        platform: &'a dyn HostPlatform,
        spawner: &'a dyn Spawner,
        program: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        LogCorrelator { platform, spawner, program: program.into(), script: script.into() }
    }

    /// Positional arguments for the collector, in the order it reads them.
    pub fn arguments(&self, ctx: &EnableContext) -> Option<Vec<String>> {
        let pid = ctx.child_pid?;
        let started = ctx.run_start_time?;
        let marker = ctx.success_marker.as_deref()?;
        Some(vec![
            pid.to_string(),
            format!("\"{}\"", started.format(RUN_START_FORMAT)),
            chef_client_log_path(ctx).display().to_string(),
            ctx.status_file.display().to_string(),
            self.platform.chef_config_dir().to_string(),
            marker.to_string(),
        ])
    }

    pub fn command_line(&self, ctx: &EnableContext) -> Option<String> {
        let args = self.arguments(ctx)?;
        Some(format!("{} {} {}", self.program, self.script, args.join(" ")))
    }

    /// Launches the collector when this activation started a run with extended logging; never waits on it.
    pub fn maybe_fetch(&self, ctx: &EnableContext) -> Result<()> {
        let Some(command) = self.command_line(ctx) else {
            tracing::debug!("no bootstrap run this activation; nothing to correlate");
            return Ok(());
        };
        let pid = self.spawner.spawn_detached(&command)?;
        tracing::info!(pid, "chef-client log collection started in the background");
        Ok(())
    }
}

/// `log_location` from the client config when set, else `<plugin log dir>/chef-client.log`.
pub fn chef_client_log_path(ctx: &EnableContext) -> PathBuf {
    match ctx.client_config.get("log_location") {
        Some(location) => PathBuf::from(location),
        None => PathBuf::from(format!("{}/chef-client.log", ctx.plugin_log_dir.display())),
    }
}
