// src/main.rs — chef-extension CLI entrypoint
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Invoked by the guest agent once per lifecycle event; `enable` is re-run on every poll.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chef_extension::chefext::config::ExtensionConfig;
use chef_extension::chefext::enable::{Activation, EnableOrchestrator};
use chef_extension::chefext::heartbeat::FileReporter;
use chef_extension::chefext::platform::{self, PlatformKind};
use chef_extension::chefext::process::ShellSpawner;
use chef_extension::chefext::secrets;
use chef_extension::chefext::service::ShellChefService;
use chef_extension::Result;

#[derive(Parser)]
#[command(
    name = "chef-extension",
    version,
    about = "chef-extension — VM extension handler that bootstraps and supervises chef-client",
    long_about = "Handles the extension lifecycle events raised by the guest agent. `enable` renders the chef bootstrap, launches the first chef-client run exactly once and reports heartbeat/status back to the host."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Extension install directory (holds HandlerEnvironment.json)
    #[arg(long, global = true, default_value = ".")]
    extension_root: PathBuf,

    /// Optional TOML file overriding handler defaults
    #[arg(long, global = true, env = "CHEF_EXTENSION_CONFIG")]
    config: Option<PathBuf>,

    /// System drive used for Windows bootstrap paths
    #[arg(long, global = true, env = "SYSTEMDRIVE")]
    system_drive: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap chef-client once, install and enable chef-service, report heartbeat
    Enable,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Enable => enable(&cli),
    };

    match outcome {
        Ok(code) => process::exit(code),
        Err(err) => {
            tracing::error!(error = %err, "enable aborted");
            process::exit(1);
        }
    }
}

fn enable(cli: &Cli) -> Result<i32> {
    let mut config = ExtensionConfig::load(cli.config.as_deref())?;
    if let Some(drive) = &cli.system_drive {
        config.system_drive = drive.clone();
    }

    let kind = PlatformKind::current();
    let host = platform::host_for(kind, &config);
    let activation = Activation::discover(&cli.extension_root)?;
    let reporter = FileReporter::new(&activation.environment.heartbeat_file, &activation.status_file);
    let service = ShellChefService::from_config(kind, &config, host.bootstrap_dir());
    let spawner = ShellSpawner::new(kind);
    let decryptor = secrets::decryptor_for(kind, &config, &cli.extension_root);

    let orchestrator = EnableOrchestrator {
        platform: host.as_ref(),
        reporter: &reporter,
        service: &service,
        spawner: &spawner,
        decryptor: decryptor.as_ref(),
        config: &config,
    };
    orchestrator.run(&activation)
}
