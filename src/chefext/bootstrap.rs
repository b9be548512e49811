// src/chefext/bootstrap.rs — First-run bootstrap: render client config, launch chef-client once
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// The rendered client.rb doubles as the "already launched" guard across activations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

use super::enable::EnableContext;
use super::error::{EnableError, Result};
use super::platform::HostPlatform;
use super::process::Spawner;
use super::runlist;
use super::secrets::{BootstrapSecrets, KeyDecryptor, SecretResolver};
use super::settings::HandlerSettings;

pub const CLIENT_RB: &str = "client.rb";
pub const FIRST_BOOT_JSON: &str = "first-boot.json";
const VALIDATION_PEM: &str = "validation.pem";
const CLIENT_PEM: &str = "client.pem";
const TRUSTED_CERTS_DIR: &str = "trusted_certs";
const SERVER_CERT: &str = "chef_server.crt";
const DATA_BAG_SECRET: &str = "encrypted_data_bag_secret";

/// A file whose presence records that something already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMarker {
    path: PathBuf,
}

impl StateMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateMarker { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes the marker, creating parent directories.
    pub fn create(&self, contents: &[u8]) -> Result<()> {
        write_file(&self.path, contents)
    }

    /// Removes the marker. Returns whether one was present.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EnableError::io(&self.path, e)),
        }
    }
}

/// Values every bootstrap renderer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub environment: String,
    pub chef_node_name: String,
    pub chef_extension_root: PathBuf,
    pub user_client_rb: String,
    pub log_location: PathBuf,
    pub chef_server_url: String,
    pub validation_client_name: String,
    pub secret: Option<String>,
}

/// Renders the bootstrap artifacts for one platform's conventions.
pub trait BootstrapContext {
    fn line_ending(&self) -> &'static str;

    /// Path as it should appear inside a Ruby string literal.
    fn ruby_path(&self, path: &Path) -> String;

    fn config_content(&self, config: &ClientConfig, secrets: &BootstrapSecrets, dir: &Path) -> String {
        let quoted = |name: &str| format!("\"{}\"", self.ruby_path(&dir.join(name)));
        let mut lines = vec![
            "log_level        :info".to_string(),
            "log_location     STDOUT".to_string(),
            format!("chef_server_url  \"{}\"", config.chef_server_url),
            format!("validation_client_name \"{}\"", config.validation_client_name),
        ];
        if !config.chef_node_name.is_empty() {
            lines.push(format!("node_name \"{}\"", config.chef_node_name));
        }
        lines.push(format!("validation_key {}", quoted(VALIDATION_PEM)));
        lines.push(format!("client_key {}", quoted(CLIENT_PEM)));
        if !secrets.server_cert.is_empty() {
            lines.push(format!("trusted_certs_dir {}", quoted(TRUSTED_CERTS_DIR)));
        }
        if config.secret.is_some() {
            lines.push(format!("encrypted_data_bag_secret {}", quoted(DATA_BAG_SECRET)));
        }
        lines.extend(config.user_client_rb.lines().map(str::to_string));

        let eol = self.line_ending();
        let mut out = lines.join(eol);
        out.push_str(eol);
        out
    }

    fn first_boot(&self, runlist: &[String]) -> String {
        let doc = serde_json::json!({ "run_list": runlist });
        let mut out = serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".into());
        out.push_str(self.line_ending());
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PosixBootstrapContext;

impl BootstrapContext for PosixBootstrapContext {
    fn line_ending(&self) -> &'static str {
        "\n"
    }

    fn ruby_path(&self, path: &Path) -> String {
        path.display().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBootstrapContext;

impl BootstrapContext for WindowsBootstrapContext {
    fn line_ending(&self) -> &'static str {
        "\r\n"
    }

    // Backslash separators, escaped for a double-quoted Ruby string.
    fn ruby_path(&self, path: &Path) -> String {
        path.display().to_string().replace(['/', '\\'], "\\\\")
    }
}

/// Exact chef-client invocation; the trailing space after `--once` is part of the contract.
pub fn chef_client_command(
    bootstrap_dir: &Path,
    environment: &str,
    log_location: &Path,
    success_marker: Option<&str>,
) -> String {
    let dir = bootstrap_dir.display();
    let mut command = format!(
        "chef-client -c {dir}/{CLIENT_RB} -j {dir}/{FIRST_BOOT_JSON} -E {environment} -L {}/chef-client.log --once ",
        log_location.display()
    );
    if let Some(marker) = success_marker {
        command.push_str(" && touch ");
        command.push_str(marker);
    }
    command
}

/// `key "value"` pairs from a rendered client.rb. Unquoted values (symbols, constants) are skipped.
pub fn parse_client_rb(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            let (key, rest) = line.split_once(char::is_whitespace)?;
            let rest = rest.trim();
            let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
            let value = rest[1..].strip_suffix(quote)?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub struct BootstrapLauncher<'a> {
    platform: &'a dyn HostPlatform,
    spawner: &'a dyn Spawner,
    decryptor: &'a dyn KeyDecryptor,
}

impl<'a> BootstrapLauncher<'a> {
    pub fn new(platform: &'a dyn HostPlatform, spawner: &'a dyn Spawner, decryptor: &'a dyn KeyDecryptor) -> Self {
        BootstrapLauncher { platform, spawner, decryptor }
    }

    pub fn guard(&self) -> StateMarker {
        StateMarker::new(self.platform.bootstrap_dir().join(CLIENT_RB))
    }

    /// Renders and launches the bootstrap run unless an earlier activation already did.
    pub fn configure_once(&self, ctx: &mut EnableContext, settings: &HandlerSettings) -> Result<()> {
        let guard = self.guard();
        if guard.exists() {
            tracing::info!(guard = %guard.path().display(), "bootstrap already configured; skipping chef-client launch");
            return Ok(());
        }

        let resolver = SecretResolver::new(self.decryptor, settings.cert_thumbprint.clone(), ctx.config_folder.clone());
        let secrets = resolver.resolve(settings)?;
        let runlist = runlist::normalize(&settings.runlist);
        let config = ClientConfig {
            environment: settings.environment.clone(),
            chef_node_name: settings.node_name.clone(),
            chef_extension_root: ctx.extension_root.clone(),
            user_client_rb: settings.client_rb.clone(),
            log_location: ctx.plugin_log_dir.clone(),
            chef_server_url: settings.server_url.clone(),
            validation_client_name: settings.validation_client_name.clone(),
            secret: secrets.secret.clone(),
        };

        let dir = self.platform.bootstrap_dir();
        let renderer = self.platform.bootstrap_context();
        write_key_material(dir, &secrets)?;
        write_file(&dir.join(FIRST_BOOT_JSON), renderer.first_boot(&runlist).as_bytes())?;
        // Written last: the guard only appears once every other artifact is in place.
        guard.create(renderer.config_content(&config, &secrets, dir).as_bytes())?;

        let success_marker = ctx.extended_logs.then(|| self.platform.success_marker().to_string());
        let command = chef_client_command(dir, &config.environment, &config.log_location, success_marker.as_deref());
        let pid = match self.launch(&command) {
            Ok(pid) => pid,
            Err(err) => {
                // No run started, so the next activation must bootstrap again.
                if let Err(cleanup) = guard.clear() {
                    tracing::warn!(guard = %guard.path().display(), error = %cleanup, "could not roll back bootstrap guard");
                }
                return Err(err);
            }
        };
        ctx.child_pid = Some(pid);
        if let Some(marker) = success_marker {
            ctx.run_start_time = Some(Local::now().fixed_offset());
            ctx.success_marker = Some(marker);
        }
        tracing::info!(pid, runlist = ?runlist, "chef-client bootstrap run launched");
        Ok(())
    }

    fn launch(&self, command: &str) -> Result<u32> {
        let marker = StateMarker::new(self.platform.success_marker());
        if marker.clear()? {
            tracing::info!(marker = %marker.path().display(), "removed stale success marker");
        }
        self.spawner.spawn_detached(command)
    }
}

fn write_key_material(dir: &Path, secrets: &BootstrapSecrets) -> Result<()> {
    if !secrets.validation_key.is_empty() {
        write_file(&dir.join(VALIDATION_PEM), secrets.validation_key.as_bytes())?;
    }
    if !secrets.client_key.is_empty() {
        write_file(&dir.join(CLIENT_PEM), secrets.client_key.as_bytes())?;
    }
    if !secrets.server_cert.is_empty() {
        write_file(&dir.join(TRUSTED_CERTS_DIR).join(SERVER_CERT), secrets.server_cert.as_bytes())?;
    }
    if let Some(secret) = &secrets.secret {
        write_file(&dir.join(DATA_BAG_SECRET), secret.as_bytes())?;
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EnableError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| EnableError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chefext::config::ExtensionConfig;
    use crate::chefext::platform::{PosixHost, WindowsHost};
    use crate::chefext::secrets::ProtectedBlob;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSpawner {
        commands: RefCell<Vec<String>>,
    }

    impl Spawner for RecordingSpawner {
        fn spawn_detached(&self, command_line: &str) -> Result<u32> {
            self.commands.borrow_mut().push(command_line.to_string());
            Ok(4242)
        }
    }

    struct StubDecryptor;

    impl KeyDecryptor for StubDecryptor {
        fn decrypt(&self, _blob: &ProtectedBlob<'_>) -> Result<String> {
            Ok(r#"{"client_pem":"CLIENT KEY","chef_server_crt":"SERVER CERT","secret":"bag"}"#.into())
        }
    }

    fn settings() -> HandlerSettings {
        HandlerSettings {
            node_name: "mynode3".into(),
            environment: "_default".into(),
            server_url: "https://api.opscode.com/organizations/clochefacc".into(),
            validation_client_name: "clochefacc-validator".into(),
            runlist: "\"recipe[getting-started]\",\"recipe[apt]\"".into(),
            protected_settings: "cipher".into(),
            ..HandlerSettings::default()
        }
    }

    fn context(root: &Path, extended_logs: bool) -> EnableContext {
        let mut ctx = EnableContext::new(root);
        ctx.plugin_log_dir = root.join("logs");
        ctx.extended_logs = extended_logs;
        ctx
    }

    fn posix_host(root: &Path) -> PosixHost {
        PosixHost::new(&ExtensionConfig {
            bootstrap_dir: Some(root.join("chef")),
            success_marker: Some(root.join("chef_client_success").display().to_string()),
            ..ExtensionConfig::default()
        })
    }

    #[test]
    fn command_without_extended_logs() {
        assert_eq!(
            chef_client_command(Path::new("/etc/chef"), "_default", Path::new("/var/log/ext"), None),
            "chef-client -c /etc/chef/client.rb -j /etc/chef/first-boot.json -E _default -L /var/log/ext/chef-client.log --once "
        );
    }

    #[test]
    fn command_with_platform_markers() {
        let windows = WindowsHost::new(&ExtensionConfig::default());
        let posix = PosixHost::new(&ExtensionConfig::default());
        assert_eq!(
            chef_client_command(Path::new("C:/chef"), "prod", Path::new("c:\\logs"), Some(windows.success_marker())),
            "chef-client -c C:/chef/client.rb -j C:/chef/first-boot.json -E prod -L c:\\logs/chef-client.log --once  && touch c:\\chef_client_success"
        );
        assert_eq!(
            chef_client_command(Path::new("/etc/chef"), "prod", Path::new("/var/log"), Some(posix.success_marker())),
            "chef-client -c /etc/chef/client.rb -j /etc/chef/first-boot.json -E prod -L /var/log/chef-client.log --once  && touch /tmp/chef_client_success"
        );
    }

    #[test]
    fn first_run_renders_and_spawns_once() {
        let root = tempfile::tempdir().unwrap();
        let host = posix_host(root.path());
        let spawner = RecordingSpawner::default();
        let launcher = BootstrapLauncher::new(&host, &spawner, &StubDecryptor);

        let mut first = context(root.path(), false);
        launcher.configure_once(&mut first, &settings()).unwrap();
        assert_eq!(first.child_pid, Some(4242));
        assert!(first.success_marker.is_none());
        assert!(first.run_start_time.is_none());

        let dir = root.path().join("chef");
        let first_boot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(FIRST_BOOT_JSON)).unwrap()).unwrap();
        assert_eq!(first_boot["run_list"], serde_json::json!(["recipe[getting-started]", "recipe[apt]"]));
        assert_eq!(fs::read_to_string(dir.join(CLIENT_PEM)).unwrap(), "CLIENT KEY");
        assert_eq!(fs::read_to_string(dir.join("trusted_certs/chef_server.crt")).unwrap(), "SERVER CERT");

        let mut second = context(root.path(), true);
        launcher.configure_once(&mut second, &settings()).unwrap();
        assert_eq!(spawner.commands.borrow().len(), 1);
        assert!(second.child_pid.is_none());
        assert!(second.success_marker.is_none());
        assert!(second.run_start_time.is_none());
    }

    #[test]
    fn extended_logs_record_marker_and_start_time() {
        let root = tempfile::tempdir().unwrap();
        let host = posix_host(root.path());
        let stale = root.path().join("chef_client_success");
        fs::write(&stale, "").unwrap();
        let spawner = RecordingSpawner::default();
        let launcher = BootstrapLauncher::new(&host, &spawner, &StubDecryptor);

        let mut ctx = context(root.path(), true);
        launcher.configure_once(&mut ctx, &settings()).unwrap();

        assert!(!stale.exists());
        assert_eq!(ctx.success_marker.as_deref(), Some(host.success_marker()));
        assert!(ctx.run_start_time.is_some());
        let command = spawner.commands.borrow()[0].clone();
        assert!(command.ends_with(&format!("--once  && touch {}", stale.display())));
    }

    /// Refuses the first launch, then behaves like `RecordingSpawner`.
    #[derive(Default)]
    struct FlakySpawner {
        attempts: RefCell<u32>,
    }

    impl Spawner for FlakySpawner {
        fn spawn_detached(&self, command_line: &str) -> Result<u32> {
            let mut attempts = self.attempts.borrow_mut();
            *attempts += 1;
            if *attempts == 1 {
                return Err(EnableError::Spawn {
                    command: command_line.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "sh: chef-client: not found"),
                });
            }
            Ok(5150)
        }
    }

    #[test]
    fn failed_launch_leaves_no_guard_and_retries() {
        let root = tempfile::tempdir().unwrap();
        let host = posix_host(root.path());
        let spawner = FlakySpawner::default();
        let launcher = BootstrapLauncher::new(&host, &spawner, &StubDecryptor);

        let mut first = context(root.path(), true);
        let err = launcher.configure_once(&mut first, &settings()).unwrap_err();
        assert!(matches!(err, EnableError::Spawn { .. }));
        assert!(!launcher.guard().exists());
        assert!(first.child_pid.is_none());
        assert!(first.run_start_time.is_none());

        let mut second = context(root.path(), true);
        launcher.configure_once(&mut second, &settings()).unwrap();
        assert_eq!(*spawner.attempts.borrow(), 2);
        assert_eq!(second.child_pid, Some(5150));
        assert!(launcher.guard().exists());
    }

    #[test]
    fn client_rb_references_written_material() {
        let secrets = BootstrapSecrets {
            validation_key: "V".into(),
            client_key: "C".into(),
            server_cert: "S".into(),
            secret: Some("bag".into()),
        };
        let config = ClientConfig {
            environment: "_default".into(),
            chef_node_name: "node".into(),
            chef_extension_root: PathBuf::from("./"),
            user_client_rb: "log_location \"/var/log/chef/client.log\"".into(),
            log_location: PathBuf::from("/var/log"),
            chef_server_url: "https://chef".into(),
            validation_client_name: "validator".into(),
            secret: Some("bag".into()),
        };
        let rendered = PosixBootstrapContext.config_content(&config, &secrets, Path::new("/etc/chef"));
        let map = parse_client_rb(&rendered);
        assert_eq!(map["chef_server_url"], "https://chef");
        assert_eq!(map["node_name"], "node");
        assert_eq!(map["trusted_certs_dir"], "/etc/chef/trusted_certs");
        assert_eq!(map["encrypted_data_bag_secret"], "/etc/chef/encrypted_data_bag_secret");
        assert_eq!(map["log_location"], "/var/log/chef/client.log");

        let windows = WindowsBootstrapContext.config_content(&config, &secrets, Path::new("C:/chef"));
        assert!(windows.contains("client_key \"C:\\\\chef\\\\client.pem\"\r\n"));
    }

    #[test]
    fn parse_skips_symbols_and_comments() {
        let map = parse_client_rb("log_level :info\n# node_name \"x\"\nnode_name 'web-1'\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map["node_name"], "web-1");
    }

    #[test]
    fn state_marker_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let marker = StateMarker::new(dir.path().join("nested/flag"));
        assert!(!marker.exists());
        marker.create(b"x").unwrap();
        assert!(marker.exists());
        assert!(marker.clear().unwrap());
        assert!(!marker.clear().unwrap());
    }
}
