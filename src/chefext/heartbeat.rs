// src/chefext/heartbeat.rs — Host-facing heartbeat and status reporting
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Both documents are one-element JSON arrays the guest agent polls from disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::error::{EnableError, Result};

const HANDLER_NAME: &str = "Chef Extension Handler";
const OPERATION: &str = "chef-client-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatState {
    #[serde(rename = "notReady")]
    NotReady,
    #[serde(rename = "ready")]
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Success,
    Error,
}

/// Status channel back to the host.
pub trait HostReporter {
    fn report_heart_beat(&self, state: HeartbeatState, code: i32, message: &str) -> Result<()>;
    fn report_status(&self, message: &str, status: StatusKind) -> Result<()>;
}

#[derive(Serialize)]
struct HeartbeatDoc<'a> {
    version: &'static str,
    heartbeat: HeartbeatBody<'a>,
}

#[derive(Serialize)]
struct HeartbeatBody<'a> {
    status: HeartbeatState,
    code: i32,
    #[serde(rename = "Message")]
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusDoc<'a> {
    version: &'static str,
    #[serde(rename = "timestampUTC")]
    timestamp_utc: String,
    status: StatusBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody<'a> {
    name: &'static str,
    operation: &'static str,
    status: StatusKind,
    code: i32,
    formatted_message: FormattedMessage<'a>,
}

#[derive(Serialize)]
struct FormattedMessage<'a> {
    lang: &'static str,
    message: &'a str,
}

/// Writes the heartbeat file and the `<seq>.status` file named by the handler environment.
#[derive(Debug, Clone)]
pub struct FileReporter {
    heartbeat_file: PathBuf,
    status_file: PathBuf,
}

impl FileReporter {
    pub fn new(heartbeat_file: impl Into<PathBuf>, status_file: impl Into<PathBuf>) -> Self {
        FileReporter { heartbeat_file: heartbeat_file.into(), status_file: status_file.into() }
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }
}

impl HostReporter for FileReporter {
    fn report_heart_beat(&self, state: HeartbeatState, code: i32, message: &str) -> Result<()> {
        let doc = [HeartbeatDoc {
            version: "1.0",
            heartbeat: HeartbeatBody { status: state, code, message },
        }];
        tracing::info!(?state, code, text = message, "heartbeat");
        write_json(&self.heartbeat_file, &doc)
    }

    fn report_status(&self, message: &str, status: StatusKind) -> Result<()> {
        let doc = [StatusDoc {
            version: "1.0",
            timestamp_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            status: StatusBody {
                name: HANDLER_NAME,
                operation: OPERATION,
                status,
                code: 0,
                formatted_message: FormattedMessage { lang: "en-US", message },
            },
        }];
        match status {
            StatusKind::Success => tracing::info!(text = message, "status"),
            StatusKind::Error => tracing::error!(text = message, "status"),
        }
        write_json(&self.status_file, &doc)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EnableError::io(parent, e))?;
    }
    let json = serde_json::to_string(value).map_err(|e| EnableError::json(path.display().to_string(), e))?;
    fs::write(path, json).map_err(|e| EnableError::io(path, e))
}
