// src/chefext/secrets.rs — Protected settings decryption and key extraction
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Two decrypt strategies behind one trait: native PKCS#7 on POSIX, certificate-store script on Windows.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::X509;
use serde::Deserialize;

use super::config::ExtensionConfig;
use super::error::{EnableError, Result};
use super::platform::PlatformKind;
use super::process;
use super::settings::HandlerSettings;

pub const BASE64_KEY_FORMAT: &str = "base64encoded";

/// Inputs a decrypt strategy may need; each strategy reads what it uses.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedBlob<'a> {
    pub ciphertext: &'a str,
    pub thumbprint: &'a str,
    pub config_folder: &'a Path,
}

pub trait KeyDecryptor {
    /// Returns the decrypted protected-settings JSON document.
    fn decrypt(&self, blob: &ProtectedBlob<'_>) -> Result<String>;
}

/// Opens the PKCS#7 envelope with the guest agent's certificate and private key.
#[derive(Debug, Clone)]
pub struct NativeDecryptor {
    waagent_dir: PathBuf,
}

impl NativeDecryptor {
    pub fn new(waagent_dir: impl Into<PathBuf>) -> Self {
        NativeDecryptor { waagent_dir: waagent_dir.into() }
    }
}

impl KeyDecryptor for NativeDecryptor {
    fn decrypt(&self, blob: &ProtectedBlob<'_>) -> Result<String> {
        let cert_path = self.waagent_dir.join(format!("{}.crt", blob.thumbprint));
        let key_path = self.waagent_dir.join(format!("{}.prv", blob.thumbprint));
        let cert = X509::from_pem(&fs::read(&cert_path).map_err(|e| EnableError::io(&cert_path, e))?)?;
        let key = PKey::private_key_from_pem(&fs::read(&key_path).map_err(|e| EnableError::io(&key_path, e))?)?;

        let der = decode_base64(blob.ciphertext)?;
        let envelope = Pkcs7::from_der(&der)?;
        let plain = envelope.decrypt(&key, &cert, Pkcs7Flags::empty())?;
        String::from_utf8(plain).map_err(|e| EnableError::Decrypt(e.to_string()))
    }
}

/// Delegates to a PowerShell script that decrypts via the certificate store and prints the result.
#[derive(Debug, Clone)]
pub struct ExternalDecryptor {
    script: String,
    kind: PlatformKind,
}

impl ExternalDecryptor {
    pub fn new(script: impl Into<String>, kind: PlatformKind) -> Self {
        ExternalDecryptor { script: script.into(), kind }
    }

    pub fn command_line(&self, blob: &ProtectedBlob<'_>) -> String {
        format!(
            "powershell.exe -nologo -noprofile -executionpolicy \"unrestricted\" -file {} {} {}",
            self.script,
            blob.config_folder.display(),
            blob.ciphertext
        )
    }
}

impl KeyDecryptor for ExternalDecryptor {
    fn decrypt(&self, blob: &ProtectedBlob<'_>) -> Result<String> {
        let (status, stdout) = process::capture_stdout(self.kind, &self.command_line(blob))?;
        if !status.success() {
            return Err(EnableError::Config(format!(
                "Unable to decrypt protected settings; decrypt utility exited with {}.",
                status.code().map_or_else(|| "a signal".to_string(), |c| c.to_string())
            )));
        }
        Ok(stdout)
    }
}

/// Strategy for the given platform.
pub fn decryptor_for(kind: PlatformKind, config: &ExtensionConfig, extension_root: &Path) -> Box<dyn KeyDecryptor> {
    match kind {
        PlatformKind::Windows => Box::new(ExternalDecryptor::new(config.decrypt_script(extension_root), kind)),
        PlatformKind::Posix => Box::new(NativeDecryptor::new(config.waagent_dir.clone())),
    }
}

/// Decrypted protected settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtectedSettings {
    validation_key: Option<String>,
    client_pem: Option<String>,
    chef_server_crt: Option<String>,
    secret: Option<String>,
}

impl ProtectedSettings {
    pub fn parse(document: &str) -> Result<Self> {
        serde_json::from_str(document.trim()).map_err(|e| EnableError::json("protected settings", e))
    }

    /// PEM form of the validation key. Unparseable keys are logged and returned as given.
    pub fn validation_key(&self, format: &str) -> Result<String> {
        let raw = self.validation_key.as_deref().unwrap_or_default();
        if raw.is_empty() {
            return Ok(String::new());
        }
        let text = if format == BASE64_KEY_FORMAT {
            String::from_utf8(decode_base64(raw)?).map_err(|e| EnableError::Decrypt(e.to_string()))?
        } else {
            raw.to_string()
        };
        let squeezed = squeeze_newlines(&text);

        match Rsa::private_key_from_pem(squeezed.as_bytes()).and_then(|rsa| rsa.private_key_to_pem()) {
            Ok(pem) => Ok(String::from_utf8_lossy(&pem).into_owned()),
            Err(e) => {
                tracing::error!(error = %e, "chef validation key parsing error");
                Ok(squeezed)
            }
        }
    }

    pub fn client_key(&self) -> &str {
        self.client_pem.as_deref().unwrap_or_default()
    }

    pub fn server_cert(&self) -> &str {
        self.chef_server_crt.as_deref().unwrap_or_default()
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Everything the bootstrap needs from the protected settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapSecrets {
    pub validation_key: String,
    pub client_key: String,
    pub server_cert: String,
    pub secret: Option<String>,
}

pub struct SecretResolver<'a> {
    decryptor: &'a dyn KeyDecryptor,
    thumbprint: String,
    config_folder: PathBuf,
}

impl<'a> SecretResolver<'a> {
    pub fn new(decryptor: &'a dyn KeyDecryptor, thumbprint: impl Into<String>, config_folder: impl Into<PathBuf>) -> Self {
        SecretResolver { decryptor, thumbprint: thumbprint.into(), config_folder: config_folder.into() }
    }

    pub fn open(&self, ciphertext: &str) -> Result<ProtectedSettings> {
        if ciphertext.trim().is_empty() {
            return Err(EnableError::Config("Protected settings are missing.".into()));
        }
        let blob = ProtectedBlob {
            ciphertext,
            thumbprint: &self.thumbprint,
            config_folder: &self.config_folder,
        };
        ProtectedSettings::parse(&self.decryptor.decrypt(&blob)?)
    }

    pub fn resolve_validation_key(&self, ciphertext: &str, format: &str) -> Result<String> {
        self.open(ciphertext)?.validation_key(format)
    }

    pub fn resolve(&self, settings: &HandlerSettings) -> Result<BootstrapSecrets> {
        let protected = self.open(&settings.protected_settings)?;
        Ok(BootstrapSecrets {
            validation_key: protected.validation_key(&settings.validation_key_format)?,
            client_key: protected.client_key().to_string(),
            server_cert: protected.server_cert().to_string(),
            secret: protected.secret().map(str::to_string),
        })
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    BASE64.decode(compact).map_err(|e| EnableError::Decrypt(e.to_string()))
}

fn squeeze_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\n' && out.ends_with('\n') {
            continue;
        }
        out.push(ch);
    }
    out
}
