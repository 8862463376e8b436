//! Transparency log uploads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::InterlaceConfig;
use crate::error::PersistenceError;
use crate::process;

const CREATED_MARKER: &str = "Created entry at";

/// Variables passed through to `rekor-cli`; everything else, secrets included, is withheld.
const INHERITED_ENV: [&str; 11] = [
    "PATH",
    "HOME",
    "TMPDIR",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "HTTPS_PROXY",
    "HTTP_PROXY",
    "NO_PROXY",
    "https_proxy",
    "http_proxy",
    "no_proxy",
];

/// Append-only log that records signed attestations.
#[async_trait]
pub trait TransparencyLog: Send + Sync {
    /// Uploads an in-toto attestation and returns the entry UUID.
    async fn upload(&self, attestation: &Path, public_key: &Path) -> Result<String, PersistenceError>;
}

/// Uploads through `rekor-cli`.
pub struct RekorCli {
    program: String,
    server: String,
    tmp_dir: Option<PathBuf>,
}

impl RekorCli {
    pub fn new(program: impl Into<String>, server: impl Into<String>, tmp_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            server: server.into(),
            tmp_dir,
        }
    }

    /// Builds the client when uploads are enabled and a server is configured.
    pub fn from_config(config: &InterlaceConfig) -> Option<Self> {
        if !config.tlog_enabled() {
            return None;
        }
        let server = config.signing.rekor_server.clone()?;
        Some(Self::new(
            config.tools.rekor_cli.clone(),
            server,
            config.signing.rekor_tmp_dir.clone(),
        ))
    }

    fn args(&self, attestation: &Path, public_key: &Path) -> Vec<String> {
        let mut args = vec![
            "upload".to_string(),
            "--artifact".to_string(),
            attestation.display().to_string(),
            "--type".to_string(),
            "intoto".to_string(),
            "--public-key".to_string(),
            public_key.display().to_string(),
            "--pki-format".to_string(),
            "x509".to_string(),
            format!("--rekor_server={}", self.server),
        ];
        // A blank per-deployment config keeps runs from sharing client state.
        if let Some(tmp) = &self.tmp_dir {
            args.push(format!("--config={}.rekor.yaml", tmp.display()));
        }
        args
    }
}

#[async_trait]
impl TransparencyLog for RekorCli {
    async fn upload(&self, attestation: &Path, public_key: &Path) -> Result<String, PersistenceError> {
        let mut cmd = process::command(&self.program);
        cmd.args(self.args(attestation, public_key)).env_clear();
        for name in INHERITED_ENV {
            if let Some(value) = std::env::var_os(name) {
                cmd.env(name, value);
            }
        }
        if let Some(tmp) = &self.tmp_dir {
            cmd.env("HOME", tmp);
        }

        let output = process::run_checked(&mut cmd, &self.program)
            .await
            .map_err(PersistenceError::Upload)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        entry_uuid_from_output(&stdout).ok_or_else(|| {
            PersistenceError::Upload(format!(
                "expected '{}' in output, got: {}",
                CREATED_MARKER,
                stdout.trim()
            ))
        })
    }
}

/// Pulls the entry UUID out of `... Created entry at index N, available at <url>/<uuid>`.
pub fn entry_uuid_from_output(output: &str) -> Option<String> {
    if !output.contains(CREATED_MARKER) {
        return None;
    }
    let url = output.split_whitespace().last()?;
    let uuid = url.trim_end_matches('/').rsplit('/').next()?;
    if uuid.is_empty() {
        None
    } else {
        Some(uuid.to_string())
    }
}
