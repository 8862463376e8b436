//! Kustomize source verification.
//!
//! The application directory must carry a hash manifest (one
//! `<sha256> <mode> <relative-path>` line per file) and a detached signature
//! over it made by a key in the configured keyring. The signature is checked
//! first; only then is every listed file re-hashed.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::SourceVerifier;
use crate::app::ApplicationContext;
use crate::config::VerificationSettings;
use crate::error::{InterlaceError, VerificationError};
use crate::git::{parse_git_url, GitRepository};
use crate::process;

/// Checks a detached signature over a file against a keyring.
#[async_trait]
pub trait DetachedSignatureCheck: Send + Sync {
    async fn verify_detached(
        &self,
        keyring: &Path,
        signature: &Path,
        data: &Path,
    ) -> Result<bool, VerificationError>;
}

/// `gpgv --keyring <keyring> <signature> <data>`.
pub struct GpgvCli {
    program: String,
}

impl GpgvCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DetachedSignatureCheck for GpgvCli {
    async fn verify_detached(
        &self,
        keyring: &Path,
        signature: &Path,
        data: &Path,
    ) -> Result<bool, VerificationError> {
        let mut cmd = process::command(&self.program);
        cmd.arg("--keyring").arg(keyring).arg(signature).arg(data);

        let output = process::run(&mut cmd, &self.program)
            .await
            .map_err(VerificationError::Tool)?;
        if output.status.success() {
            Ok(true)
        } else {
            tracing::warn!(
                "Signature over {} rejected: {}",
                data.display(),
                process::format_output_error(&output)
            );
            Ok(false)
        }
    }
}

/// One line of the hash manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub sha256: String,
    pub path: String,
}

/// Parses hash-manifest lines; lines with fewer than three fields are ignored.
pub fn parse_hash_list(content: &str) -> Vec<HashEntry> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            Some(HashEntry {
                sha256: fields[0].to_string(),
                path: fields[2..].join(" "),
            })
        })
        .collect()
}

/// Re-hashes every entry under `base_dir`; true only if all of them match.
pub fn compare_hashes(entries: &[HashEntry], base_dir: &Path) -> Result<bool, VerificationError> {
    for entry in entries {
        let Some(relative) = contained_path(&entry.path) else {
            tracing::warn!("Hash entry '{}' escapes the checkout", entry.path);
            return Ok(false);
        };

        let path = base_dir.join(relative);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Listed file {} is missing", path.display());
                return Ok(false);
            }
            Err(e) => return Err(VerificationError::ReadFile { path, source: e }),
        };

        let computed = hex::encode(Sha256::digest(&content));
        if !computed.eq_ignore_ascii_case(&entry.sha256) {
            tracing::warn!(
                "Hash mismatch for {}: expected {}, computed {}",
                entry.path,
                entry.sha256,
                computed
            );
            return Ok(false);
        }
    }
    Ok(true)
}

fn contained_path(raw: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Clones the application source and checks its signed hash manifest.
pub struct KustomizeVerifier {
    git_program: String,
    settings: VerificationSettings,
    check: Arc<dyn DetachedSignatureCheck>,
}

impl KustomizeVerifier {
    pub fn new(
        git_program: impl Into<String>,
        settings: VerificationSettings,
        check: Arc<dyn DetachedSignatureCheck>,
    ) -> Self {
        Self {
            git_program: git_program.into(),
            settings,
            check,
        }
    }

    /// Verifies an already checked-out application directory.
    pub async fn verify_checkout(&self, base_dir: &Path) -> Result<bool, VerificationError> {
        let hash_list = base_dir.join(&self.settings.hash_list_file);
        let signature = base_dir.join(&self.settings.signature_file);

        for required in [&hash_list, &signature] {
            if !required.is_file() {
                tracing::warn!("Source material file {} not found", required.display());
                return Ok(false);
            }
        }

        if !self
            .check
            .verify_detached(&self.settings.keyring_path, &signature, &hash_list)
            .await?
        {
            return Ok(false);
        }

        let content = std::fs::read_to_string(&hash_list).map_err(|e| VerificationError::ReadFile {
            path: hash_list.clone(),
            source: e,
        })?;
        compare_hashes(&parse_hash_list(&content), base_dir)
    }
}

/// Reference to check out: the URL's own ref, then the synced commit, then the
/// target revision unless it is the symbolic `HEAD`.
fn checkout_reference<'a>(url_ref: &'a str, ctx: &'a ApplicationContext) -> Option<&'a str> {
    [url_ref, ctx.source_commit_sha(), ctx.source_revision()]
        .into_iter()
        .find(|r| !r.is_empty() && *r != "HEAD")
}

#[async_trait]
impl SourceVerifier for KustomizeVerifier {
    async fn verify_source_material(&self, ctx: &ApplicationContext) -> Result<bool, InterlaceError> {
        let url = parse_git_url(ctx.source_repo_url()).map_err(|message| {
            VerificationError::InvalidSourceUrl {
                url: ctx.source_repo_url().to_string(),
                message,
            }
        })?;

        let checkout = ctx.source_checkout_dir();
        let reference = checkout_reference(&url.git_ref, ctx);
        tracing::debug!(
            "Cloning {} at {} into {}",
            url.clone_url(),
            reference.unwrap_or("default branch"),
            checkout.display()
        );
        GitRepository::shallow_clone(&self.git_program, &url.clone_url(), &checkout, reference, None)
            .await
            .map_err(VerificationError::Checkout)?;

        let base_dir = checkout.join(ctx.app_path());
        let verified = self.verify_checkout(&base_dir).await?;
        if verified {
            tracing::info!(app = ctx.app_name(), "Source material verified");
        }
        Ok(verified)
    }
}
