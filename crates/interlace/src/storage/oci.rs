use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{sign_cycle_manifest, SigningServices, StorageBackend};
use crate::app::ApplicationContext;
use crate::config::{OciStorageSettings, StorageKind};
use crate::error::{InterlaceError, PersistenceError, RetrievalError};
use crate::manifest::ManifestDocument;
use crate::process;
use crate::signing::{decode_message, MESSAGE_ANNOTATION};
use crate::workspace::{self, ATTESTATION_FILE_NAME, SIGNED_MANIFEST_FILE_NAME};

const SIGNED_MANIFEST_MEDIA_TYPE: &str = "application/vnd.interlace.manifest.signed.v1+yaml";
const ATTESTATION_ARTIFACT_TYPE: &str = "application/vnd.dsse.envelope.v1+json";

/// Directory the previous artifact is pulled into.
const PULL_DIR: &str = "pulled";

/// `<registry>/<prefix>-<app>:<tag>`.
pub fn artifact_reference(settings: &OciStorageSettings, app_name: &str) -> String {
    format!(
        "{}/{}-{}:{}",
        settings.registry.trim_end_matches('/'),
        settings.image_prefix,
        app_name,
        settings.image_tag
    )
}

/// Registry access for signed manifest artifacts.
#[async_trait]
pub trait OciTransport: Send + Sync {
    /// Pushes `file_name` from `dir` as the artifact `reference`.
    async fn push(&self, reference: &str, dir: &Path, file_name: &str) -> Result<(), PersistenceError>;

    /// Pulls `reference` into `dest`; `Ok(false)` when the artifact does not exist.
    async fn pull(&self, reference: &str, dest: &Path) -> Result<bool, RetrievalError>;

    /// The registry digest of `reference`.
    async fn resolve(&self, reference: &str) -> Result<String, PersistenceError>;

    /// Attaches `file_name` from `dir` to `reference` as a referrer.
    async fn attach(
        &self,
        reference: &str,
        dir: &Path,
        file_name: &str,
        artifact_type: &str,
    ) -> Result<(), PersistenceError>;
}

/// Drives the `oras` CLI.
pub struct OrasCli {
    program: String,
}

impl OrasCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("manifest unknown")
}

#[async_trait]
impl OciTransport for OrasCli {
    async fn push(&self, reference: &str, dir: &Path, file_name: &str) -> Result<(), PersistenceError> {
        let mut cmd = process::command(&self.program);
        cmd.current_dir(dir)
            .arg("push")
            .arg(reference)
            .arg(format!("{}:{}", file_name, SIGNED_MANIFEST_MEDIA_TYPE));
        process::run_checked(&mut cmd, &self.program)
            .await
            .map(|_| ())
            .map_err(|message| PersistenceError::Push {
                reference: reference.to_string(),
                message,
            })
    }

    async fn pull(&self, reference: &str, dest: &Path) -> Result<bool, RetrievalError> {
        let mut cmd = process::command(&self.program);
        cmd.arg("pull").arg(reference).arg("-o").arg(dest);
        let output = process::run(&mut cmd, &self.program)
            .await
            .map_err(|message| RetrievalError::Pull {
                reference: reference.to_string(),
                message,
            })?;

        if output.status.success() {
            return Ok(true);
        }
        let message = process::format_output_error(&output);
        if is_not_found(&message) {
            return Ok(false);
        }
        Err(RetrievalError::Pull {
            reference: reference.to_string(),
            message,
        })
    }

    async fn resolve(&self, reference: &str) -> Result<String, PersistenceError> {
        let mut cmd = process::command(&self.program);
        cmd.arg("resolve").arg(reference);
        let output = process::run_checked(&mut cmd, &self.program)
            .await
            .map_err(|message| PersistenceError::Push {
                reference: reference.to_string(),
                message,
            })?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn attach(
        &self,
        reference: &str,
        dir: &Path,
        file_name: &str,
        artifact_type: &str,
    ) -> Result<(), PersistenceError> {
        let mut cmd = process::command(&self.program);
        cmd.current_dir(dir)
            .arg("attach")
            .arg("--artifact-type")
            .arg(artifact_type)
            .arg(reference)
            .arg(file_name);
        process::run_checked(&mut cmd, &self.program)
            .await
            .map(|_| ())
            .map_err(|message| PersistenceError::Push {
                reference: reference.to_string(),
                message,
            })
    }
}

/// Publishes the signed manifest as an OCI artifact.
pub struct OciBackend {
    ctx: ApplicationContext,
    signing: SigningServices,
    transport: Arc<dyn OciTransport>,
    reference: String,
}

impl OciBackend {
    pub fn new(
        ctx: ApplicationContext,
        signing: SigningServices,
        transport: Arc<dyn OciTransport>,
        settings: &OciStorageSettings,
    ) -> Self {
        let reference = artifact_reference(settings, ctx.app_name());
        Self {
            ctx,
            signing,
            transport,
            reference,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

#[async_trait]
impl StorageBackend for OciBackend {
    async fn get_latest_manifest_content(&self) -> Result<Option<Vec<u8>>, InterlaceError> {
        let dest = self.ctx.work_dir().join(PULL_DIR);
        if !self.transport.pull(&self.reference, &dest).await? {
            tracing::info!(app = self.ctx.app_name(), "No artifact at {}", self.reference);
            return Ok(None);
        }

        let path = dest.join(SIGNED_MANIFEST_FILE_NAME);
        let corrupt = |message: String| RetrievalError::Corrupt {
            path: path.clone(),
            message,
        };
        let content = workspace::read(&path)?;
        let signed = ManifestDocument::parse(&String::from_utf8_lossy(&content))
            .map_err(|e| corrupt(e.to_string()))?;
        let message = signed
            .objects()
            .first()
            .and_then(|object| object["metadata"]["annotations"][MESSAGE_ANNOTATION].as_str())
            .ok_or_else(|| corrupt("first document carries no signed message".to_string()))?;
        let manifest = decode_message(message).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(manifest.into_bytes()))
    }

    async fn store_manifest_bundle(&self, _source_verified: bool) -> Result<(), InterlaceError> {
        sign_cycle_manifest(&self.ctx, &self.signing.keys)?;
        self.transport
            .push(&self.reference, self.ctx.work_dir(), SIGNED_MANIFEST_FILE_NAME)
            .await?;
        tracing::info!(app = self.ctx.app_name(), "Pushed signed manifest to {}", self.reference);
        Ok(())
    }

    async fn store_manifest_provenance(
        &self,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Result<(), InterlaceError> {
        let digest = self.transport.resolve(&self.reference).await?;
        self.signing
            .attestations
            .generate_provenance(&self.ctx, &self.reference, &digest, started, finished, true)
            .await?;
        self.transport
            .attach(
                &self.reference,
                self.ctx.work_dir(),
                ATTESTATION_FILE_NAME,
                ATTESTATION_ARTIFACT_TYPE,
            )
            .await?;
        Ok(())
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Oci
    }
}
