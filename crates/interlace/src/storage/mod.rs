//! Persistence of signed manifests and their provenance.
//!
//! Exactly one backend is active per deployment. Backends are built per
//! cycle around that cycle's [`ApplicationContext`].

mod annotation;
mod git;
mod oci;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::app::ApplicationContext;
use crate::attestation::AttestationBuilder;
use crate::config::{InterlaceConfig, StorageKind};
use crate::error::{ConfigError, InterlaceError, PersistenceError, RetrievalError};
use crate::git::GitCredentials;
use crate::manifest::ManifestDocument;
use crate::signing::{sha256_hex, sign_manifest, KeySource, SignedBundle};
use crate::workspace;

pub use annotation::{is_marked, merge_patches, AnnotationBackend, KubectlPatcher, ResourcePatcher};
pub use git::{signed_config_map, GitBackend, GitTarget, COMMIT_MESSAGE};
pub use oci::{artifact_reference, OciBackend, OciTransport, OrasCli};

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The most recently stored manifest, or `None` when nothing was stored yet.
    async fn get_latest_manifest_content(&self) -> Result<Option<Vec<u8>>, InterlaceError>;

    /// Signs the cycle's manifest and persists it.
    async fn store_manifest_bundle(&self, source_verified: bool) -> Result<(), InterlaceError>;

    /// Generates, signs, and records provenance for the stored output.
    async fn store_manifest_provenance(
        &self,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Result<(), InterlaceError>;

    fn kind(&self) -> StorageKind;
}

/// Builds the configured backend for one cycle.
pub trait BackendFactory: Send + Sync {
    fn create(&self, ctx: &ApplicationContext) -> Result<Box<dyn StorageBackend>, InterlaceError>;
}

/// Signing material every backend needs.
#[derive(Clone)]
pub struct SigningServices {
    pub keys: Arc<KeySource>,
    pub attestations: Arc<AttestationBuilder>,
}

/// Factory for the backend selected by configuration, wired to the real CLIs.
pub struct ConfiguredBackends {
    config: Arc<InterlaceConfig>,
    signing: SigningServices,
    patcher: Arc<dyn ResourcePatcher>,
    oci: Arc<dyn OciTransport>,
}

impl ConfiguredBackends {
    pub fn new(config: Arc<InterlaceConfig>, signing: SigningServices) -> Self {
        let patcher = Arc::new(KubectlPatcher::new(config.tools.kubectl.clone()));
        let oci = Arc::new(OrasCli::new(config.tools.oras.clone()));
        Self {
            config,
            signing,
            patcher,
            oci,
        }
    }
}

impl BackendFactory for ConfiguredBackends {
    fn create(&self, ctx: &ApplicationContext) -> Result<Box<dyn StorageBackend>, InterlaceError> {
        let ctx = ctx.clone();
        let backend: Box<dyn StorageBackend> = match self.config.storage {
            StorageKind::Annotation => Box::new(AnnotationBackend::new(
                ctx,
                self.signing.clone(),
                self.patcher.clone(),
                self.config.verification.signature_resource_annotation.clone(),
                self.config.verification.signature_resource_label.clone(),
            )),
            StorageKind::Git => {
                let settings = self.config.git.as_ref().ok_or(ConfigError::Missing("git.url"))?;
                let target = GitTarget {
                    url: settings.url.clone(),
                    branch: settings.branch.clone(),
                    author_name: settings.user.clone(),
                    author_email: settings.user_email.clone(),
                    credentials: GitCredentials {
                        username: settings.user.clone(),
                        token: SecretString::from(settings.token.expose_secret().to_string()),
                    },
                };
                Box::new(GitBackend::new(
                    ctx,
                    self.signing.clone(),
                    target,
                    self.config.tools.git.clone(),
                    self.config.signed_config_helper.clone(),
                ))
            }
            StorageKind::Oci => {
                let settings = self
                    .config
                    .oci
                    .as_ref()
                    .ok_or(ConfigError::Missing("oci.registry"))?;
                Box::new(OciBackend::new(
                    ctx,
                    self.signing.clone(),
                    self.oci.clone(),
                    settings,
                ))
            }
        };
        Ok(backend)
    }
}

/// Signs the cycle's `manifest.yaml` and writes `manifest.signed`.
pub(crate) fn sign_cycle_manifest(
    ctx: &ApplicationContext,
    keys: &KeySource,
) -> Result<SignedBundle, InterlaceError> {
    let path = ctx.manifest_path();
    if !path.is_file() {
        return Err(PersistenceError::MissingManifest(path).into());
    }
    let content = workspace::read(&path)?;
    let manifest = ManifestDocument::parse(&String::from_utf8_lossy(&content)).map_err(|e| {
        RetrievalError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        }
    })?;

    let keys = keys.load()?;
    let bundle = sign_manifest(&keys, &manifest)?;
    workspace::write_atomic(&ctx.signed_manifest_path(), bundle.document().as_bytes())?;
    tracing::info!(
        app = ctx.app_name(),
        documents = bundle.document().len(),
        "Signed manifest bundle"
    );
    Ok(bundle)
}

/// Provenance whose subject is the manifest file itself.
pub(crate) async fn manifest_file_provenance(
    ctx: &ApplicationContext,
    attestations: &AttestationBuilder,
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
) -> Result<(), InterlaceError> {
    let path = ctx.manifest_path();
    if !path.is_file() {
        return Err(PersistenceError::MissingManifest(path).into());
    }
    let digest = sha256_hex(&workspace::read(&path)?);
    attestations
        .generate_provenance(
            ctx,
            &path.display().to_string(),
            &digest,
            started,
            finished,
            true,
        )
        .await?;
    Ok(())
}
