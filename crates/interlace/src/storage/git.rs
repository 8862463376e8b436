use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{manifest_file_provenance, sign_cycle_manifest, SigningServices, StorageBackend};
use crate::app::ApplicationContext;
use crate::config::StorageKind;
use crate::error::{InterlaceError, PersistenceError, RetrievalError, WorkspaceError};
use crate::git::{GitCredentials, GitRepository};
use crate::manifest::render_object;
use crate::process;
use crate::signing::{decode_message, SignedBundle};
use crate::workspace::{self, CONFIG_FILE_NAME};

pub const COMMIT_MESSAGE: &str = "Update signed manifest bundle";

/// Checkout of the storage repository inside the cycle's working directory.
const STORAGE_CHECKOUT_DIR: &str = "storage";

/// The repository signed manifests are committed to.
#[derive(Debug)]
pub struct GitTarget {
    pub url: String,
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub credentials: GitCredentials,
}

/// ConfigMap `<app>-manifest-sig` carrying the signed message.
pub fn signed_config_map(app_name: &str, bundle: &SignedBundle) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": format!("{}-manifest-sig", app_name),
        },
        "data": {
            "message": bundle.message(),
            "signature": bundle.signature(),
        },
    })
}

/// Commits a signed ConfigMap per application to a git repository.
pub struct GitBackend {
    ctx: ApplicationContext,
    signing: SigningServices,
    target: GitTarget,
    git_program: String,
    helper: Option<PathBuf>,
}

impl GitBackend {
    pub fn new(
        ctx: ApplicationContext,
        signing: SigningServices,
        target: GitTarget,
        git_program: String,
        helper: Option<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            signing,
            target,
            git_program,
            helper,
        }
    }

    /// `<app>/<path>/configmap.yaml`, relative to the repository root.
    fn relative_config_path(&self) -> PathBuf {
        workspace::work_dir_for(Path::new(""), self.ctx.app_name(), self.ctx.app_path())
            .join(CONFIG_FILE_NAME)
    }

    async fn clone_storage(&self) -> Result<GitRepository, crate::error::GitError> {
        GitRepository::shallow_clone(
            &self.git_program,
            &self.target.url,
            &self.ctx.work_dir().join(STORAGE_CHECKOUT_DIR),
            Some(&self.target.branch),
            Some(&self.target.credentials),
        )
        .await
    }

    /// Writes `configmap.yaml` into the working directory.
    async fn write_config_map(&self, bundle: &SignedBundle) -> Result<PathBuf, InterlaceError> {
        let config_path = self.ctx.work_dir().join(CONFIG_FILE_NAME);
        let name = format!("{}-manifest-sig", self.ctx.app_name());

        match &self.helper {
            Some(helper) => {
                let program = helper.display().to_string();
                let mut cmd = process::command(&program);
                cmd.arg(self.ctx.signed_manifest_path())
                    .arg(&name)
                    .arg(&config_path)
                    .current_dir(self.ctx.work_dir());
                let output = process::run_checked(&mut cmd, &program)
                    .await
                    .map_err(PersistenceError::Helper)?;
                tracing::debug!("Signed config helper: {}", String::from_utf8_lossy(&output.stdout).trim());
                if !config_path.is_file() {
                    return Err(PersistenceError::Helper(format!(
                        "{} did not produce {}",
                        program,
                        config_path.display()
                    ))
                    .into());
                }
            }
            None => {
                let rendered = render_object(&signed_config_map(self.ctx.app_name(), bundle))
                    .map_err(|e| WorkspaceError::Serialize {
                        name: CONFIG_FILE_NAME.to_string(),
                        message: e.to_string(),
                    })?;
                workspace::write_atomic(&config_path, rendered.as_bytes())?;
            }
        }
        Ok(config_path)
    }
}

#[async_trait]
impl StorageBackend for GitBackend {
    async fn get_latest_manifest_content(&self) -> Result<Option<Vec<u8>>, InterlaceError> {
        let repo = self.clone_storage().await.map_err(RetrievalError::Git)?;
        let path = repo.repo_path().join(self.relative_config_path());
        if !path.is_file() {
            tracing::info!(app = self.ctx.app_name(), "No stored manifest in {}", self.target.url);
            return Ok(None);
        }

        let corrupt = |message: String| RetrievalError::Corrupt {
            path: path.clone(),
            message,
        };
        let content = workspace::read(&path)?;
        let config_map: Value =
            serde_yaml::from_slice(&content).map_err(|e| corrupt(e.to_string()))?;
        let message = config_map["data"]["message"]
            .as_str()
            .ok_or_else(|| corrupt("no data.message".to_string()))?;
        let manifest = decode_message(message).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(manifest.into_bytes()))
    }

    async fn store_manifest_bundle(&self, _source_verified: bool) -> Result<(), InterlaceError> {
        let bundle = sign_cycle_manifest(&self.ctx, &self.signing.keys)?;
        let config_path = self.write_config_map(&bundle).await?;

        let repo = self.clone_storage().await.map_err(PersistenceError::Git)?;
        let relative = self.relative_config_path();
        let target = repo.repo_path().join(&relative);
        match std::fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(WorkspaceError::WriteFile {
                    path: target,
                    source: e,
                }
                .into())
            }
        }
        workspace::write_atomic(&target, &workspace::read(&config_path)?)?;

        repo.add(&relative).map_err(PersistenceError::Git)?;
        let commit = repo
            .commit(COMMIT_MESSAGE, &self.target.author_name, &self.target.author_email)
            .map_err(PersistenceError::Git)?;
        let Some(hash) = commit else {
            tracing::info!(app = self.ctx.app_name(), "Stored manifest already up to date");
            return Ok(());
        };

        repo.push(&self.target.branch, Some(&self.target.credentials))
            .await
            .map_err(PersistenceError::Git)?;
        tracing::info!(
            app = self.ctx.app_name(),
            commit = %hash,
            "Pushed signed manifest to {}",
            self.target.url
        );
        Ok(())
    }

    async fn store_manifest_provenance(
        &self,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Result<(), InterlaceError> {
        manifest_file_provenance(&self.ctx, &self.signing.attestations, started, finished).await
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Git
    }
}
