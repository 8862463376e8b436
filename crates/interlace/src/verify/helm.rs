use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::SourceVerifier;
use crate::app::ApplicationContext;
use crate::error::{InterlaceError, VerificationError};
use crate::process;
use crate::workspace;

/// Checks a downloaded chart against its provenance file.
#[async_trait]
pub trait ChartSignatureCheck: Send + Sync {
    /// `archive` has its `.prov` next to it.
    async fn verify_chart(&self, archive: &Path) -> Result<bool, VerificationError>;
}

/// `helm sigstore verify <archive>`.
pub struct HelmSigstoreCli {
    program: String,
}

impl HelmSigstoreCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ChartSignatureCheck for HelmSigstoreCli {
    async fn verify_chart(&self, archive: &Path) -> Result<bool, VerificationError> {
        let mut cmd = process::command(&self.program);
        cmd.arg("sigstore").arg("verify").arg(archive);
        if let Some(dir) = archive.parent() {
            cmd.current_dir(dir);
        }

        let output = process::run(&mut cmd, &self.program)
            .await
            .map_err(VerificationError::Tool)?;
        if output.status.success() {
            Ok(true)
        } else {
            tracing::warn!(
                "helm sigstore verify rejected {}: {}",
                archive.display(),
                process::format_output_error(&output)
            );
            Ok(false)
        }
    }
}

/// Downloads a chart and its provenance file into the working directory and
/// checks the signature.
pub struct HelmVerifier {
    http: reqwest::Client,
    check: Arc<dyn ChartSignatureCheck>,
}

impl HelmVerifier {
    pub fn new(http: reqwest::Client, check: Arc<dyn ChartSignatureCheck>) -> Self {
        Self { http, check }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), VerificationError> {
        let download_err = |e: reqwest::Error| VerificationError::Download {
            url: url.to_string(),
            message: e.to_string(),
        };

        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?
            .bytes()
            .await
            .map_err(download_err)?;

        workspace::write_atomic(dest, &bytes).map_err(|e| VerificationError::Download {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!("Downloaded {} ({} bytes)", url, bytes.len());
        Ok(())
    }
}

#[async_trait]
impl SourceVerifier for HelmVerifier {
    async fn verify_source_material(&self, ctx: &ApplicationContext) -> Result<bool, InterlaceError> {
        let archive_name = ctx.chart_archive_name().ok_or_else(|| VerificationError::InvalidSourceUrl {
            url: ctx.source_repo_url().to_string(),
            message: "application has no chart".to_string(),
        })?;

        let repo = ctx.source_repo_url().trim_end_matches('/');
        let archive_url = format!("{}/{}", repo, archive_name);
        let prov_url = format!("{}.prov", archive_url);
        let archive = ctx.work_dir().join(&archive_name);
        let prov = ctx.work_dir().join(format!("{}.prov", archive_name));

        self.download(&archive_url, &archive).await?;
        self.download(&prov_url, &prov).await?;

        let verified = self.check.verify_chart(&archive).await?;
        if verified {
            tracing::info!(app = ctx.app_name(), chart = %archive_name, "Helm chart signature verified");
        }
        Ok(verified)
    }
}
