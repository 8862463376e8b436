use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::materials::{assemble, helm_primary, kustomize_primary};
use super::statement::{Material, Statement, Subject};
use super::tlog::TransparencyLog;
use super::trace::trace_materials;
use crate::app::ApplicationContext;
use crate::error::{InterlaceError, SigningError, WorkspaceError};
use crate::signing::{
    load_verifying_key, sha256_hex, sign_envelope, verify_envelope, Envelope, KeySource,
    IN_TOTO_PAYLOAD_TYPE,
};
use crate::workspace::{self, ATTESTATION_FILE_NAME, PROVENANCE_FILE_NAME};

/// Produces signed SLSA provenance for a cycle's output.
pub struct AttestationBuilder {
    keys: Arc<KeySource>,
    public_key_path: PathBuf,
    argocd_namespace: String,
    tlog: Option<Arc<dyn TransparencyLog>>,
}

impl AttestationBuilder {
    pub fn new(
        keys: Arc<KeySource>,
        public_key_path: impl Into<PathBuf>,
        argocd_namespace: impl Into<String>,
        tlog: Option<Arc<dyn TransparencyLog>>,
    ) -> Self {
        Self {
            keys,
            public_key_path: public_key_path.into(),
            argocd_namespace: argocd_namespace.into(),
            tlog,
        }
    }

    /// Builds, signs, and records provenance for `target`.
    ///
    /// `provenance.json` is written before signing; `attestation.json` only
    /// once the envelope verifies against the configured public key. A failed
    /// transparency log upload is logged and does not fail the call.
    pub async fn generate_provenance(
        &self,
        ctx: &ApplicationContext,
        target: &str,
        target_digest: &str,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
        upload: bool,
    ) -> Result<Envelope, InterlaceError> {
        let statement = Statement::provenance(
            Subject::sha256(target, target_digest),
            self.materials(ctx),
            &self.argocd_namespace,
            started,
            finished,
        );

        let payload = serde_json::to_vec(&statement).map_err(|e| WorkspaceError::Serialize {
            name: PROVENANCE_FILE_NAME.to_string(),
            message: e.to_string(),
        })?;
        workspace::write_atomic(&ctx.work_dir().join(PROVENANCE_FILE_NAME), &payload)?;

        let keys = self.keys.load()?;
        let envelope = sign_envelope(&keys, IN_TOTO_PAYLOAD_TYPE, &payload)?;
        let public_key = load_verifying_key(&self.public_key_path)?;
        verify_envelope(&envelope, &public_key)?;

        let encoded = serde_json::to_vec(&envelope)
            .map_err(|e| SigningError::Encode(format!("failed to encode envelope: {}", e)))?;
        let attestation_path = ctx.work_dir().join(ATTESTATION_FILE_NAME);
        workspace::write_atomic(&attestation_path, &encoded)?;
        tracing::info!(app = ctx.app_name(), subject = target, "Wrote signed attestation");

        if upload {
            match &self.tlog {
                Some(tlog) => match tlog.upload(&attestation_path, &self.public_key_path).await {
                    Ok(uuid) => {
                        tracing::info!(app = ctx.app_name(), uuid = %uuid, "Uploaded attestation to transparency log")
                    }
                    Err(e) => {
                        tracing::error!(app = ctx.app_name(), "Transparency log upload failed: {}", e)
                    }
                },
                None => tracing::debug!("No transparency log configured; skipping upload"),
            }
        }

        Ok(envelope)
    }

    fn materials(&self, ctx: &ApplicationContext) -> Vec<Material> {
        let primary = if ctx.is_helm() {
            helm_primary(ctx, &chart_digest(ctx))
        } else {
            kustomize_primary(ctx)
        };

        let checkout = ctx.source_checkout_dir();
        let app_dir = checkout.join(ctx.app_path());
        let traced = if app_dir.is_dir() {
            trace_materials(&checkout, &app_dir)
        } else {
            Vec::new()
        };

        assemble(primary, traced)
    }
}

/// SHA-256 of the downloaded chart archive, empty when it is not present.
fn chart_digest(ctx: &ApplicationContext) -> String {
    let Some(name) = ctx.chart_archive_name() else {
        return String::new();
    };
    let path = ctx.work_dir().join(name);
    match std::fs::read(&path) {
        Ok(bytes) => sha256_hex(&bytes),
        Err(e) => {
            tracing::warn!("Chart archive {} unavailable for digest: {}", path.display(), e);
            String::new()
        }
    }
}
