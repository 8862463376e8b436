use std::sync::Arc;

use serde_json::Value;

use super::api::DeploymentApi;
use super::document::{split_documents, strip_wrapper, ManifestDocument};
use crate::app::ApplicationContext;
use crate::error::{InterlaceError, RetrievalError, WorkspaceError};
use crate::workspace;

/// Outcome of comparing desired state against the stored bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftOutcome {
    /// At least one desired object differs; the new manifest has been written.
    Changed(ManifestDocument),
    /// Every desired object matches a stored document; nothing was written.
    Unchanged(ManifestDocument),
}

impl DriftOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, DriftOutcome::Changed(_))
    }

    pub fn manifest(&self) -> &ManifestDocument {
        match self {
            DriftOutcome::Changed(doc) | DriftOutcome::Unchanged(doc) => doc,
        }
    }
}

/// Turns the platform's desired state into the canonical manifest file.
pub struct ManifestSynthesizer {
    api: Arc<dyn DeploymentApi>,
}

impl ManifestSynthesizer {
    pub fn new(api: Arc<dyn DeploymentApi>) -> Self {
        Self { api }
    }

    /// Renders the desired state and writes it, unless there is nothing to write.
    ///
    /// Returns the manifest when one was generated.
    pub async fn generate_initial(
        &self,
        ctx: &ApplicationContext,
    ) -> Result<Option<ManifestDocument>, InterlaceError> {
        let manifest = self.desired_manifest(ctx).await?;
        if manifest.is_empty() {
            tracing::info!(app = ctx.app_name(), "No managed resources; nothing to generate");
            return Ok(None);
        }

        write_manifest(ctx, &manifest)?;
        tracing::info!(
            app = ctx.app_name(),
            documents = manifest.len(),
            "Generated initial manifest"
        );
        Ok(Some(manifest))
    }

    /// Compares desired state with `prior_bundle` and rewrites the manifest on drift.
    pub async fn generate_with_drift(
        &self,
        ctx: &ApplicationContext,
        prior_bundle: &[u8],
    ) -> Result<DriftOutcome, InterlaceError> {
        let manifest = self.desired_manifest(ctx).await?;
        let prior = parse_prior(prior_bundle);

        let drifted: Vec<&Value> = manifest
            .objects()
            .iter()
            .filter(|object| !prior.contains(*object))
            .collect();

        if drifted.is_empty() {
            tracing::info!(app = ctx.app_name(), "No drift against stored manifest");
            return Ok(DriftOutcome::Unchanged(manifest));
        }

        for object in &drifted {
            let kind = object.pointer("/kind").and_then(Value::as_str).unwrap_or("");
            let name = object
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or("");
            tracing::debug!(
                app = ctx.app_name(),
                kind,
                name,
                "Desired object differs from stored manifest"
            );
        }

        write_manifest(ctx, &manifest)?;
        tracing::info!(
            app = ctx.app_name(),
            changed = drifted.len(),
            documents = manifest.len(),
            "Manifest changed"
        );
        Ok(DriftOutcome::Changed(manifest))
    }

    async fn desired_manifest(
        &self,
        ctx: &ApplicationContext,
    ) -> Result<ManifestDocument, InterlaceError> {
        let response = self.api.managed_resources(ctx.app_name()).await?;
        let objects = target_states(&response).map_err(|message| RetrievalError::Response {
            url: format!("managed-resources/{}", ctx.app_name()),
            message,
        })?;

        ManifestDocument::from_objects(objects).map_err(|e| {
            WorkspaceError::Serialize {
                name: workspace::MANIFEST_FILE_NAME.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Writes the manifest file for this cycle as a whole.
pub fn write_manifest(
    ctx: &ApplicationContext,
    manifest: &ManifestDocument,
) -> Result<(), WorkspaceError> {
    workspace::write_atomic(&ctx.manifest_path(), manifest.as_bytes())
}

/// Extracts each item's target state in response order.
///
/// `targetState` is usually a JSON-encoded string; embedded objects are accepted
/// too. Items without a target state (resources pending deletion) are skipped.
fn target_states(response: &Value) -> Result<Vec<Value>, String> {
    let items = match response.get("items") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => return Err("'items' is not an array".to_string()),
    };

    let mut objects = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let state = match item.get("targetState") {
            Some(Value::String(raw)) if raw.trim().is_empty() => continue,
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .map_err(|e| format!("item {}: invalid targetState: {}", idx, e))?,
            Some(Value::Null) | None => continue,
            Some(other) => other.clone(),
        };
        if state.is_null() {
            continue;
        }
        objects.push(strip_wrapper(state));
    }
    Ok(objects)
}

/// Parses the stored bundle into comparable objects. Unparseable documents
/// simply never match.
fn parse_prior(bundle: &[u8]) -> Vec<Value> {
    let content = String::from_utf8_lossy(bundle);
    split_documents(&content)
        .iter()
        .filter_map(|doc| match serde_yaml::from_str::<Value>(doc) {
            Ok(value) => Some(strip_wrapper(value)),
            Err(e) => {
                tracing::warn!("Skipping unparseable stored document: {}", e);
                None
            }
        })
        .collect()
}
