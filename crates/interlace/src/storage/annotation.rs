use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{manifest_file_provenance, sign_cycle_manifest, SigningServices, StorageBackend};
use crate::app::ApplicationContext;
use crate::config::StorageKind;
use crate::error::{InterlaceError, PersistenceError};
use crate::process;
use crate::signing::{MESSAGE_ANNOTATION, SIGNATURE_ANNOTATION};

/// Applies a JSON merge patch to a live cluster resource.
#[async_trait]
pub trait ResourcePatcher: Send + Sync {
    async fn patch(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<(), PersistenceError>;
}

/// `kubectl patch <kind> <name> -n <namespace> --type merge -p <json>`.
pub struct KubectlPatcher {
    program: String,
}

impl KubectlPatcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ResourcePatcher for KubectlPatcher {
    async fn patch(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> Result<(), PersistenceError> {
        let mut cmd = process::command(&self.program);
        cmd.arg("patch").arg(kind).arg(name);
        if !namespace.is_empty() {
            cmd.arg("-n").arg(namespace);
        }
        cmd.arg("--type").arg("merge").arg("-p").arg(patch.to_string());

        process::run_checked(&mut cmd, &self.program)
            .await
            .map(|_| ())
            .map_err(|message| PersistenceError::Patch {
                kind: kind.to_string(),
                name: name.to_string(),
                message,
            })
    }
}

/// Boolean spellings accepted on marker annotations and labels.
fn parse_marker(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "True" | "TRUE" => Some(true),
        "0" | "f" | "F" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Whether `object` opts in to carrying its signature.
///
/// A present annotation decides on its own; the label is consulted only when
/// the annotation is absent.
pub fn is_marked(object: &Value, annotation_key: &str, label_key: &str) -> bool {
    let metadata = &object["metadata"];
    if let Some(value) = metadata["annotations"].get(annotation_key) {
        return value.as_str().and_then(parse_marker).unwrap_or(false);
    }
    metadata["labels"]
        .get(label_key)
        .and_then(Value::as_str)
        .and_then(parse_marker)
        .unwrap_or(false)
}

/// The two independent merge patches for one resource.
///
/// ConfigMaps carry the pair in `data`; every other kind in annotations.
pub fn merge_patches(kind: &str, message: Option<&str>, signature: Option<&str>) -> [Value; 2] {
    if kind == "ConfigMap" {
        [
            json!({"data": {"signature": signature}}),
            json!({"data": {"message": message}}),
        ]
    } else {
        [
            json!({"metadata": {"annotations": {SIGNATURE_ANNOTATION: signature}}}),
            json!({"metadata": {"annotations": {MESSAGE_ANNOTATION: message}}}),
        ]
    }
}

/// Attaches the signature directly to the live resources that ask for it.
pub struct AnnotationBackend {
    ctx: ApplicationContext,
    signing: SigningServices,
    patcher: Arc<dyn ResourcePatcher>,
    annotation_key: String,
    label_key: String,
}

impl AnnotationBackend {
    pub fn new(
        ctx: ApplicationContext,
        signing: SigningServices,
        patcher: Arc<dyn ResourcePatcher>,
        annotation_key: String,
        label_key: String,
    ) -> Self {
        Self {
            ctx,
            signing,
            patcher,
            annotation_key,
            label_key,
        }
    }
}

#[async_trait]
impl StorageBackend for AnnotationBackend {
    async fn get_latest_manifest_content(&self) -> Result<Option<Vec<u8>>, InterlaceError> {
        Ok(None)
    }

    async fn store_manifest_bundle(&self, source_verified: bool) -> Result<(), InterlaceError> {
        let bundle = sign_cycle_manifest(&self.ctx, &self.signing.keys)?;
        let (message, signature) = if source_verified {
            (Some(bundle.message()), Some(bundle.signature()))
        } else {
            (None, None)
        };

        let mut total = 0;
        let mut failed = 0;
        for object in bundle.document().objects() {
            let kind = object["kind"].as_str().unwrap_or_default();
            let name = object["metadata"]["name"].as_str().unwrap_or_default();
            let namespace = object["metadata"]["namespace"].as_str().unwrap_or_default();

            if !is_marked(object, &self.annotation_key, &self.label_key) {
                tracing::debug!("{}/{} is not a signature resource", kind, name);
                continue;
            }

            for patch in merge_patches(kind, message, signature) {
                total += 1;
                match self.patcher.patch(kind, name, namespace, &patch).await {
                    Ok(()) => tracing::info!(
                        app = self.ctx.app_name(),
                        "Attached signature to {}/{} in {}",
                        kind,
                        name,
                        namespace
                    ),
                    Err(e) => {
                        failed += 1;
                        tracing::error!(app = self.ctx.app_name(), "{}", e);
                    }
                }
            }
        }

        if failed > 0 {
            return Err(PersistenceError::PartialPatch { failed, total }.into());
        }
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
        StorageKind::Annotation
    }
}
