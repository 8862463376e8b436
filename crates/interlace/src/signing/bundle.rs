//! Signed manifest bundles.
//!
//! The whole manifest is archived into a gzipped tarball, which is the signed
//! message. Every object of the bundle then carries the message and its
//! signature as annotations, so each resource can be checked on its own.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::archive::{pack_manifest, unpack_yamls};
use super::dsse::Signer;
use super::keys::{decode_b64, encode_b64};
use crate::error::SigningError;
use crate::manifest::ManifestDocument;

pub const MESSAGE_ANNOTATION: &str = "cosign.sigstore.dev/message";
pub const SIGNATURE_ANNOTATION: &str = "cosign.sigstore.dev/signature";

type Result<T> = std::result::Result<T, SigningError>;

/// A manifest with its signature, ready to persist.
#[derive(Debug, Clone)]
pub struct SignedBundle {
    message: String,
    signature: String,
    document: ManifestDocument,
}

impl SignedBundle {
    /// Base64 of the gzipped manifest tarball.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Base64 of the DER signature over the tarball.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The manifest with both annotations on every object.
    pub fn document(&self) -> &ManifestDocument {
        &self.document
    }
}

/// Signs `manifest` and annotates each of its objects.
pub fn sign_manifest(signer: &dyn Signer, manifest: &ManifestDocument) -> Result<SignedBundle> {
    let blob = pack_manifest(manifest.as_bytes())?;
    let (raw_signature, _) = signer.sign(&blob)?;

    let message = encode_b64(&blob);
    let signature = encode_b64(&raw_signature);

    let objects = manifest
        .objects()
        .iter()
        .cloned()
        .map(|object| annotate(object, &message, &signature))
        .collect::<Result<Vec<_>>>()?;
    let document = ManifestDocument::from_objects(objects)
        .map_err(|e| SigningError::Encode(format!("failed to render signed manifest: {}", e)))?;

    Ok(SignedBundle {
        message,
        signature,
        document,
    })
}

fn annotate(mut object: Value, message: &str, signature: &str) -> Result<Value> {
    let root = object
        .as_object_mut()
        .ok_or_else(|| SigningError::Encode("manifest object is not a mapping".to_string()))?;
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if metadata.is_null() {
        *metadata = Value::Object(Map::new());
    }
    let annotations = metadata
        .as_object_mut()
        .ok_or_else(|| SigningError::Encode("metadata is not a mapping".to_string()))?
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()));
    if annotations.is_null() {
        *annotations = Value::Object(Map::new());
    }
    let annotations = annotations
        .as_object_mut()
        .ok_or_else(|| SigningError::Encode("annotations are not a mapping".to_string()))?;

    annotations.insert(MESSAGE_ANNOTATION.to_string(), Value::from(message));
    annotations.insert(SIGNATURE_ANNOTATION.to_string(), Value::from(signature));
    Ok(object)
}

/// Recovers the manifest carried by a base64 message.
pub fn decode_message(message: &str) -> Result<String> {
    unpack_yamls(&decode_b64(message)?)
}

/// SHA-256 hex digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
