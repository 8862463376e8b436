//! Desired-state rendering and drift detection.

mod api;
mod document;
mod synthesizer;

pub use api::{ArgoCdClient, DeploymentApi};
pub use document::{
    concat_documents, render_object, split_documents, strip_wrapper, ManifestDocument,
    DOCUMENT_SEPARATOR,
};
pub use synthesizer::{write_manifest, DriftOutcome, ManifestSynthesizer};
