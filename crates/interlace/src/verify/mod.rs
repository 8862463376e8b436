//! Source-material verification, run before anything is synthesized.

mod helm;
mod kustomize;

use async_trait::async_trait;

use crate::app::ApplicationContext;
use crate::error::InterlaceError;

pub use helm::{ChartSignatureCheck, HelmSigstoreCli, HelmVerifier};
pub use kustomize::{
    compare_hashes, parse_hash_list, DetachedSignatureCheck, GpgvCli, HashEntry, KustomizeVerifier,
};

/// Decides whether the deployed source is authentic.
///
/// `Ok(false)` means the material was inspected and rejected; `Err` means it
/// could not be inspected at all.
#[async_trait]
pub trait SourceVerifier: Send + Sync {
    async fn verify_source_material(&self, ctx: &ApplicationContext) -> Result<bool, InterlaceError>;
}
