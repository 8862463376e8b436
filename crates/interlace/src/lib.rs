pub mod app;
pub mod attestation;
pub mod classifier;
pub mod config;
pub mod error;
pub mod git;
pub mod manifest;
pub mod pipeline;
pub mod process;
pub mod secrets;
pub mod signing;
pub mod storage;
pub mod telemetry;
pub mod verify;
pub mod workspace;

pub use app::{Application, ApplicationContext, SourceInfo};
pub use attestation::{AttestationBuilder, Statement};
pub use classifier::{Classification, EventClassifier};
pub use config::{load_config, InterlaceConfig, StorageKind};
pub use error::{
    ConfigError, GitError, InterlaceError, PersistenceError, Result, RetrievalError, SigningError,
    VerificationError, WorkspaceError,
};
pub use manifest::{DriftOutcome, ManifestDocument, ManifestSynthesizer};
pub use pipeline::{CycleOutcome, Orchestrator};
pub use secrets::{PassphraseSource, SecretError};
pub use storage::{BackendFactory, StorageBackend};
pub use verify::SourceVerifier;
