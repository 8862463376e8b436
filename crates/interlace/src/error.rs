use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterlaceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Unsupported storage type '{0}'")]
    UnsupportedStorage(String),

    #[error("Invalid value '{value}' for '{name}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Failures while fetching desired state or previously stored manifests.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Request to '{url}' failed: {message}")]
    Http { url: String, message: String },

    #[error("Unexpected response from '{url}': {message}")]
    Response { url: String, message: String },

    #[error("Git retrieval failed: {0}")]
    Git(#[from] GitError),

    #[error("Stored manifest at '{path}' is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Artifact pull failed for '{reference}': {message}")]
    Pull { reference: String, message: String },
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Source material for '{app}' could not be verified")]
    Unverified { app: String },

    #[error("Failed to download '{url}': {message}")]
    Download { url: String, message: String },

    #[error("Invalid source URL '{url}': {message}")]
    InvalidSourceUrl { url: String, message: String },

    #[error("Source checkout failed: {0}")]
    Checkout(#[from] GitError),

    #[error("Signature check could not run: {0}")]
    Tool(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Failed to read key '{path}': {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Key decryption failed: {0}")]
    Decrypt(String),

    #[error("Passphrase unavailable: {0}")]
    Passphrase(String),

    #[error("Signing failed: {0}")]
    Sign(String),

    #[error("Signature verification failed: {0}")]
    Verify(String),

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Git persistence failed: {0}")]
    Git(#[from] GitError),

    #[error("Patch of {kind}/{name} failed: {message}")]
    Patch {
        kind: String,
        name: String,
        message: String,
    },

    #[error("{failed} of {total} resource patches failed")]
    PartialPatch { failed: usize, total: usize },

    #[error("Artifact push failed for '{reference}': {message}")]
    Push { reference: String, message: String },

    #[error("Transparency log upload failed: {0}")]
    Upload(String),

    #[error("Signed config generation failed: {0}")]
    Helper(String),

    #[error("Manifest '{0}' is missing from the working directory")]
    MissingManifest(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory '{0}' is held by another cycle")]
    Locked(PathBuf),

    #[error("Failed to serialize '{name}': {message}")]
    Serialize { name: String, message: String },
}

/// Errors from the git CLI.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git operation failed: {0}")]
    Operation(String),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    Auth(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid username or password")
    {
        return GitError::Auth(stderr.trim().to_string());
    }

    GitError::Operation(stderr.trim().to_string())
}

pub type Result<T> = std::result::Result<T, InterlaceError>;
