use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";
pub const DEFAULT_WORK_ROOT: &str = "/tmp/output";
pub const DEFAULT_SIGNING_KEY_PATH: &str = "/etc/signing-secrets/cosign.key";
pub const DEFAULT_SIGNING_PUB_KEY_PATH: &str = "/etc/signing-secrets/cosign.pub";
pub const DEFAULT_KEYRING_PATH: &str = "/etc/keyring-secret/pubring.gpg";
pub const DEFAULT_HASH_LIST_FILE: &str = "source-materials";
pub const DEFAULT_SIGNATURE_FILE: &str = "source-materials.sig";
pub const DEFAULT_SIGNATURE_RESOURCE_MARKER: &str = "interlace.io/signature-resource";
pub const DEFAULT_GIT_BRANCH: &str = "main";
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Where signed manifests and provenance are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Annotation,
    Git,
    Oci,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annotation" => Ok(StorageKind::Annotation),
            "git" => Ok(StorageKind::Git),
            "oci" => Ok(StorageKind::Oci),
            other => Err(ConfigError::UnsupportedStorage(other.to_string())),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageKind::Annotation => "annotation",
            StorageKind::Git => "git",
            StorageKind::Oci => "oci",
        };
        f.write_str(name)
    }
}

/// Process-wide configuration. Built once at startup and shared read-only.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterlaceConfig {
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub log_json: bool,

    pub storage: StorageKind,

    pub argocd: ArgocdSettings,

    #[serde(default)]
    pub git: Option<GitStorageSettings>,

    #[serde(default)]
    pub oci: Option<OciStorageSettings>,

    #[serde(default)]
    pub signing: SigningSettings,

    #[serde(default)]
    pub verification: VerificationSettings,

    /// Generate provenance even when the manifest did not change.
    #[serde(default)]
    pub always_generate_provenance: bool,

    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// External script that renders the signed ConfigMap for the git backend.
    #[serde(default)]
    pub signed_config_helper: Option<PathBuf>,

    #[serde(default)]
    pub tools: ToolPaths,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgocdSettings {
    pub api_base_url: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub token: SecretString,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub insecure_tls: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStorageSettings {
    pub url: String,
    pub user: String,
    pub user_email: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub token: SecretString,

    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciStorageSettings {
    pub registry: String,
    pub image_prefix: String,

    #[serde(default = "default_image_tag")]
    pub image_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigningSettings {
    pub key_path: PathBuf,
    pub public_key_path: PathBuf,
    pub rekor_server: Option<String>,
    pub rekor_tmp_dir: Option<PathBuf>,
    pub upload_tlog: bool,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from(DEFAULT_SIGNING_KEY_PATH),
            public_key_path: PathBuf::from(DEFAULT_SIGNING_PUB_KEY_PATH),
            rekor_server: None,
            rekor_tmp_dir: None,
            upload_tlog: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationSettings {
    pub keyring_path: PathBuf,
    pub hash_list_file: String,
    pub signature_file: String,
    pub signature_resource_annotation: String,
    pub signature_resource_label: String,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            keyring_path: PathBuf::from(DEFAULT_KEYRING_PATH),
            hash_list_file: DEFAULT_HASH_LIST_FILE.to_string(),
            signature_file: DEFAULT_SIGNATURE_FILE.to_string(),
            signature_resource_annotation: DEFAULT_SIGNATURE_RESOURCE_MARKER.to_string(),
            signature_resource_label: DEFAULT_SIGNATURE_RESOURCE_MARKER.to_string(),
        }
    }
}

/// Executables for the external collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPaths {
    pub git: String,
    pub helm: String,
    pub gpgv: String,
    pub rekor_cli: String,
    pub kubectl: String,
    pub oras: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            helm: "helm".to_string(),
            gpgv: "gpgv".to_string(),
            rekor_cli: "rekor-cli".to_string(),
            kubectl: "kubectl".to_string(),
            oras: "oras".to_string(),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

pub(crate) fn default_namespace() -> String {
    DEFAULT_ARGOCD_NAMESPACE.to_string()
}

pub(crate) fn default_branch() -> String {
    DEFAULT_GIT_BRANCH.to_string()
}

pub(crate) fn default_image_tag() -> String {
    DEFAULT_IMAGE_TAG.to_string()
}

pub(crate) fn default_work_root() -> PathBuf {
    PathBuf::from(DEFAULT_WORK_ROOT)
}
