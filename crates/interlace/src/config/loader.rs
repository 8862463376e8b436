use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::config::schema::*;
use crate::error::ConfigError;

pub const ENV_LOG_LEVEL: &str = "ARGOCD_INTERLACE_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "ARGOCD_INTERLACE_LOG_JSON";
pub const ENV_STORAGE: &str = "MANIFEST_STORAGE";
pub const ENV_API_BASE_URL: &str = "ARGOCD_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "ARGOCD_TOKEN";
pub const ENV_NAMESPACE: &str = "ARGOCD_NAMESPACE";
pub const ENV_INSECURE_TLS: &str = "ARGOCD_INSECURE_TLS";
pub const ENV_GIT_URL: &str = "MANIFEST_GITREPO_URL";
pub const ENV_GIT_USER: &str = "MANIFEST_GITREPO_USER";
pub const ENV_GIT_EMAIL: &str = "MANIFEST_GITREPO_USEREMAIL";
pub const ENV_GIT_TOKEN: &str = "MANIFEST_GITREPO_TOKEN";
pub const ENV_GIT_BRANCH: &str = "MANIFEST_GITREPO_BRANCH";
pub const ENV_IMAGE_REGISTRY: &str = "IMAGE_REGISTRY";
pub const ENV_IMAGE_PREFIX: &str = "IMAGE_PREFIX";
pub const ENV_IMAGE_TAG: &str = "IMAGE_TAG";
pub const ENV_REKOR_SERVER: &str = "REKOR_SERVER";
pub const ENV_REKOR_TMP_DIR: &str = "REKORTMPDIR";
pub const ENV_UPLOAD_TLOG: &str = "UPLOAD_TLOG";
pub const ENV_SIGNING_KEY: &str = "SIGNING_KEY_PATH";
pub const ENV_SIGNING_PUB_KEY: &str = "SIGNING_PUB_KEY_PATH";
pub const ENV_KEYRING: &str = "SOURCE_MATERIAL_KEYRING";
pub const ENV_HASH_LIST: &str = "SOURCE_MATERIAL_HASH_LIST";
pub const ENV_HASH_SIGNATURE: &str = "SOURCE_MATERIAL_SIGNATURE";
pub const ENV_SIG_ANNOTATION: &str = "SIGNATURE_RESOURCE_ANNOTATION";
pub const ENV_SIG_LABEL: &str = "SIGNATURE_RESOURCE_LABEL";
pub const ENV_ALWAYS_PROVENANCE: &str = "ALWAYS_GENERATE_PROV";
pub const ENV_WORK_ROOT: &str = "INTERLACE_WORK_DIR";
pub const ENV_SIGNED_CONFIG_HELPER: &str = "SIGNED_CONFIG_HELPER";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<InterlaceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<InterlaceConfig, ConfigError> {
    let config: InterlaceConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

impl InterlaceConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &'static str| -> Result<Option<bool>, ConfigError> {
            get(name).map(|v| parse_flag(name, &v)).transpose()
        };

        let storage: StorageKind = get(ENV_STORAGE)
            .ok_or(ConfigError::Missing(ENV_STORAGE))?
            .parse()?;

        let argocd = ArgocdSettings {
            api_base_url: get(ENV_API_BASE_URL).unwrap_or_default(),
            token: SecretString::from(get(ENV_API_TOKEN).unwrap_or_default()),
            namespace: get(ENV_NAMESPACE).unwrap_or_else(default_namespace),
            insecure_tls: flag(ENV_INSECURE_TLS)?.unwrap_or(false),
        };

        let git = get(ENV_GIT_URL).map(|url| GitStorageSettings {
            url,
            user: get(ENV_GIT_USER).unwrap_or_default(),
            user_email: get(ENV_GIT_EMAIL).unwrap_or_default(),
            token: SecretString::from(get(ENV_GIT_TOKEN).unwrap_or_default()),
            branch: get(ENV_GIT_BRANCH).unwrap_or_else(default_branch),
        });

        let oci = get(ENV_IMAGE_REGISTRY).map(|registry| OciStorageSettings {
            registry,
            image_prefix: get(ENV_IMAGE_PREFIX).unwrap_or_default(),
            image_tag: get(ENV_IMAGE_TAG).unwrap_or_else(default_image_tag),
        });

        let signing_defaults = SigningSettings::default();
        let signing = SigningSettings {
            key_path: get(ENV_SIGNING_KEY)
                .map(PathBuf::from)
                .unwrap_or(signing_defaults.key_path),
            public_key_path: get(ENV_SIGNING_PUB_KEY)
                .map(PathBuf::from)
                .unwrap_or(signing_defaults.public_key_path),
            rekor_server: get(ENV_REKOR_SERVER),
            rekor_tmp_dir: get(ENV_REKOR_TMP_DIR).map(PathBuf::from),
            upload_tlog: flag(ENV_UPLOAD_TLOG)?.unwrap_or(signing_defaults.upload_tlog),
        };

        let verification_defaults = VerificationSettings::default();
        let verification = VerificationSettings {
            keyring_path: get(ENV_KEYRING)
                .map(PathBuf::from)
                .unwrap_or(verification_defaults.keyring_path),
            hash_list_file: get(ENV_HASH_LIST).unwrap_or(verification_defaults.hash_list_file),
            signature_file: get(ENV_HASH_SIGNATURE)
                .unwrap_or(verification_defaults.signature_file),
            signature_resource_annotation: get(ENV_SIG_ANNOTATION)
                .unwrap_or(verification_defaults.signature_resource_annotation),
            signature_resource_label: get(ENV_SIG_LABEL)
                .unwrap_or(verification_defaults.signature_resource_label),
        };

        let config = InterlaceConfig {
            log_level: get(ENV_LOG_LEVEL),
            log_json: flag(ENV_LOG_JSON)?.unwrap_or(false),
            storage,
            argocd,
            git,
            oci,
            signing,
            verification,
            always_generate_provenance: flag(ENV_ALWAYS_PROVENANCE)?.unwrap_or(false),
            work_root: get(ENV_WORK_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(default_work_root),
            signed_config_helper: get(ENV_SIGNED_CONFIG_HELPER).map(PathBuf::from),
            tools: ToolPaths::default(),
        };

        validate_config(&config)?;
        Ok(config)
    }

    /// Whether provenance should be pushed to a transparency log.
    pub fn tlog_enabled(&self) -> bool {
        self.signing.upload_tlog && self.signing.rekor_server.is_some()
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

pub fn validate_config(config: &InterlaceConfig) -> Result<(), ConfigError> {
    if config.argocd.api_base_url.trim().is_empty() {
        return Err(ConfigError::Missing("argocd.apiBaseUrl"));
    }
    if config.argocd.token.expose_secret().is_empty() {
        return Err(ConfigError::Missing("argocd.token"));
    }

    match config.storage {
        StorageKind::Annotation => {}
        StorageKind::Git => {
            let git = config.git.as_ref().ok_or(ConfigError::Missing("git.url"))?;
            if git.user.is_empty() {
                return Err(ConfigError::Missing("git.user"));
            }
            if git.user_email.is_empty() {
                return Err(ConfigError::Missing("git.userEmail"));
            }
            if git.token.expose_secret().is_empty() {
                return Err(ConfigError::Missing("git.token"));
            }
        }
        StorageKind::Oci => {
            let oci = config
                .oci
                .as_ref()
                .ok_or(ConfigError::Missing("oci.registry"))?;
            if oci.image_prefix.is_empty() {
                return Err(ConfigError::Missing("oci.imagePrefix"));
            }
            if oci.image_tag.is_empty() {
                return Err(ConfigError::Missing("oci.imageTag"));
            }
        }
    }

    if config.verification.hash_list_file.is_empty()
        || config.verification.signature_file.is_empty()
    {
        return Err(ConfigError::Validation {
            message: "source material file names must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        (ENV_API_BASE_URL, "https://argocd.example/api/v1/applications"),
        (ENV_API_TOKEN, "token"),
    ];

    fn with_base(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        BASE.iter().chain(extra.iter()).copied().collect()
    }

    #[test]
    fn annotation_storage_uses_defaults() {
        let vars = with_base(&[(ENV_STORAGE, "annotation")]);
        let config = InterlaceConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.storage, StorageKind::Annotation);
        assert_eq!(config.argocd.namespace, "argocd");
        assert_eq!(config.work_root, PathBuf::from(DEFAULT_WORK_ROOT));
        assert_eq!(config.verification.hash_list_file, "source-materials");
        assert!(!config.always_generate_provenance);
        assert!(!config.tlog_enabled());
    }

    #[test]
    fn git_storage_requires_credentials() {
        let vars = with_base(&[
            (ENV_STORAGE, "git"),
            (ENV_GIT_URL, "https://git.example/manifests"),
            (ENV_GIT_USER, "bot"),
        ]);
        let err = InterlaceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("git.userEmail")));
    }

    #[test]
    fn git_storage_without_repo_is_rejected() {
        let vars = with_base(&[(ENV_STORAGE, "GIT")]);
        let err = InterlaceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("git.url")));
    }

    #[test]
    fn unsupported_storage_is_a_configuration_error() {
        let vars = with_base(&[(ENV_STORAGE, "s3")]);
        let err = InterlaceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedStorage(ref s) if s == "s3"));
    }

    #[test]
    fn missing_token_is_rejected() {
        let vars = vec![
            (ENV_STORAGE, "annotation"),
            (ENV_API_BASE_URL, "https://argocd.example"),
        ];
        let err = InterlaceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("argocd.token")));
    }

    #[test]
    fn invalid_flag_is_reported() {
        let vars = with_base(&[(ENV_STORAGE, "annotation"), (ENV_ALWAYS_PROVENANCE, "maybe")]);
        let err = InterlaceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name, .. } if name == ENV_ALWAYS_PROVENANCE));
    }

    #[test]
    fn oci_storage_and_tlog_from_env() {
        let vars = with_base(&[
            (ENV_STORAGE, "oci"),
            (ENV_IMAGE_REGISTRY, "registry.example"),
            (ENV_IMAGE_PREFIX, "interlace"),
            (ENV_REKOR_SERVER, "https://rekor.example"),
        ]);
        let config = InterlaceConfig::from_lookup(lookup(&vars)).unwrap();
        let oci = config.oci.as_ref().unwrap();
        assert_eq!(oci.image_tag, "latest");
        assert!(config.tlog_enabled());
    }

    #[test]
    fn loads_yaml_config() {
        let yaml = r#"
storage: git
alwaysGenerateProvenance: true
argocd:
  apiBaseUrl: https://argocd.example/api/v1/applications
  token: abc
git:
  url: https://git.example/manifests.git
  user: bot
  userEmail: bot@example.com
  token: secret
signing:
  rekorServer: https://rekor.example
verification:
  keyringPath: /keys/pubring.gpg
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.storage, StorageKind::Git);
        assert!(config.always_generate_provenance);
        assert_eq!(config.git.as_ref().unwrap().branch, "main");
        assert_eq!(
            config.signing.key_path,
            PathBuf::from(DEFAULT_SIGNING_KEY_PATH)
        );
        assert_eq!(
            config.verification.keyring_path,
            PathBuf::from("/keys/pubring.gpg")
        );
        assert_eq!(config.verification.signature_file, "source-materials.sig");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/interlace.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
