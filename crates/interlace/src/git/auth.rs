//! Git authentication handling.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::error::GitError;

/// Basic credentials for HTTPS remotes.
#[derive(Debug)]
pub struct GitCredentials {
    pub username: String,
    pub token: SecretString,
}

/// Escapes a value for safe use in single-quoted shell strings.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so the token never outlives the
/// git command on disk.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for an authenticated git invocation.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

/// Builds the askpass environment for `credentials`.
///
/// git calls the script once for the username and once for the password, so
/// the script answers based on the prompt it is given.
pub fn build_auth_env(credentials: Option<&GitCredentials>) -> Result<AuthEnv, GitError> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    let Some(credentials) = credentials else {
        return Ok(AuthEnv {
            env_vars: env,
            _cleanup: AskpassCleanup::empty(),
        });
    };

    let script = format!(
        "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
        shell_escape(&credentials.username),
        shell_escape(credentials.token.expose_secret())
    );

    let askpass_path = std::env::temp_dir().join(format!(
        ".interlace-askpass-{}.sh",
        uuid::Uuid::new_v4()
    ));

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &script)?;
    }

    let cleanup = AskpassCleanup {
        path: Some(askpass_path.clone()),
    };

    let askpass = askpass_path
        .to_str()
        .ok_or_else(|| GitError::Auth("Temp directory path contains non-UTF8 characters".to_string()))?
        .to_string();
    env.push(("GIT_ASKPASS".to_string(), askpass));

    Ok(AuthEnv {
        env_vars: env,
        _cleanup: cleanup,
    })
}
