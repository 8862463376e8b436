//! Resolution of the signing-key passphrase.
//!
//! Sources, in priority order:
//!
//! 1. **Environment** - `COSIGN_PASSWORD` (or the configured variable), even when empty
//! 2. **Terminal** - interactive prompt when stdin is a TTY
//! 3. **Piped stdin** - everything read from stdin, trailing newline removed

use std::io::{IsTerminal, Read};

use secrecy::{ExposeSecret, SecretString};

pub const PASSPHRASE_ENV_VAR: &str = "COSIGN_PASSWORD";

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Failed to read passphrase from terminal: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("Failed to read passphrase from stdin: {0}")]
    Stdin(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where the signing-key passphrase comes from.
#[derive(Debug)]
pub enum PassphraseSource {
    /// Environment variable, then terminal prompt, then piped stdin.
    Interactive { env_var: String },
    /// A passphrase supplied by the embedding application.
    Provided(SecretString),
}

impl Default for PassphraseSource {
    fn default() -> Self {
        PassphraseSource::Interactive {
            env_var: PASSPHRASE_ENV_VAR.to_string(),
        }
    }
}

impl PassphraseSource {
    pub fn resolve(&self) -> Result<SecretString> {
        match self {
            PassphraseSource::Provided(secret) => {
                Ok(SecretString::from(secret.expose_secret().to_string()))
            }
            PassphraseSource::Interactive { env_var } => resolve_interactive(env_var),
        }
    }

    /// Resolves once and keeps the result, so later reads never touch the
    /// terminal or stdin again.
    pub fn into_provided(self) -> Result<Self> {
        match self {
            PassphraseSource::Provided(_) => Ok(self),
            interactive => Ok(PassphraseSource::Provided(interactive.resolve()?)),
        }
    }
}

fn resolve_interactive(env_var: &str) -> Result<SecretString> {
    match std::env::var(env_var) {
        Ok(value) => return Ok(SecretString::from(value)),
        Err(std::env::VarError::NotUnicode(_)) => {
            return Err(SecretError::EnvVarNotUnicode {
                name: env_var.to_string(),
            })
        }
        Err(std::env::VarError::NotPresent) => {}
    }

    if std::io::stdin().is_terminal() {
        let password = rpassword::prompt_password("Enter password for private key: ")
            .map_err(SecretError::Prompt)?;
        return Ok(SecretString::from(password));
    }

    let mut piped = String::new();
    std::io::stdin()
        .read_to_string(&mut piped)
        .map_err(SecretError::Stdin)?;
    Ok(SecretString::from(strip_line_ending(&piped)))
}

fn strip_line_ending(value: &str) -> &str {
    value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .unwrap_or(value)
}
