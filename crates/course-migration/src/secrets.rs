//! Resolution of the remote web-service token.
//!
//! The token may be given in three ways, checked in this order:
//!
//! 1. **Inline** in the config file (`token`), handy for local testing.
//! 2. **File** (`token_file`), e.g. a mounted Docker secret.
//! 3. **Environment variable** (`token_env`).
//!
//! Empty values count as absent, so a later source is consulted.

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: inline value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a secret may come from. Fields left `None` or empty are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecretSource<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    pub fn new(inline: Option<&'a str>, file: Option<&'a str>, env: Option<&'a str>) -> Self {
        Self { inline, file, env }
    }

    /// True when at least one source is non-empty.
    pub fn is_configured(&self) -> bool {
        [self.inline, self.file, self.env]
            .iter()
            .any(|s| s.is_some_and(|v| !v.is_empty()))
    }

    /// Resolves the secret, failing if no source is configured.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = non_empty(self.inline) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = non_empty(self.file) {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileRead {
                path: expanded.clone(),
                source: e,
            })?;
            return trimmed(content.trim(), || format!("file '{}'", expanded));
        }

        if let Some(name) = non_empty(self.env) {
            return match std::env::var(name) {
                Ok(value) => trimmed(value.trim(), || format!("env var '{}'", name)),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }

    /// Like [`resolve`](Self::resolve) but an unconfigured source yields `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Shorthand for `SecretSource::new(inline, file, env).resolve()`.
pub fn resolve_secret(
    inline: Option<&str>,
    file: Option<&str>,
    env: Option<&str>,
) -> Result<SecretString> {
    SecretSource::new(inline, file, env).resolve()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn trimmed(value: &str, origin: impl FnOnce() -> String) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty { origin: origin() });
    }
    Ok(SecretString::from(value.to_string()))
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
