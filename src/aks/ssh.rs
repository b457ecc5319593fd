//! SSH public key resolution for the cluster's Linux profile.

use std::path::{Path, PathBuf};

use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey, PublicKey};

use crate::error::AzCliError;

/// Default `--ssh-key-value`.
pub const DEFAULT_SSH_KEY_PATH: &str = "~/.ssh/id_rsa.pub";

pub fn is_valid_public_key(text: &str) -> bool {
    PublicKey::from_openssh(text.trim()).is_ok()
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn invalid_key(value: &str) -> AzCliError {
    let shown: String = value.chars().take(20).collect();
    AzCliError::InvalidArgumentValue(format!(
        "Provided ssh key ({}) is invalid or non-existent",
        shown
    ))
}

/// Resolve `--ssh-key-value` to key text.
///
/// Accepts the key itself or a path to a `.pub` file. A missing file is
/// generated as an Ed25519 pair when `generate` is set.
pub fn resolve_public_key(value: &str, generate: bool) -> crate::Result<String> {
    if is_valid_public_key(value) {
        return Ok(value.trim().to_string());
    }

    let path = expand_home(value);
    if path.exists() {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AzCliError::FileOperation(format!("{}: {}", path.display(), e)))?;
        if is_valid_public_key(&text) {
            return Ok(text.trim().to_string());
        }
        return Err(invalid_key(value));
    }

    if generate {
        return generate_key_pair(&path);
    }
    Err(invalid_key(value))
}

/// Write an Ed25519 key pair next to `public_path` and return the public key.
pub fn generate_key_pair(public_path: &Path) -> crate::Result<String> {
    let private_path = public_path.with_extension("");
    if private_path.exists() {
        return Err(AzCliError::FileOperation(format!(
            "Private key file {} already exists but the public key {} does not",
            private_path.display(),
            public_path.display()
        )));
    }
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| AzCliError::Internal(format!("failed to generate ssh key: {}", e)))?;
    let private_text = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| AzCliError::Internal(format!("failed to encode private key: {}", e)))?;
    let public_text = key
        .public_key()
        .to_openssh()
        .map_err(|e| AzCliError::Internal(format!("failed to encode public key: {}", e)))?;

    if let Some(dir) = public_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| AzCliError::FileOperation(format!("{}: {}", dir.display(), e)))?;
    }
    std::fs::write(&private_path, private_text.as_bytes())
        .map_err(|e| AzCliError::FileOperation(format!("{}: {}", private_path.display(), e)))?;
    std::fs::write(public_path, format!("{}\n", public_text))
        .map_err(|e| AzCliError::FileOperation(format!("{}: {}", public_path.display(), e)))?;

    tracing::warn!(
        private = %private_path.display(),
        public = %public_path.display(),
        "SSH key files have been generated"
    );
    Ok(public_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHrqOZa7gBzR1BqdO6AAB6jNEPbzSWA1ddHZYjMf7Ud8 test@host";

    #[test]
    fn test_inline_key_is_accepted() {
        assert_eq!(resolve_public_key(KEY, false).unwrap(), KEY);
    }

    #[test]
    fn test_key_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.pub");
        std::fs::write(&path, format!("{}\n", KEY)).unwrap();
        assert_eq!(resolve_public_key(path.to_str().unwrap(), false).unwrap(), KEY);
    }

    #[test]
    fn test_missing_key_without_generate() {
        let result = resolve_public_key("/nonexistent/dir/id_rsa.pub", false);
        assert!(matches!(
            result,
            Err(AzCliError::InvalidArgumentValue(msg)) if msg.starts_with("Provided ssh key (")
        ));
    }

    #[test]
    fn test_generate_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ssh").join("id_rsa.pub");
        let public = resolve_public_key(path.to_str().unwrap(), true).unwrap();
        assert!(public.starts_with("ssh-ed25519 "));
        assert!(path.exists());
        assert!(dir.path().join(".ssh").join("id_rsa").exists());
    }
}
