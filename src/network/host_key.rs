use crate::error_handling::types::NetworkError;
use log::info;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::{Algorithm, HashAlg, LineEnding};
use russh::keys::PrivateKey;
use std::fs;
use std::path::Path;

/// Loads the server host key, generating and saving an Ed25519 key on first
/// start so the fingerprint stays stable across restarts.
pub fn load_or_generate(path: &Path) -> Result<PrivateKey, NetworkError> {
    if path.exists() {
        let key = russh::keys::load_secret_key(path, None).map_err(|e| {
            NetworkError::HostKeyError(format!("unable to load {}: {}", path.display(), e))
        })?;
        info!(
            "Loaded host key {} ({})",
            path.display(),
            key.public_key().fingerprint(HashAlg::Sha256)
        );
        return Ok(key);
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| NetworkError::HostKeyError(format!("unable to generate a key: {}", e)))?;
    let encoded = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| NetworkError::HostKeyError(format!("unable to encode the key: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    fs::write(path, encoded.as_bytes()).map_err(|e| io_error(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error(path, e))?;
    }

    info!(
        "Generated host key {} ({})",
        path.display(),
        key.public_key().fingerprint(HashAlg::Sha256)
    );
    Ok(key)
}

fn io_error(path: &Path, e: std::io::Error) -> NetworkError {
    NetworkError::HostKeyError(format!("unable to write {}: {}", path.display(), e))
}
