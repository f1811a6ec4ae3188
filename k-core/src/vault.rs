//! Password-derived symmetric vault backing `decrypt` in config templates.
//!
//! On first open the key is derived from an interactive passphrase with
//! PBKDF2-HMAC-SHA1 (4096 iterations, 32 bytes) and persisted at mode 0600.
//! The salt is a fixed constant: the key must be re-derivable from the
//! passphrase alone on a fresh host, so it cannot be random; PBKDF2 here
//! buys cost amplification, not lookup-table resistance.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_secretbox::aead::{Aead, AeadCore, KeyInit, OsRng};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};

use crate::error::VaultError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const ITERATIONS: u32 = 4096;
const SALT: [u8; 8] = [47, 239, 236, 171, 92, 171, 148, 211];

/// A 32-byte secretbox key, read-only after open.
#[derive(Clone)]
pub struct Vault {
    key: [u8; KEY_LEN],
}

impl Vault {
    /// Open the key file at `path`, or — when `create_if_missing` — prompt
    /// for a passphrase twice, derive the key, and persist it.
    pub fn open(path: &Path, create_if_missing: bool) -> Result<Vault, VaultError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| VaultError::BadKey {
                    path: path.to_path_buf(),
                })?;
                Ok(Vault { key })
            }
            Err(err) if !create_if_missing => Err(io_err(path, err)),
            Err(_) => Vault::create(path),
        }
    }

    /// Wrap existing key material (tests, key import).
    pub fn from_key(key: [u8; KEY_LEN]) -> Vault {
        Vault { key }
    }

    fn create(path: &Path) -> Result<Vault, VaultError> {
        let pass = rpassword::prompt_password("Please enter a password: ")
            .map_err(VaultError::Prompt)?;
        if pass.is_empty() {
            return Err(VaultError::EmptyPassword);
        }
        let pass2 =
            rpassword::prompt_password("Enter password again: ").map_err(VaultError::Prompt)?;
        if pass != pass2 {
            return Err(VaultError::PasswordMismatch);
        }
        let key = derive_key(pass.as_bytes());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::write(path, key).map_err(|e| io_err(path, e))?;
        set_key_permissions(path)?;
        Ok(Vault { key })
    }

    /// Encrypt `plaintext` with a fresh nonce; returns base64 of
    /// `nonce(24) || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher =
            XSalsa20Poly1305::new_from_slice(&self.key).map_err(|_| VaultError::Encrypt)?;
        let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Inverse of [`Vault::encrypt`]. Any tampering or a wrong key is a
    /// hard error.
    pub fn decrypt(&self, value: &str) -> Result<String, VaultError> {
        let bytes = BASE64.decode(value)?;
        if bytes.len() < NONCE_LEN {
            return Err(VaultError::Decrypt(value.to_string()));
        }
        let cipher =
            XSalsa20Poly1305::new_from_slice(&self.key).map_err(|_| VaultError::Encrypt)?;
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Decrypt(value.to_string()))?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Decrypt(value.to_string()))
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vault(..)")
    }
}

pub(crate) fn derive_key(pass: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(pass, &SALT, ITERATIONS, &mut key);
    key
}

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> VaultError {
    VaultError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(unix)]
fn set_key_permissions(path: &Path) -> Result<(), VaultError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_key_permissions(_path: &Path) -> Result<(), VaultError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
