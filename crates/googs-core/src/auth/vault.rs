//! Encrypted-file secret backend for hosts without a usable keychain.
//!
//! Each key is stored in its own file as `salt | nonce | ciphertext`. The
//! cipher key is derived from a passphrase with Argon2 and the secret is
//! sealed with ChaCha20-Poly1305, using the key name as associated data so a
//! file copied over another key's file fails authentication.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::{rngs::OsRng, RngCore};

use super::store::{SecretBackend, StoreError};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const FILE_EXTENSION: &str = "enc";

pub struct EncryptedFileBackend {
    dir: PathBuf,
    passphrase: String,
}

impl EncryptedFileBackend {
    pub fn new(dir: impl Into<PathBuf>, passphrase: impl Into<String>) -> Result<Self, StoreError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(StoreError::Crypto("passphrase must not be empty".to_string()));
        }
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, passphrase })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, FILE_EXTENSION))
    }

    fn cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305, StoreError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    fn seal(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let payload = Payload {
            msg: plaintext,
            aad: key.as_bytes(),
        };
        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, key: &str, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < SALT_LEN + NONCE_LEN {
            return Err(StoreError::Crypto("sealed secret is truncated".to_string()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let payload = Payload {
            msg: ciphertext,
            aad: key.as_bytes(),
        };
        self.cipher(salt)?
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| StoreError::Crypto("secret failed authentication".to_string()))
    }
}

impl SecretBackend for EncryptedFileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let sealed = match fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let plaintext = self.open(key, &sealed)?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StoreError::Encoding)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let sealed = self.seal(key, value.as_bytes())?;
        let path = self.path(key);
        let tmp = path.with_extension(format!("{}.tmp", FILE_EXTENSION));
        fs::write(&tmp, sealed)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        // Rename is atomic, so readers see either the old or the new secret
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SessionStore, TokenPair};

    #[test]
    fn test_round_trip_through_session_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = EncryptedFileBackend::new(dir.path(), "correct horse").unwrap();
        let store = SessionStore::new(backend);

        let pair = TokenPair::new("A1", "R1").unwrap();
        store.save(&pair).unwrap();
        assert_eq!(store.load(), Some(pair));

        store.clear();
        assert_eq!(store.load(), None);
        assert!(!dir.path().join("accessToken.enc").exists());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(EncryptedFileBackend::new(dir.path(), "pw").unwrap());
            store.save(&TokenPair::new("A1", "R1").unwrap()).unwrap();
        }
        let store = SessionStore::new(EncryptedFileBackend::new(dir.path(), "pw").unwrap());
        assert_eq!(store.load(), TokenPair::new("A1", "R1"));
    }

    #[test]
    fn test_secret_is_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let backend = EncryptedFileBackend::new(dir.path(), "pw").unwrap();
        backend.put("accessToken", "plain-secret-value").unwrap();

        let raw = fs::read(dir.path().join("accessToken.enc")).unwrap();
        let needle = b"plain-secret-value";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_wrong_passphrase_and_tampering_fail() {
        let dir = tempfile::tempdir().unwrap();
        let backend = EncryptedFileBackend::new(dir.path(), "pw").unwrap();
        backend.put("accessToken", "A1").unwrap();
        backend.put("refreshToken", "R1").unwrap();

        let other = EncryptedFileBackend::new(dir.path(), "not-pw").unwrap();
        assert!(matches!(other.get("accessToken"), Err(StoreError::Crypto(_))));

        // A file moved under another key fails authentication
        fs::copy(
            dir.path().join("refreshToken.enc"),
            dir.path().join("accessToken.enc"),
        )
        .unwrap();
        assert!(matches!(backend.get("accessToken"), Err(StoreError::Crypto(_))));

        // The session store treats the unreadable half as absence
        assert_eq!(SessionStore::new(backend).load(), None);
    }

    #[test]
    fn test_rejects_empty_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EncryptedFileBackend::new(dir.path(), "").is_err());
    }
}
